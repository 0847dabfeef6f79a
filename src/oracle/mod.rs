pub mod json;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

/// Failure of a single oracle call. Always recoverable by the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    /// Network or service failure.
    #[error("oracle request failed: {0}")]
    Request(String),
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    /// Reply did not contain recoverable JSON of the expected shape.
    #[error("unparseable oracle reply: {0}")]
    Parse(String),
}

/// An oracle failure recorded for observability, with where it happened.
#[derive(Debug, Clone)]
pub struct OracleFailure {
    pub context: String,
    pub error: OracleError,
}

impl OracleFailure {
    pub fn new(context: impl Into<String>, error: OracleError) -> Self {
        Self {
            context: context.into(),
            error,
        }
    }
}

/// Token and time allowance for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallBudget {
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// The external text-classification service.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, OracleError>;
}

/// Call the oracle and decode its reply into `T`.
///
/// The timeout is enforced here, so an oracle that ignores its own deadline
/// still yields `OracleError::Timeout`.
pub async fn ask<T: DeserializeOwned>(
    oracle: &dyn Oracle,
    system: &str,
    prompt: &str,
    budget: CallBudget,
) -> Result<T, OracleError> {
    let call = oracle.complete(system, prompt, budget.max_tokens, budget.timeout);
    let raw = tokio::time::timeout(budget.timeout, call)
        .await
        .map_err(|_| OracleError::Timeout(budget.timeout))??;

    debug!(prompt_len = prompt.len(), reply_len = raw.len(), "oracle replied");

    let value = json::parse_lenient(&raw)?;
    serde_json::from_value(value).map_err(|e| OracleError::Parse(e.to_string()))
}

/// Spaces consecutive oracle calls to stay under external rate limits.
pub struct Pacer {
    delay: Duration,
    calls: usize,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, calls: 0 }
    }

    /// Wait before a call. The first call goes out immediately.
    pub async fn wait(&mut self) {
        if self.calls > 0 && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls += 1;
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{Oracle, OracleError};

    type Handler = Box<dyn Fn(&str, &str) -> Result<String, OracleError> + Send + Sync>;

    /// Deterministic oracle driven by a closure over `(system, prompt)`.
    pub struct ScriptedOracle {
        handler: Handler,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        pub fn new(
            handler: impl Fn(&str, &str) -> Result<String, OracleError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Box::new(handler),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// Always answers with the same text.
        pub fn replying(reply: &str) -> Self {
            let reply = reply.to_string();
            Self::new(move |_, _| Ok(reply.clone()))
        }

        /// Answers from a fixed script, then fails once it runs out.
        pub fn sequence(replies: &[&str]) -> Self {
            let queue: Mutex<VecDeque<String>> =
                Mutex::new(replies.iter().map(|r| r.to_string()).collect());
            Self::new(move |_, _| {
                queue
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| OracleError::Request("script exhausted".to_string()))
            })
        }

        /// Every call fails like a dead network.
        pub fn failing() -> Self {
            Self::new(|_, _| Err(OracleError::Request("connection refused".to_string())))
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        async fn complete(
            &self,
            system: &str,
            prompt: &str,
            _max_tokens: u32,
            _timeout: Duration,
        ) -> Result<String, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            (self.handler)(system, prompt)
        }
    }

    /// Never answers; exercises the timeout path.
    pub struct StalledOracle;

    #[async_trait]
    impl Oracle for StalledOracle {
        async fn complete(
            &self,
            _system: &str,
            _prompt: &str,
            _max_tokens: u32,
            _timeout: Duration,
        ) -> Result<String, OracleError> {
            std::future::pending().await
        }
    }
}
