use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::oracle::CallBudget;

/// Per-item oracle calls (one unit, one message).
const ITEM_TIMEOUT: Duration = Duration::from_secs(120);
/// Bulk oracle calls (a validation batch, a chunk of adjacent pairs).
const BULK_TIMEOUT: Duration = Duration::from_secs(300);

/// How the segment state machine phrases its question to the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Show every segment, ask for a segment id or NEW.
    SegmentCentric,
    /// Show only the reference topic, ask continues/new.
    PreviousCentric,
    /// Show recent, non-stale segments and lean on the previous message.
    Hybrid,
    /// Show the recent transcript with segment tags, ask for a tag or NEW.
    SinglePrompt,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::SegmentCentric,
        Strategy::PreviousCentric,
        Strategy::Hybrid,
        Strategy::SinglePrompt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SegmentCentric => "segment-centric",
            Strategy::PreviousCentric => "previous-centric",
            Strategy::Hybrid => "hybrid",
            Strategy::SinglePrompt => "single-prompt",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        Strategy::ALL
            .into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| {
                anyhow!(
                    "unknown strategy '{}'. Valid: segment-centric, previous-centric, hybrid, single-prompt",
                    s
                )
            })
    }
}

/// Unit validator parameters.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub batch_size: usize,
    /// Units shared between consecutive batches.
    pub batch_overlap: usize,
    /// Adjacent pairs per oracle call in the post-merge pass.
    pub pairs_per_call: usize,
    pub budget: CallBudget,
}

impl ValidationConfig {
    /// Distance between batch starts. Never zero.
    pub fn stride(&self) -> usize {
        self.batch_size.saturating_sub(self.batch_overlap).max(1)
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_overlap: 3,
            pairs_per_call: 20,
            budget: CallBudget {
                max_tokens: 2048,
                timeout: BULK_TIMEOUT,
            },
        }
    }
}

/// Stack assigner parameters.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Stacks up to this size are shown in full in prompts.
    pub full_listing_max: usize,
    pub head_messages: usize,
    pub tail_messages: usize,
    pub budget: CallBudget,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            full_listing_max: 10,
            head_messages: 5,
            tail_messages: 2,
            budget: CallBudget {
                max_tokens: 512,
                timeout: ITEM_TIMEOUT,
            },
        }
    }
}

/// Segment state machine parameters.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub strategy: Strategy,
    /// Hybrid only: segments idle longer than this are hidden (the reference segment never is).
    pub staleness_threshold_minutes: i64,
    /// Hybrid only: cap on segments shown.
    pub max_segments_to_show: usize,
    /// Hybrid only: call out the immediately previous message.
    pub prefer_previous_message: bool,
    /// How many prior messages count as "recent" for the previous-message reference.
    pub recent_window: usize,
    /// Messages shown per segment in prompts.
    pub history_per_segment: usize,
    pub budget: CallBudget,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Hybrid,
            staleness_threshold_minutes: 60,
            max_segments_to_show: 5,
            prefer_previous_message: true,
            recent_window: 50,
            history_per_segment: 10,
            budget: CallBudget {
                max_tokens: 400,
                timeout: ITEM_TIMEOUT,
            },
        }
    }
}

/// Everything the caller can tune about a processing run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub validation: ValidationConfig,
    pub stacks: StackConfig,
    pub segments: SegmentConfig,
    /// Pause between consecutive oracle calls (rate limiting only).
    pub call_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            stacks: StackConfig::default(),
            segments: SegmentConfig::default(),
            call_delay: Duration::from_millis(150),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        for key in [
            "WEAVE_STRATEGY",
            "WEAVE_STALENESS_MINUTES",
            "WEAVE_MAX_SEGMENTS",
            "WEAVE_PREFER_PREVIOUS",
            "WEAVE_BATCH_SIZE",
            "WEAVE_BATCH_OVERLAP",
            "WEAVE_CALL_DELAY_MS",
        ] {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                config
                    .set(key, &value)
                    .with_context(|| format!("invalid {}", key))?;
            }
        }
        Ok(config)
    }

    /// Update one parameter by name. Accepts env-style or short names.
    pub fn set(&mut self, param: &str, value: &str) -> Result<()> {
        let value = value.trim();
        let name = param
            .trim()
            .to_lowercase()
            .trim_start_matches("weave_")
            .to_string();
        match name.as_str() {
            "strategy" => self.segments.strategy = value.parse()?,
            "staleness_minutes" => {
                self.segments.staleness_threshold_minutes =
                    value.parse().context("expected whole minutes")?
            }
            "max_segments" => {
                self.segments.max_segments_to_show =
                    value.parse().context("expected a positive count")?
            }
            "prefer_previous" => self.segments.prefer_previous_message = parse_flag(value)?,
            "batch_size" => {
                let size: usize = value.parse().context("expected a positive count")?;
                if size == 0 {
                    return Err(anyhow!("batch_size must be at least 1"));
                }
                self.validation.batch_size = size;
            }
            "batch_overlap" => {
                self.validation.batch_overlap = value.parse().context("expected a count")?
            }
            "call_delay_ms" => {
                self.call_delay =
                    Duration::from_millis(value.parse().context("expected milliseconds")?)
            }
            other => return Err(anyhow!("unknown parameter '{}'", other)),
        }
        Ok(())
    }

    /// Human-readable dump for `/weave config`.
    pub fn describe(&self) -> String {
        format!(
            "`strategy`: {}\n\
             `staleness_minutes`: {}\n\
             `max_segments`: {}\n\
             `prefer_previous`: {}\n\
             `batch_size`: {}\n\
             `batch_overlap`: {}\n\
             `call_delay_ms`: {}",
            self.segments.strategy,
            self.segments.staleness_threshold_minutes,
            self.segments.max_segments_to_show,
            self.segments.prefer_previous_message,
            self.validation.batch_size,
            self.validation.batch_overlap,
            self.call_delay.as_millis()
        )
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("expected true/false, got '{}'", value)),
    }
}
