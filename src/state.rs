use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::PipelineConfig;
use crate::llm::LlmClient;

pub struct AppState {
    pub llm: Arc<LlmClient>,
    pub admin_ids: HashSet<u64>,
    /// Pipeline parameters (admins can modify at runtime).
    pub config: Arc<RwLock<PipelineConfig>>,
}

impl AppState {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
