use crate::config::SummarizerConfig;
use crate::detect::engine::AnomalyEngine;
use crate::storage::Pool;
use crate::summarize::Summarizer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub engine: Arc<AnomalyEngine>,
    pub summarizer: Arc<dyn Summarizer>,
    pub summarizer_config: SummarizerConfig,
}
