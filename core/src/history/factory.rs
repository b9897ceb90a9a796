use crate::history::InMemoryHistory;
use crate::traits::HistoryStore;
use anyhow::{Result, anyhow};
use std::sync::Arc;

pub fn create_history_store(kind: &str) -> Result<Arc<dyn HistoryStore>> {
    match kind.to_lowercase().as_str() {
        "memory" | "in_memory" => Ok(Arc::new(InMemoryHistory::new())),
        _ => Err(anyhow!("Unknown history store: {}. Available: in_memory", kind)),
    }
}
