//! "Who runs next" decisions.
//!
//! A [`Router`] is consulted once per iteration of the pool's control loop with the
//! shared state, the number of completed turns and a summary of the previous turn.
//! It may read and write `state.data()`; the history is read-only to it.

use crate::state::State;
use crate::traits::Provider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod function;
pub mod round_robin;
pub mod routing_agent;

pub use function::FnRouter;
pub use round_robin::RoundRobinRouter;
pub use routing_agent::RoutingAgent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterResult {
    Next(String),
    Stop,
}

impl RouterResult {
    pub fn next(name: impl Into<String>) -> Self {
        Self::Next(name.into())
    }

    pub fn stop() -> Self {
        Self::Stop
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }

    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::Next(name) => Some(name),
            Self::Stop => None,
        }
    }
}

/// Summary of the turn that just completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastResult {
    pub agent: String,
    pub output: String,
    pub tools_used: Vec<String>,
}

#[async_trait]
pub trait Router: Send + Sync {
    fn name(&self) -> &str;

    /// `last` is `None` on the first consultation of a run.
    async fn decide(
        &self,
        state: &State,
        call_count: usize,
        last: Option<&LastResult>,
    ) -> anyhow::Result<RouterResult>;

    /// Agent names this router can return, when known up front.
    fn candidates(&self) -> Option<&[String]> {
        None
    }

    /// Called once at pool construction for routers backed by a model.
    fn resolve_default_model(&mut self, _model: &Arc<dyn Provider>) {}
}
