use crate::router::{LastResult, Router, RouterResult};
use crate::state::State;
use async_trait::async_trait;

/// Picks `agents[call_count % len]`.
///
/// Without cycling it stops after one pass over the list; with cycling the
/// pool's `max_iter` is the only bound.
#[derive(Debug, Clone)]
pub struct RoundRobinRouter {
    agents: Vec<String>,
    cycle: bool,
}

impl RoundRobinRouter {
    pub fn new(agents: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            agents: agents.into_iter().map(Into::into).collect(),
            cycle: false,
        }
    }

    pub fn cycling(agents: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(agents).with_cycle(true)
    }

    pub fn with_cycle(mut self, cycle: bool) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn cycles(&self) -> bool {
        self.cycle
    }

    fn pick(&self, call_count: usize) -> RouterResult {
        if self.agents.is_empty() || (!self.cycle && call_count >= self.agents.len()) {
            return RouterResult::Stop;
        }
        RouterResult::Next(self.agents[call_count % self.agents.len()].clone())
    }
}

#[async_trait]
impl Router for RoundRobinRouter {
    fn name(&self) -> &str {
        "round_robin"
    }

    async fn decide(
        &self,
        _state: &State,
        call_count: usize,
        _last: Option<&LastResult>,
    ) -> anyhow::Result<RouterResult> {
        Ok(self.pick(call_count))
    }

    fn candidates(&self) -> Option<&[String]> {
        Some(&self.agents)
    }
}
