use crate::agent::Agent;
use crate::error::PoolError;
use crate::router::{LastResult, Router, RouterResult};
use crate::state::State;
use crate::traits::Provider;
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

const STOP_WORDS: &[&str] = &["stop", "done", "finish", "none"];

/// Router that asks a model which agent should speak next.
#[derive(Debug, Clone)]
pub struct RoutingAgent {
    agent: Agent,
    candidates: Vec<String>,
}

impl RoutingAgent {
    pub fn new(
        agent: Agent,
        candidates: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, PoolError> {
        let candidates: Vec<String> = candidates.into_iter().map(Into::into).collect();
        if candidates.is_empty() {
            return Err(PoolError::config(format!(
                "routing agent '{}' needs at least one candidate",
                agent.name()
            )));
        }
        Ok(Self { agent, candidates })
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    fn instructions(&self, state: &State, call_count: usize, last: Option<&LastResult>) -> String {
        let mut prompt = String::from(
            "## Routing\n\nDecide which agent should act next in this conversation.\n\n### Candidates\n\n",
        );
        for name in &self.candidates {
            let description = state
                .agents()
                .iter()
                .find(|p| &p.name == name)
                .map(|p| p.description.as_str())
                .unwrap_or("");
            if description.is_empty() {
                let _ = writeln!(prompt, "- {}", name);
            } else {
                let _ = writeln!(prompt, "- {}: {}", name, description);
            }
        }

        let _ = write!(prompt, "\nTurns completed so far: {}.", call_count);
        if let Some(last) = last {
            let _ = write!(prompt, " The last turn was taken by {}", last.agent);
            if !last.tools_used.is_empty() {
                let _ = write!(prompt, " using {}", last.tools_used.join(", "));
            }
            prompt.push('.');
        }
        prompt.push_str(
            "\n\nReply with exactly one candidate name and nothing else. \
             Reply STOP when the conversation is complete.",
        );
        prompt
    }
}

/// Case-insensitive exact match first, then the earliest candidate mentioned.
pub(crate) fn parse_choice(reply: &str, candidates: &[String]) -> RouterResult {
    let cleaned = reply
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .to_lowercase();

    if let Some(name) = candidates.iter().find(|c| c.to_lowercase() == cleaned) {
        return RouterResult::Next(name.clone());
    }
    if STOP_WORDS.contains(&cleaned.as_str()) {
        return RouterResult::Stop;
    }

    let lowered = reply.to_lowercase();
    candidates
        .iter()
        .filter_map(|name| lowered.find(&name.to_lowercase()).map(|idx| (idx, name)))
        .min_by(|(a_idx, a), (b_idx, b)| a_idx.cmp(b_idx).then(b.len().cmp(&a.len())))
        .map(|(_, name)| RouterResult::Next(name.clone()))
        .unwrap_or(RouterResult::Stop)
}

#[async_trait]
impl Router for RoutingAgent {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn decide(
        &self,
        state: &State,
        call_count: usize,
        last: Option<&LastResult>,
    ) -> anyhow::Result<RouterResult> {
        let instructions = self.instructions(state, call_count, last);
        let turn = self
            .agent
            .run_with_instructions(state, Some(&instructions), None)
            .await?;
        let choice = parse_choice(&turn.output, &self.candidates);
        debug!(router = %self.agent.name(), reply = %turn.output, ?choice, "routing agent replied");
        Ok(choice)
    }

    fn candidates(&self) -> Option<&[String]> {
        Some(&self.candidates)
    }

    fn resolve_default_model(&mut self, model: &Arc<dyn Provider>) {
        let tracing = self.agent.tracing_enabled();
        self.agent.resolve_defaults(Some(model), tracing);
    }
}
