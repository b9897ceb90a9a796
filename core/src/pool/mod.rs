//! The orchestration loop.
//!
//! A [`Pool`] owns the agents, the router and the shared [`State`]. Each run seeds
//! the history with the user input, then repeatedly asks the router who goes next,
//! runs that agent and appends its answer, until the router stops, `max_iter`
//! turns have completed, or the router names an agent that does not exist.

use crate::agent::{Agent, AgentTurn};
use crate::error::PoolError;
use crate::router::{LastResult, RoundRobinRouter, Router, RouterResult};
use crate::state::{Message, State};
use crate::traits::{HistoryStore, Provider};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod stream;

pub use stream::PoolEvent;
use stream::EventSender;

pub const DEFAULT_MAX_ITER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    RouterSignaledStop,
    MaxIterReached,
    #[serde(rename = "unknown_agent_error")]
    UnknownAgent,
    /// An agent, tool or router error aborted the run.
    #[serde(rename = "execution_error")]
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::RouterSignaledStop => "router_signaled_stop",
            Self::MaxIterReached => "max_iter_reached",
            Self::UnknownAgent => "unknown_agent_error",
            Self::Failed => "execution_error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Init,
    Running,
    Stopped(StopReason),
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Running => f.write_str("running"),
            Self::Stopped(reason) => write!(f, "stopped ({})", reason),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    /// Output of the last agent that ran; empty when no agent ran.
    pub output: String,
    pub stop_reason: StopReason,
    pub turns: usize,
}

pub struct Pool {
    agents: Vec<Agent>,
    router: Box<dyn Router>,
    max_iter: usize,
    tracing: bool,
    default_model: Option<Arc<dyn Provider>>,
    state: State,
    status: PoolStatus,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("agents", &self.agent_names())
            .field("router", &self.router.name())
            .field("max_iter", &self.max_iter)
            .field("tracing", &self.tracing)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Pool {
    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    /// A pool with the default round-robin router.
    pub fn new(agents: impl IntoIterator<Item = Agent>) -> Result<Self, PoolError> {
        Self::builder().agents(agents).build()
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(Agent::name).collect()
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name() == name)
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    pub fn tracing(&self) -> bool {
        self.tracing
    }

    pub fn default_model(&self) -> Option<&Arc<dyn Provider>> {
        self.default_model.as_ref()
    }

    pub fn router(&self) -> &dyn Router {
        self.router.as_ref()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    pub fn status(&self) -> PoolStatus {
        self.status
    }

    /// Runs to completion and returns the final outcome.
    pub async fn run(&mut self, input: impl Into<String>) -> Result<RunOutcome, PoolError> {
        self.drive(input.into(), None, false).await
    }

    pub(crate) async fn drive(
        &mut self,
        input: String,
        events: Option<&EventSender>,
        fragments: bool,
    ) -> Result<RunOutcome, PoolError> {
        let run_id = Uuid::new_v4().to_string();
        info!(%run_id, agents = self.agents.len(), max_iter = self.max_iter, "pool run started");

        self.state.append(Message::user(input)).await;
        self.status = PoolStatus::Running;

        let mut call_count = 0usize;
        let mut last: Option<LastResult> = None;

        let stop_reason = loop {
            let decision = match self
                .router
                .decide(&self.state, call_count, last.as_ref())
                .await
            {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(%run_id, router = %self.router.name(), "router failed: {:#}", e);
                    self.status = PoolStatus::Stopped(StopReason::Failed);
                    return Err(PoolError::Router(e));
                }
            };
            debug!(%run_id, call_count, ?decision, "router decided");

            if call_count >= self.max_iter {
                break StopReason::MaxIterReached;
            }
            let name = match decision {
                RouterResult::Stop => break StopReason::RouterSignaledStop,
                RouterResult::Next(name) => name,
            };

            let Some(agent) = self.agents.iter().find(|a| a.name() == name) else {
                warn!(%run_id, agent = %name, call_count, "router selected unknown agent");
                self.status = PoolStatus::Stopped(StopReason::UnknownAgent);
                return Err(PoolError::Routing { name, call_count });
            };

            let turn = call_count + 1;
            info!(%run_id, agent = %name, turn, "turn started");
            if let Some(tx) = events
                && fragments
            {
                let _ = tx.send(Ok(PoolEvent::TurnStarted {
                    agent: name.clone(),
                    turn,
                }));
            }

            let result = match (events, fragments) {
                (Some(tx), true) => {
                    let sink = |text: &str| {
                        let _ = tx.send(Ok(PoolEvent::Fragment {
                            agent: name.clone(),
                            text: text.to_string(),
                        }));
                    };
                    agent.run_streaming(&self.state, &sink).await
                }
                _ => agent.run(&self.state).await,
            };
            let AgentTurn {
                output,
                tools_used,
                trace,
            } = match result {
                Ok(turn) => turn,
                Err(e) => {
                    warn!(%run_id, agent = %name, turn, "turn failed: {}", e);
                    self.status = PoolStatus::Stopped(StopReason::Failed);
                    return Err(e);
                }
            };

            self.state
                .append(Message::assistant(name.clone(), output.clone()))
                .await;
            info!(%run_id, agent = %name, turn, tools = tools_used.len(), "turn completed");

            let completed = LastResult {
                agent: name,
                output,
                tools_used,
            };
            if let Some(tx) = events {
                let _ = tx.send(Ok(PoolEvent::TurnCompleted {
                    turn,
                    result: completed.clone(),
                    trace,
                }));
            }
            last = Some(completed);
            call_count = turn;
        };

        self.status = PoolStatus::Stopped(stop_reason);
        info!(%run_id, turns = call_count, reason = %stop_reason, "pool run stopped");

        Ok(RunOutcome {
            run_id,
            output: last.map(|l| l.output).unwrap_or_default(),
            stop_reason,
            turns: call_count,
        })
    }
}

pub struct PoolBuilder {
    agents: Vec<Agent>,
    router: Option<Box<dyn Router>>,
    max_iter: usize,
    tracing: bool,
    default_model: Option<Arc<dyn Provider>>,
    history: Option<Arc<dyn HistoryStore>>,
    state: Option<State>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self {
            agents: vec![],
            router: None,
            max_iter: DEFAULT_MAX_ITER,
            tracing: false,
            default_model: None,
            history: None,
            state: None,
        }
    }
}

impl PoolBuilder {
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agents(mut self, agents: impl IntoIterator<Item = Agent>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn router(mut self, router: impl Router + 'static) -> Self {
        self.router = Some(Box::new(router));
        self
    }

    pub fn boxed_router(mut self, router: Box<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Default tracing flag for agents that do not set their own.
    pub fn tracing(mut self, enabled: bool) -> Self {
        self.tracing = enabled;
        self
    }

    pub fn default_model(mut self, model: Arc<dyn Provider>) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Takes precedence over a store already attached to the supplied state.
    pub fn history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> Result<Pool, PoolError> {
        if self.agents.is_empty() {
            return Err(PoolError::config("a pool needs at least one agent"));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name()) {
                return Err(PoolError::config(format!(
                    "agent name '{}' is used more than once",
                    agent.name()
                )));
            }
        }

        let mut router = self.router.unwrap_or_else(|| {
            Box::new(RoundRobinRouter::new(
                self.agents.iter().map(|a| a.name().to_string()),
            ))
        });
        if let Some(candidates) = router.candidates()
            && let Some(missing) = candidates.iter().find(|c| !seen.contains(c.as_str()))
        {
            return Err(PoolError::config(format!(
                "router '{}' refers to unregistered agent '{}'",
                router.name(),
                missing
            )));
        }

        let mut agents = self.agents;
        for agent in &mut agents {
            agent.resolve_defaults(self.default_model.as_ref(), self.tracing);
            if agent.model().is_none() {
                warn!(agent = %agent.name(), "agent has no model and the pool has no default model");
            }
        }
        if let Some(model) = &self.default_model {
            router.resolve_default_model(model);
        }

        let mut state = self.state.unwrap_or_default();
        if let Some(store) = self.history {
            state.set_history_store(store);
        }
        state.set_agents(agents.iter().map(Agent::profile).collect());

        Ok(Pool {
            agents,
            router,
            max_iter: self.max_iter,
            tracing: self.tracing,
            default_model: self.default_model,
            state,
            status: PoolStatus::Init,
        })
    }
}
