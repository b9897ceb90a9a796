use crate::traits::HistoryStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of the pool conversation. Only assistant messages carry an agent name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            agent_name: None,
            content: content.into(),
        }
    }

    pub fn assistant(agent_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            agent_name: Some(agent_name.into()),
            content: content.into(),
        }
    }
}

/// Name and description of a registered agent, as seen by routers and peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentProfile {
    pub name: String,
    pub description: String,
}

/// Free-form key/value scratch space shared by every agent, tool and router of a pool.
///
/// Cloning yields another handle to the same map, so a write through any handle is
/// visible to all of them. The lock is never held across an await point.
#[derive(Clone, Default)]
pub struct DataStore {
    inner: Arc<Mutex<Map<String, Value>>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_value(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.lock().insert(key.into(), value)
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: &T) -> anyhow::Result<()> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value);
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Returns `None` when the key is missing or holds a value of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_value(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.lock().clone()
    }

    /// Whether both handles point at the same underlying map.
    pub fn shares_with(&self, other: &DataStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

/// Shared context of a pool: the append-only conversation and the data store.
///
/// Agents and routers only ever see `&State`; appending to the history is reserved
/// to the pool's control loop.
#[derive(Default)]
pub struct State {
    history: Vec<Message>,
    data: DataStore,
    agents: Vec<AgentProfile>,
    history_store: Option<Arc<dyn HistoryStore>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn with_data(mut self, data: DataStore) -> Self {
        self.data = data;
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.history.last()
    }

    pub fn data(&self) -> &DataStore {
        &self.data
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: &T) -> anyhow::Result<()> {
        self.data.set(key, value)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data.get(key)
    }

    /// Agents registered in the owning pool, in registration order.
    pub fn agents(&self) -> &[AgentProfile] {
        &self.agents
    }

    pub fn history_store(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.history_store.as_ref()
    }

    pub(crate) fn set_history_store(&mut self, store: Arc<dyn HistoryStore>) {
        self.history_store = Some(store);
    }

    pub(crate) fn set_agents(&mut self, agents: Vec<AgentProfile>) {
        self.agents = agents;
    }

    pub(crate) async fn append(&mut self, message: Message) {
        if let Some(store) = &self.history_store
            && let Err(e) = store.append(&message).await
        {
            tracing::warn!("Failed to mirror message into history store '{}': {}", store.name(), e);
        }
        self.history.push(message);
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("history", &self.history)
            .field("data", &self.data)
            .field("agents", &self.agents)
            .field(
                "history_store",
                &self.history_store.as_ref().map(|store| store.name().to_string()),
            )
            .finish()
    }
}
