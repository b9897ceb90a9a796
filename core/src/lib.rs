pub mod agent;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod history;
pub mod pool;
pub mod providers;
pub mod router;
pub mod state;
pub mod tools;
pub mod traits;

pub use agent::{Agent, AgentBuilder, AgentTurn, ContextBuilder, ToolRegistry};
pub use config::*;
pub use descriptor::{
    AgentDescriptor, PolicyDescriptor, PoolDescriptor, RouterDescriptor, ToolDescriptor,
};
pub use error::{PoolError, ToolError};
pub use history::{InMemoryHistory, create_history_store};
pub use pool::{Pool, PoolBuilder, PoolEvent, PoolStatus, RunOutcome, StopReason};
pub use providers::{
    OpenAIProvider, create_pool, create_pool_with_model, create_provider, create_provider_for_model,
};
pub use router::{FnRouter, LastResult, RoundRobinRouter, Router, RouterResult, RoutingAgent};
pub use state::{AgentProfile, DataStore, Message, Role, State};
pub use tools::{
    AttemptOutcome, AttemptRecord, ExecutionPolicy, OnError, OutputSchema, Tool, ToolArgs,
    ToolBuilder, ToolInvocation,
};
pub use traits::{
    ChatMessage, ChatRequest, ChatResponse, HistoryStore, ParamSpec, ParamType, Provider,
    ProviderEvent, ToolCall, ToolOutput, ToolSpec,
};
