pub mod history;
pub mod provider;
pub mod tool;

pub use history::HistoryStore;
pub use provider::{ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, ToolCall};
pub use tool::{ParamSpec, ParamType, ToolOutput, ToolSpec};
