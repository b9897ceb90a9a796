pub mod context;
pub mod loop_;
pub mod registry;

pub use context::ContextBuilder;
pub use loop_::{Agent, AgentBuilder, AgentTurn, FragmentSink};
pub use registry::ToolRegistry;
