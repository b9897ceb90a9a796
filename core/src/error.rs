use thiserror::Error;

/// Failure of a single tool invocation once its retries are exhausted.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{tool}' failed after {attempts} attempt(s): {message}")]
    Execution {
        tool: String,
        attempts: u32,
        message: String,
    },

    #[error("tool '{tool}' returned output rejected by its schema after {attempts} attempt(s): {message}")]
    Validation {
        tool: String,
        attempts: u32,
        message: String,
    },
}

impl ToolError {
    pub fn tool(&self) -> &str {
        match self {
            Self::Execution { tool, .. } | Self::Validation { tool, .. } => tool,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Execution { attempts, .. } | Self::Validation { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("router selected unknown agent '{name}' after {call_count} turn(s)")]
    Routing { name: String, call_count: usize },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("agent '{agent}' failed: {source}")]
    Agent {
        agent: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("router failed: {0}")]
    Router(#[source] anyhow::Error),
}

impl PoolError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_routing(&self) -> bool {
        matches!(self, Self::Routing { .. })
    }
}
