use crate::error::{PoolError, ToolError};
use crate::state::DataStore;
use crate::tools::{Tool, ToolInvocation};
use crate::traits::{ToolOutput, ToolSpec};
use serde_json::Value;

/// Tools owned by one agent, keyed by unique name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Tool>) -> Result<Self, PoolError> {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Tool) -> Result<(), PoolError> {
        if self.contains(tool.name()) {
            return Err(PoolError::config(format!(
                "tool '{}' is registered twice",
                tool.name()
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(Tool::name).collect()
    }

    pub fn get_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Unknown names come back as an error payload rather than failing the turn.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        data: &DataStore,
        tracing: bool,
    ) -> Result<ToolInvocation, ToolError> {
        match self.get(name) {
            Some(tool) => tool.invoke(args, data, tracing).await,
            None => Ok(ToolInvocation {
                output: ToolOutput::Error(format!("Tool '{}' not found", name)),
                succeeded: false,
                attempts: 0,
                trace: vec![],
            }),
        }
    }
}
