use crate::state::DataStore;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub mod infer;
pub mod policy;
pub mod tool;

pub use policy::{ExecutionPolicy, OnError, OutputSchema};
pub use tool::{AttemptOutcome, AttemptRecord, Tool, ToolBuilder, ToolInvocation};

pub fn extract_string_arg(args: &Value, key: &str) -> anyhow::Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))
        .map(|s| s.to_string())
}

pub fn extract_string_arg_opt(args: &Value, key: &str, default: &str) -> String {
    args.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

pub fn extract_usize_arg_opt(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

/// Named arguments of one tool call, plus a handle on the pool's data store.
#[derive(Debug, Clone)]
pub struct ToolArgs {
    args: Value,
    data: DataStore,
}

impl ToolArgs {
    pub fn new(args: Map<String, Value>, data: DataStore) -> Self {
        Self {
            args: Value::Object(args),
            data,
        }
    }

    pub fn data(&self) -> &DataStore {
        &self.data
    }

    pub fn raw(&self) -> &Value {
        &self.args
    }

    pub fn into_value(self) -> Value {
        self.args
    }

    pub fn string(&self, key: &str) -> anyhow::Result<String> {
        extract_string_arg(&self.args, key)
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        extract_string_arg_opt(&self.args, key, default)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> usize {
        extract_usize_arg_opt(&self.args, key, default)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .args
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))?;
        serde_json::from_value(value)
            .map_err(|e| anyhow::anyhow!("Invalid '{}' parameter: {}", key, e))
    }

    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.args.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get(key).map(Some),
        }
    }

    /// Deserializes the whole argument object into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_value(self.args.clone())
            .map_err(|e| anyhow::anyhow!("Invalid arguments: {}", e))
    }
}
