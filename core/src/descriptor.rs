//! Serialisable snapshots of tools, agents and pools.
//!
//! Descriptors capture configuration only. Handlers, model clients and
//! history are not part of them, so a descriptor documents a pool but cannot
//! rebuild one on its own.

use crate::agent::Agent;
use crate::pool::Pool;
use crate::tools::{ExecutionPolicy, OnError, Tool};
use crate::traits::ToolSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
    pub max_retries: u32,
    pub retry_delay_secs: f64,
    pub retry_backoff: bool,
    pub on_error: OnError,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl From<&ExecutionPolicy> for PolicyDescriptor {
    fn from(policy: &ExecutionPolicy) -> Self {
        Self {
            timeout_secs: policy.timeout.map(|t| t.as_secs_f64()),
            max_retries: policy.max_retries,
            retry_delay_secs: policy.retry_delay.as_secs_f64(),
            retry_backoff: policy.retry_backoff,
            on_error: policy.on_error,
            output_schema: policy.output_schema.as_ref().map(|s| s.schema().clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    #[serde(flatten)]
    pub spec: ToolSpec,
    pub policy: PolicyDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    pub persona: String,
    /// `None` until the agent has a model, explicit or inherited from a pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing: Option<bool>,
    pub max_tool_rounds: usize,
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterDescriptor {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolDescriptor {
    pub agents: Vec<AgentDescriptor>,
    pub router: RouterDescriptor,
    pub max_iter: usize,
    pub tracing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<String>,
}

impl PoolDescriptor {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.name == name)
    }
}

impl Tool {
    pub fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            spec: self.spec().clone(),
            policy: self.policy().into(),
        }
    }
}

impl Agent {
    pub fn describe(&self) -> AgentDescriptor {
        AgentDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            persona: self.persona().to_string(),
            model: self.model().map(|m| m.model_name().to_string()),
            tracing: self.tracing(),
            max_tool_rounds: self.max_tool_rounds(),
            tools: self.tools().iter().map(Tool::describe).collect(),
        }
    }
}

impl Pool {
    pub fn describe(&self) -> PoolDescriptor {
        PoolDescriptor {
            agents: self.agents().iter().map(Agent::describe).collect(),
            router: RouterDescriptor {
                kind: self.router().name().to_string(),
                candidates: self.router().candidates().map(<[String]>::to_vec),
            },
            max_iter: self.max_iter(),
            tracing: self.tracing(),
            default_model: self.default_model().map(|m| m.model_name().to_string()),
            history: self.state().history_store().map(|s| s.name().to_string()),
        }
    }
}
