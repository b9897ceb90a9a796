use crate::error::{PoolError, ToolError};
use crate::state::DataStore;
use crate::tools::ToolArgs;
use crate::tools::infer::{self, InferredArgs};
use crate::tools::policy::{ExecutionPolicy, OnError, OutputSchema};
use crate::traits::{ParamSpec, ParamType, ToolOutput, ToolSpec};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub type ToolFuture = BoxFuture<'static, anyhow::Result<Value>>;
type Handler = Arc<dyn Fn(ToolArgs) -> ToolFuture + Send + Sync>;
type ArgCheck = Arc<dyn Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(String),
    TimedOut(Duration),
    /// The call returned, but its output did not match the output schema.
    Rejected(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed(message) => write!(f, "failed: {}", message),
            Self::TimedOut(limit) => write!(f, "timed out after {:?}", limit),
            Self::Rejected(message) => write!(f, "output rejected: {}", message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub tool: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Result of [`Tool::invoke`] when the policy did not raise.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub output: ToolOutput,
    pub succeeded: bool,
    pub attempts: u32,
    /// One record per attempt; only filled when tracing is enabled.
    pub trace: Vec<AttemptRecord>,
}

/// A named callable together with the policy governing every call to it.
///
/// Cloning is cheap; clones share the handler and the resolved spec.
#[derive(Clone)]
pub struct Tool {
    spec: Arc<ToolSpec>,
    policy: Arc<ExecutionPolicy>,
    handler: Handler,
    arg_check: Option<ArgCheck>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("spec", &self.spec)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn builder() -> ToolBuilder {
        ToolBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn description(&self) -> &str {
        &self.spec.description
    }

    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Runs the tool under its execution policy.
    ///
    /// Returns `Err` only when the policy is `raise` and every attempt failed;
    /// `return_error` and `return_none` fold the failure into the returned output.
    pub async fn invoke(
        &self,
        args: Value,
        data: &DataStore,
        tracing: bool,
    ) -> Result<ToolInvocation, ToolError> {
        let mut trace = Vec::new();

        let args = match self.check_arguments(args) {
            Ok(args) => args,
            Err(message) => {
                warn!("Tool '{}' called with invalid arguments: {}", self.name(), message);
                return self.give_up(Failure::Runtime(message), 0, trace);
            }
        };

        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0u32;

        let failure = loop {
            attempt += 1;
            let started_at = chrono::Utc::now();
            let started = Instant::now();
            let result = self.attempt(args.clone(), data.clone()).await;
            let elapsed = started.elapsed();

            let outcome = match &result {
                Ok(_) => AttemptOutcome::Succeeded,
                Err(failure) => failure.outcome(),
            };
            if tracing {
                info!(
                    tool = %self.name(),
                    attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "tool attempt {}",
                    outcome
                );
                trace.push(AttemptRecord {
                    tool: self.name().to_string(),
                    attempt,
                    outcome,
                    elapsed,
                    started_at,
                });
            } else {
                debug!(tool = %self.name(), attempt, "tool attempt {}", outcome);
            }

            match result {
                Ok(value) => {
                    return Ok(ToolInvocation {
                        output: ToolOutput::Value(value),
                        succeeded: true,
                        attempts: attempt,
                        trace,
                    });
                }
                Err(failure) if attempt >= max_attempts => break failure,
                Err(_) => {
                    let delay = self.policy.delay_before_retry(attempt);
                    debug!(
                        "Retrying tool '{}' in {:?} ({}/{})",
                        self.name(),
                        delay,
                        attempt,
                        self.policy.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        self.give_up(failure, attempt, trace)
    }

    async fn attempt(&self, args: Map<String, Value>, data: DataStore) -> Result<Value, Failure> {
        let call = (self.handler)(ToolArgs::new(args, data));

        let result = match self.policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => return Err(Failure::TimedOut(limit)),
            },
            None => call.await,
        };

        let value = result.map_err(|e| Failure::Runtime(format!("{:#}", e)))?;

        if let Some(schema) = &self.policy.output_schema {
            schema.validate(&value).map_err(Failure::Invalid)?;
        }
        Ok(value)
    }

    fn check_arguments(&self, args: Value) -> Result<Map<String, Value>, String> {
        let args = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => return Err(format!("arguments must be a JSON object, got {}", other)),
        };

        for param in &self.spec.parameters {
            match args.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(format!("missing required parameter '{}'", param.name));
                }
                Some(value) if !value.is_null() && !matches_type(param.ty, value) => {
                    return Err(format!(
                        "parameter '{}' must be of type {}",
                        param.name,
                        param.ty.as_json_type()
                    ));
                }
                _ => {}
            }
        }
        if let Some(check) = &self.arg_check {
            check(&args)?;
        }
        Ok(args)
    }

    fn give_up(
        &self,
        failure: Failure,
        attempts: u32,
        trace: Vec<AttemptRecord>,
    ) -> Result<ToolInvocation, ToolError> {
        let tool = self.name().to_string();
        match self.policy.on_error {
            OnError::Raise => Err(match failure {
                Failure::Invalid(message) => ToolError::Validation {
                    tool,
                    attempts,
                    message,
                },
                other => ToolError::Execution {
                    tool,
                    attempts,
                    message: other.message(),
                },
            }),
            OnError::ReturnError => {
                warn!("Tool '{}' failed after {} attempt(s): {}", tool, attempts, failure.message());
                Ok(ToolInvocation {
                    output: ToolOutput::Error(failure.message()),
                    succeeded: false,
                    attempts,
                    trace,
                })
            }
            OnError::ReturnNone => {
                warn!("Tool '{}' failed after {} attempt(s): {}", tool, attempts, failure.message());
                Ok(ToolInvocation {
                    output: ToolOutput::None,
                    succeeded: false,
                    attempts,
                    trace,
                })
            }
        }
    }
}

fn matches_type(ty: ParamType, value: &Value) -> bool {
    match ty {
        ParamType::String => value.is_string(),
        ParamType::Integer => value.is_i64() || value.is_u64(),
        ParamType::Number => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Array => value.is_array(),
        ParamType::Object => value.is_object(),
    }
}

enum Failure {
    Runtime(String),
    TimedOut(Duration),
    Invalid(String),
}

impl Failure {
    fn message(&self) -> String {
        match self {
            Self::Runtime(message) => message.clone(),
            Self::TimedOut(limit) => format!("timed out after {:?}", limit),
            Self::Invalid(message) => format!("output failed validation: {}", message),
        }
    }

    fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::Runtime(message) => AttemptOutcome::Failed(message.clone()),
            Self::TimedOut(limit) => AttemptOutcome::TimedOut(*limit),
            Self::Invalid(message) => AttemptOutcome::Rejected(message.clone()),
        }
    }
}

/// Collects a tool's metadata and policy; [`ToolBuilder::build`] resolves every
/// inferred field once.
#[derive(Default)]
pub struct ToolBuilder {
    name: Option<String>,
    description: Option<String>,
    parameters: Option<Vec<ParamSpec>>,
    policy: ExecutionPolicy,
    output_schema: Option<Value>,
    handler: Option<Handler>,
    arg_check: Option<ArgCheck>,
    inferred_name: Option<String>,
    inferred_args: Option<Result<InferredArgs, String>>,
}

impl ToolBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares a parameter explicitly. Any explicit declaration replaces inference.
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.parameters.get_or_insert_with(Vec::new).push(param);
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = ParamSpec>) -> Self {
        self.parameters.get_or_insert_with(Vec::new).extend(params);
        self
    }

    pub fn policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.policy.retry_delay = delay;
        self
    }

    pub fn retry_backoff(mut self, backoff: bool) -> Self {
        self.policy.retry_backoff = backoff;
        self
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.policy.on_error = on_error;
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Async handler over raw arguments. Parameters must be declared with
    /// [`param`](Self::param) since nothing can be inferred from `ToolArgs`.
    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.inferred_name = infer::callable_name::<F>();
        self.inferred_args = None;
        self.arg_check = None;
        self.handler = Some(Arc::new(move |args: ToolArgs| -> ToolFuture {
            handler(args).boxed()
        }));
        self
    }

    /// Async handler over a typed argument struct; parameters and description are
    /// inferred from `A`'s schema, the name from the function item.
    pub fn typed_handler<A, R, F, Fut>(mut self, handler: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.inferred_name = infer::callable_name::<F>();
        self.inferred_args = Some(infer::infer_args::<A>());
        self.arg_check = Some(typed_arg_check::<A>());
        self.handler = Some(Arc::new(move |args: ToolArgs| -> ToolFuture {
            match args.parse::<A>() {
                Ok(parsed) => {
                    let call = handler(parsed);
                    async move {
                        let result = call.await?;
                        Ok::<Value, anyhow::Error>(serde_json::to_value(result)?)
                    }
                    .boxed()
                }
                Err(e) => async move { Err::<Value, anyhow::Error>(e) }.boxed(),
            }
        }));
        self
    }

    /// Synchronous handler run on the blocking pool, so a timed-out call is
    /// abandoned instead of stalling the agent.
    pub fn blocking_handler<A, R, F>(mut self, handler: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.inferred_name = infer::callable_name::<F>();
        self.inferred_args = Some(infer::infer_args::<A>());
        self.arg_check = Some(typed_arg_check::<A>());
        let handler = Arc::new(handler);
        self.handler = Some(Arc::new(move |args: ToolArgs| -> ToolFuture {
            let handler = Arc::clone(&handler);
            async move {
                let parsed = args.parse::<A>()?;
                let result = tokio::task::spawn_blocking(move || handler(parsed))
                    .await
                    .map_err(|e| anyhow::anyhow!("tool task aborted: {}", e))?;
                Ok::<Value, anyhow::Error>(serde_json::to_value(result?)?)
            }
            .boxed()
        }));
        self
    }

    pub fn build(self) -> Result<Tool, PoolError> {
        let handler = self
            .handler
            .ok_or_else(|| PoolError::config("tool has no handler"))?;

        let name = self.name.or(self.inferred_name).ok_or_else(|| {
            PoolError::config("cannot infer a tool name from a closure; set one with .name()")
        })?;
        if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
            return Err(PoolError::config(format!("invalid tool name '{}'", name)));
        }

        let mut inferred_description = None;
        let parameters = match (self.parameters, self.inferred_args) {
            (Some(explicit), _) => explicit,
            (None, Some(Ok(inferred))) => {
                inferred_description = inferred.description;
                inferred.parameters
            }
            (None, Some(Err(reason))) => {
                return Err(PoolError::config(format!("tool '{}': {}", name, reason)));
            }
            (None, None) => Vec::new(),
        };

        for (index, param) in parameters.iter().enumerate() {
            if parameters[..index].iter().any(|p| p.name == param.name) {
                return Err(PoolError::config(format!(
                    "tool '{}' declares parameter '{}' twice",
                    name, param.name
                )));
            }
        }

        let mut policy = self.policy;
        if let Some(schema) = self.output_schema {
            policy.output_schema = Some(
                OutputSchema::new(schema)
                    .map_err(|e| PoolError::config(format!("tool '{}': {}", name, e)))?,
            );
        }

        let description = self
            .description
            .or(inferred_description)
            .unwrap_or_default();

        Ok(Tool {
            spec: Arc::new(ToolSpec {
                name,
                description,
                parameters,
            }),
            policy: Arc::new(policy),
            handler,
            arg_check: self.arg_check,
        })
    }
}

/// Rejects arguments that pass the declared parameter types but still do not
/// deserialize into `A`, e.g. a negative number for an unsigned field.
fn typed_arg_check<A: DeserializeOwned>() -> ArgCheck {
    Arc::new(|args: &Map<String, Value>| {
        serde_json::from_value::<A>(Value::Object(args.clone()))
            .map(drop)
            .map_err(|e| format!("Invalid arguments: {}", e))
    })
}
