use crate::agent::{ContextBuilder, ToolRegistry};
use crate::error::PoolError;
use crate::state::{AgentProfile, State};
use crate::tools::{AttemptRecord, Tool};
use crate::traits::{ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, ToolCall};
use futures_util::StreamExt;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
const DEFAULT_MAX_HISTORY: usize = 50;

const TOOL_CALL_OPEN_TAG: &str = "<tool_call>";
const TOOL_CALL_CLOSE_TAG: &str = "</tool_call>";

/// Receives output fragments while a turn is streaming.
pub type FragmentSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// What one agent turn produced.
#[derive(Debug, Clone, Default)]
pub struct AgentTurn {
    pub output: String,
    /// Names of the tools called during the turn, in call order.
    pub tools_used: Vec<String>,
    /// Tool attempt records, empty unless tracing is enabled for the agent.
    pub trace: Vec<AttemptRecord>,
}

/// A named persona backed by a model and a set of tools.
#[derive(Clone)]
pub struct Agent {
    name: String,
    description: String,
    persona: String,
    model: Option<Arc<dyn Provider>>,
    tools: ToolRegistry,
    tracing: Option<bool>,
    default_tracing: bool,
    max_tool_rounds: usize,
    max_history: usize,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("model", &self.model.as_ref().map(|m| m.model_name().to_string()))
            .field("tools", &self.tools.names())
            .field("tracing", &self.tracing)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    pub fn model(&self) -> Option<&Arc<dyn Provider>> {
        self.model.as_ref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The flag set on the agent itself, if any.
    pub fn tracing(&self) -> Option<bool> {
        self.tracing
    }

    /// Whether tool attempts are recorded: the agent's own flag, else the pool default.
    pub fn tracing_enabled(&self) -> bool {
        self.tracing.unwrap_or(self.default_tracing)
    }

    pub fn max_tool_rounds(&self) -> usize {
        self.max_tool_rounds
    }

    pub fn profile(&self) -> AgentProfile {
        AgentProfile {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    pub(crate) fn resolve_defaults(&mut self, model: Option<&Arc<dyn Provider>>, tracing: bool) {
        if self.model.is_none() {
            self.model = model.cloned();
        }
        self.default_tracing = tracing;
    }

    pub async fn run(&self, state: &State) -> Result<AgentTurn, PoolError> {
        self.run_with_instructions(state, None, None).await
    }

    pub async fn run_streaming(
        &self,
        state: &State,
        on_fragment: FragmentSink<'_>,
    ) -> Result<AgentTurn, PoolError> {
        self.run_with_instructions(state, None, Some(on_fragment))
            .await
    }

    pub(crate) async fn run_with_instructions(
        &self,
        state: &State,
        instructions: Option<&str>,
        on_fragment: Option<FragmentSink<'_>>,
    ) -> Result<AgentTurn, PoolError> {
        let Some(model) = self.model.as_ref() else {
            return Err(self.fail(anyhow::anyhow!(
                "no model configured and the pool has no default model"
            )));
        };

        let context = ContextBuilder::new(&self.name)
            .with_description(&self.description)
            .with_persona(&self.persona)
            .with_tool_specs(self.tools.get_specs())
            .with_max_history(self.max_history);
        let mut messages = context.build_messages(state, instructions);
        let specs = self.tools.get_specs();
        let tracing = self.tracing_enabled();

        let mut turn = AgentTurn::default();
        let mut last_text = String::new();

        for round in 0..self.max_tool_rounds {
            let request = ChatRequest {
                messages: &messages,
                tools: if specs.is_empty() { None } else { Some(specs.as_slice()) },
            };

            let response = match on_fragment {
                Some(sink) => self.stream_response(model.as_ref(), request, sink).await,
                None => model.chat(request).await,
            }
            .map_err(|e| self.fail(e))?;

            let (assistant_text, tool_calls) = if response.has_tool_calls() {
                (response.text_or_empty().to_string(), response.tool_calls)
            } else if let Some(text) = &response.text {
                parse_tool_calls_fallback(text)
            } else {
                debug!(agent = %self.name, round, "model returned no content");
                return Ok(turn);
            };

            if tool_calls.is_empty() {
                turn.output = assistant_text;
                return Ok(turn);
            }

            if !assistant_text.is_empty() {
                last_text = assistant_text.clone();
            }
            messages.push(ChatMessage::assistant_with_tool_calls(
                assistant_text,
                tool_calls.clone(),
            ));

            for call in tool_calls {
                let content = match serde_json::from_str::<Value>(&call.arguments) {
                    Ok(args) => {
                        if self.tools.contains(&call.name) {
                            turn.tools_used.push(call.name.clone());
                        }
                        let invocation = self
                            .tools
                            .execute(&call.name, args, state.data(), tracing)
                            .await?;
                        turn.trace.extend(invocation.trace);
                        invocation.output.to_content()
                    }
                    Err(e) => {
                        warn!(agent = %self.name, tool = %call.name, "unparseable tool arguments: {}", e);
                        format!("Error: failed to parse arguments for {}: {}", call.name, e)
                    }
                };
                messages.push(ChatMessage::tool_result(call.id, content));
            }
        }

        warn!(
            agent = %self.name,
            rounds = self.max_tool_rounds,
            "tool round limit reached before a final answer"
        );
        turn.output = last_text;
        Ok(turn)
    }

    async fn stream_response(
        &self,
        model: &dyn Provider,
        request: ChatRequest<'_>,
        sink: FragmentSink<'_>,
    ) -> anyhow::Result<ChatResponse> {
        let mut events = model.chat_stream(request).await?;
        let mut response = ChatResponse::default();
        let mut text = String::new();

        while let Some(event) = events.next().await {
            match event {
                ProviderEvent::Token(token) => {
                    sink(&token);
                    text.push_str(&token);
                }
                ProviderEvent::ToolCall(call) => response.tool_calls.push(call),
                ProviderEvent::Done => break,
            }
        }

        if !text.is_empty() {
            response.text = Some(text);
        }
        Ok(response)
    }

    fn fail(&self, source: anyhow::Error) -> PoolError {
        PoolError::Agent {
            agent: self.name.clone(),
            source,
        }
    }
}

pub struct AgentBuilder {
    name: String,
    description: String,
    persona: String,
    model: Option<Arc<dyn Provider>>,
    tools: Vec<Tool>,
    tracing: Option<bool>,
    max_tool_rounds: usize,
    max_history: usize,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            persona: String::new(),
            model: None,
            tools: vec![],
            tracing: None,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn model(mut self, model: Arc<dyn Provider>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn tracing(mut self, enabled: bool) -> Self {
        self.tracing = Some(enabled);
        self
    }

    pub fn max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    pub fn build(self) -> Result<Agent, PoolError> {
        if self.name.trim().is_empty() {
            return Err(PoolError::config("agent name must not be empty"));
        }
        let tools = ToolRegistry::from_tools(self.tools).map_err(|e| match e {
            PoolError::Configuration(message) => {
                PoolError::Configuration(format!("agent '{}': {}", self.name, message))
            }
            other => other,
        })?;

        Ok(Agent {
            name: self.name,
            description: self.description,
            persona: self.persona,
            model: self.model,
            tools,
            tracing: self.tracing,
            default_tracing: false,
            max_tool_rounds: self.max_tool_rounds,
            max_history: self.max_history,
        })
    }
}

/// Extracts `<tool_call>{json}</tool_call>` blocks from plain model text.
pub(crate) fn parse_tool_calls_fallback(response: &str) -> (String, Vec<ToolCall>) {
    let mut text_parts = Vec::new();
    let mut calls = Vec::new();
    let mut remaining = response;

    while let Some(start) = remaining.find(TOOL_CALL_OPEN_TAG) {
        let before = &remaining[..start];
        if !before.trim().is_empty() {
            text_parts.push(before.trim().to_string());
        }

        let after_open = &remaining[start + TOOL_CALL_OPEN_TAG.len()..];
        let Some(close_idx) = after_open.find(TOOL_CALL_CLOSE_TAG) else {
            debug!("Dropping unterminated {} block", TOOL_CALL_OPEN_TAG);
            remaining = "";
            break;
        };
        let inner = &after_open[..close_idx];
        calls.extend(extract_json_values(inner).iter().filter_map(parse_tool_call_value));
        remaining = &after_open[close_idx + TOOL_CALL_CLOSE_TAG.len()..];
    }

    if !remaining.trim().is_empty() {
        text_parts.push(remaining.trim().to_string());
    }

    (text_parts.join("\n"), calls)
}

fn extract_json_values(text: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start
                        && let Ok(value) = serde_json::from_str::<Value>(&text[s..=i])
                    {
                        values.push(value);
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }

    values
}

fn parse_tool_call_value(value: &Value) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = value.get("arguments")?;
    let arguments_str = serde_json::to_string(arguments).ok()?;
    let digest = md5::compute(format!("{}:{}", name, arguments_str).as_bytes());

    Some(ToolCall {
        id: format!("call_{:x}", digest),
        name,
        arguments: arguments_str,
    })
}
