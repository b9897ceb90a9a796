use crate::state::{AgentProfile, Message, Role, State};
use crate::traits::{ChatMessage, ToolSpec};
use std::fmt::Write;

const DEFAULT_MAX_HISTORY: usize = 50;

/// Assembles the prompt one agent sees for one turn.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    pub name: String,
    pub description: String,
    pub persona: String,
    pub tool_specs: Vec<ToolSpec>,
    pub max_history: usize,
}

impl ContextBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            persona: String::new(),
            tool_specs: vec![],
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_tool_specs(mut self, tool_specs: Vec<ToolSpec>) -> Self {
        self.tool_specs = tool_specs;
        self
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    pub fn build_system_prompt(&self, peers: &[AgentProfile], instructions: Option<&str>) -> String {
        let mut parts = vec![self.get_identity()];

        if let Some(instructions) = instructions.filter(|i| !i.trim().is_empty()) {
            parts.push(instructions.trim().to_string());
        }
        if let Some(team) = self.get_team_context(peers) {
            parts.push(team);
        }
        if !self.tool_specs.is_empty() {
            parts.push(self.get_tool_instructions());
        }
        parts.push(self.get_runtime_context());

        parts.join("\n\n---\n\n")
    }

    fn get_identity(&self) -> String {
        let mut identity = format!("## Identity\n\nYou are {}.", self.name);
        if !self.description.trim().is_empty() {
            let _ = write!(identity, " {}", self.description.trim());
        }
        if !self.persona.trim().is_empty() {
            let _ = write!(identity, "\n\n{}", self.persona.trim());
        }
        identity
    }

    fn get_team_context(&self, peers: &[AgentProfile]) -> Option<String> {
        let others: Vec<&AgentProfile> = peers.iter().filter(|p| p.name != self.name).collect();
        if others.is_empty() {
            return None;
        }

        let mut team = String::from(
            "## Team\n\nYou share this conversation with other agents. \
             Their messages appear as `[name]: content`.\n\n",
        );
        for peer in others {
            if peer.description.is_empty() {
                let _ = writeln!(team, "- {}", peer.name);
            } else {
                let _ = writeln!(team, "- {}: {}", peer.name, peer.description);
            }
        }
        Some(team)
    }

    fn get_tool_instructions(&self) -> String {
        let mut instructions = String::new();
        instructions.push_str("## Tool Use Protocol\n\n");
        instructions.push_str("To use a tool, wrap a JSON object in <tool_call> tags:\n\n");
        instructions.push_str("```\n<tool_call>\n{\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}\n</tool_call>\n```\n\n");
        instructions.push_str("You may use multiple tool calls in a single response. ");
        instructions.push_str("After tool execution, results are returned to you. ");
        instructions
            .push_str("Continue reasoning with the results until you can give a final answer.\n\n");
        instructions.push_str("### Available Tools\n\n");

        for tool in &self.tool_specs {
            let _ = writeln!(
                instructions,
                "**{}**: {}\nParameters: `{}`\n",
                tool.name,
                tool.description,
                tool.parameters_schema()
            );
        }

        instructions
    }

    fn get_runtime_context(&self) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        format!("## Runtime Context\n\n### Current Time\n{}", timestamp)
    }

    /// Own messages stay `assistant`; everything else is attributed user input.
    pub fn convert_history(&self, history: &[Message]) -> Vec<ChatMessage> {
        let start = history.len().saturating_sub(self.max_history);
        history[start..]
            .iter()
            .map(|msg| match (msg.role, msg.agent_name.as_deref()) {
                (Role::Assistant, Some(agent)) if agent == self.name => {
                    ChatMessage::assistant(msg.content.clone())
                }
                (Role::Assistant, Some(agent)) => {
                    ChatMessage::user(format!("[{}]: {}", agent, msg.content))
                }
                (Role::Assistant, None) => ChatMessage::assistant(msg.content.clone()),
                (Role::User, _) => ChatMessage::user(msg.content.clone()),
            })
            .collect()
    }

    pub fn build_messages(&self, state: &State, instructions: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(
            self.build_system_prompt(state.agents(), instructions),
        )];
        messages.extend(self.convert_history(state.history()));
        messages
    }
}
