use crate::traits::{ChatMessage, ChatRequest, ChatResponse, Provider, ToolCall, ToolSpec};
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        let tool_calls: Vec<WireCall<'a>> = message
            .tool_calls
            .iter()
            .flatten()
            .map(WireCall::from)
            .collect();
        // An assistant message that only calls tools carries no content.
        let content = if message.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(message.content.as_str())
        };

        Self {
            role: &message.role,
            content,
            tool_calls,
            tool_call_id: message.tool_call_id.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireCall<'a> {
    id: &'a str,
    r#type: &'static str,
    function: WireFunction<'a>,
}

impl<'a> From<&'a ToolCall> for WireCall<'a> {
    fn from(call: &'a ToolCall) -> Self {
        Self {
            id: &call.id,
            r#type: "function",
            function: WireFunction {
                name: &call.name,
                arguments: &call.arguments,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    r#type: &'static str,
    function: WireToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: Value,
}

impl<'a> From<&'a ToolSpec> for WireTool<'a> {
    fn from(spec: &'a ToolSpec) -> Self {
        Self {
            r#type: "function",
            function: WireToolFunction {
                name: &spec.name,
                description: &spec.description,
                parameters: spec.parameters_schema(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireReply,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireReplyCall>,
}

#[derive(Debug, Deserialize)]
struct WireReplyCall {
    id: String,
    function: WireReplyFunction,
}

#[derive(Debug, Deserialize)]
struct WireReplyFunction {
    name: String,
    arguments: String,
}

impl From<WireReply> for ChatResponse {
    fn from(reply: WireReply) -> Self {
        Self {
            text: reply.content,
            tool_calls: reply
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
        }
    }
}

/// Pulls `error.message` out of an error body, falling back to the raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f64>,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn build_request<'a>(&'a self, request: ChatRequest<'a>) -> WireRequest<'a> {
        WireRequest {
            model: &self.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request
                .tools
                .unwrap_or_default()
                .iter()
                .map(WireTool::from)
                .collect(),
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, messages = request.messages.len(), "chat request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.build_request(request))
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} returned {}: {}", url, status, api_error_message(&body));
        }

        let reply = response
            .json::<WireResponse>()
            .await
            .context("malformed chat completion")?
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("chat completion had no choices"))?
            .message;

        let response = ChatResponse::from(reply);
        let has_text = response.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        if !has_text && !response.has_tool_calls() {
            bail!("model {} returned neither text nor tool calls", self.model);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ParamSpec, ParamType};

    #[test]
    fn request_carries_history_and_tool_schema() {
        let provider = OpenAIProvider::new("key")
            .with_model("gpt-4o-mini")
            .with_base_url("http://localhost:8080/v1/")
            .with_temperature(0.2);
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::assistant_with_tool_calls(
                "",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "search".into(),
                    arguments: "{}".into(),
                }],
            ),
            ChatMessage::tool_result("call_1".into(), "found"),
        ];
        let tools = vec![ToolSpec {
            name: "search".into(),
            description: "Search docs".into(),
            parameters: vec![ParamSpec::required("query", ParamType::String)],
        }];

        let body = serde_json::to_value(provider.build_request(ChatRequest {
            messages: &messages,
            tools: Some(tools.as_slice()),
        }))
        .unwrap();

        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][1]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(body["messages"][2]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["parameters"]["required"][0], "query");
    }

    #[test]
    fn empty_tool_list_is_omitted() {
        let provider = OpenAIProvider::new("key");
        let messages = vec![ChatMessage::user("hi")];
        let tools: Vec<ToolSpec> = vec![];
        let body = serde_json::to_value(provider.build_request(ChatRequest {
            messages: &messages,
            tools: Some(tools.as_slice()),
        }))
        .unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("temperature").is_none());
        assert_eq!(provider.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn tool_only_assistant_message_omits_content() {
        let provider = OpenAIProvider::new("key");
        let messages = vec![ChatMessage::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "search".into(),
                arguments: "{}".into(),
            }],
        )];
        let body = serde_json::to_value(provider.build_request(ChatRequest {
            messages: &messages,
            tools: None,
        }))
        .unwrap();
        assert!(body["messages"][0].get("content").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn reply_converts_into_chat_response() {
        let reply: WireResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":null,"tool_calls":[
                {"id":"c1","type":"function","function":{"name":"search","arguments":"{\"q\":1}"}}
            ]}}]}"#,
        )
        .unwrap();
        let response = ChatResponse::from(reply.choices.into_iter().next().unwrap().message);
        assert!(response.text.is_none());
        assert_eq!(response.tool_calls[0].name, "search");
        assert_eq!(response.tool_calls[0].arguments, r#"{"q":1}"#);
    }

    #[test]
    fn api_errors_prefer_the_structured_message() {
        assert_eq!(
            api_error_message(r#"{"error":{"message":"bad key","type":"auth"}}"#),
            "bad key"
        );
        assert_eq!(api_error_message(" upstream down \n"), "upstream down");
    }
}
