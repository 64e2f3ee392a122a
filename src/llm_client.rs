//! Remote model client: OpenAI-compatible chat completions with function calling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::tools::{ToolCall, ToolDef, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<LlmToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant message that requested tools; content is kept as sent.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<LlmToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            tool_call_id: Some(result.tool_call_id.clone()),
            name: Some(result.name.clone()),
            ..Self::plain(Role::Tool, result.content())
        }
    }
}

/// Tool call as returned by the LLM (OpenAI format)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: LlmFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String, // JSON string
}

fn default_call_type() -> String {
    "function".to_string()
}

impl From<&LlmToolCall> for ToolCall {
    fn from(call: &LlmToolCall) -> Self {
        ToolCall {
            id: call.id.clone(),
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<LlmToolCall>>,
}

/// First choice of a completion, reduced to what the orchestrator consults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<LlmToolCall>,
}

impl AssistantReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_calls(calls: Vec<LlmToolCall>) -> Self {
        Self {
            content: None,
            tool_calls: calls,
        }
    }

    pub fn content_or_empty(&self) -> String {
        self.content.clone().unwrap_or_default()
    }
}

/// Parse a raw completion body. Missing choices or message read as an empty reply.
pub fn parse_completion(body: &str) -> Result<AssistantReply, ChatError> {
    let completion: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| ChatError::Request(format!("Failed to parse LLM response: {}", e)))?;

    let message = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .unwrap_or_default();

    Ok(AssistantReply {
        content: message.content,
        tool_calls: message.tool_calls.unwrap_or_default(),
    })
}

/// Sends one chat completion request and returns the first choice.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
        credential: &str,
        title: &str,
    ) -> Result<AssistantReply, ChatError>;
}

#[derive(Clone)]
pub struct OpenRouterClient {
    api_url: String,
    referer: Option<String>,
    client: reqwest::Client,
}

impl OpenRouterClient {
    pub fn new(api_url: impl Into<String>, referer: Option<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            referer: referer.filter(|r| !r.trim().is_empty()),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_url)
    }
}

/// OpenRouter attribution headers. The app title is only sent together with a referer.
pub fn attribution_headers(referer: Option<&str>, title: &str) -> Vec<(&'static str, String)> {
    let Some(referer) = referer else {
        return Vec::new();
    };
    let mut headers = vec![("HTTP-Referer", referer.to_string())];
    if !title.is_empty() {
        headers.push(("X-Title", title.to_string()));
    }
    headers
}

#[async_trait]
impl ChatTransport for OpenRouterClient {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
        credential: &str,
        title: &str,
    ) -> Result<AssistantReply, ChatError> {
        let mut req = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", credential))
            .json(request);

        for (name, value) in attribution_headers(self.referer.as_deref(), title) {
            req = req.header(name, value);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ChatError::Request(format!("Failed to send LLM request: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let detail = if body.trim().is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                body
            };
            tracing::warn!("LLM API error {}: {}", status, detail);
            return Err(ChatError::Request(detail));
        }

        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolOutput;

    #[test]
    fn title_travels_only_with_referer() {
        assert!(attribution_headers(None, "DEF Habits - Jocko Chat").is_empty());
        assert_eq!(
            attribution_headers(Some("http://localhost:3000"), "DEF Habits - Jocko Chat"),
            vec![
                ("HTTP-Referer", "http://localhost:3000".to_string()),
                ("X-Title", "DEF Habits - Jocko Chat".to_string()),
            ]
        );
        assert_eq!(
            attribution_headers(Some("http://localhost:3000"), ""),
            vec![("HTTP-Referer", "http://localhost:3000".to_string())]
        );
    }

    #[test]
    fn message_serialization_omits_absent_fields() {
        let json = serde_json::to_value(Message::user("Hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "Hello");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn tool_messages_reference_their_call() {
        let result = ToolResult {
            tool_call_id: "call_123".to_string(),
            name: "get_tasks_today".to_string(),
            output: ToolOutput::Text("## Tasks".to_string()),
        };
        let json = serde_json::to_value(Message::tool_result(&result)).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_123");
        assert_eq!(json["name"], "get_tasks_today");
        assert_eq!(json["content"], "## Tasks");
    }

    #[test]
    fn request_without_tools_skips_tool_fields() {
        let request = ChatCompletionRequest {
            model: "x-ai/grok-code-fast-1".to_string(),
            messages: vec![Message::system("sys")],
            tools: None,
            tool_choice: None,
            temperature: 0.3,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        assert!((json["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn parses_tool_calls_from_first_choice() {
        let body = r#"{
            "choices": [
                {"message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "get_habit_progress", "arguments": "{}"}}
                ]}},
                {"message": {"content": "ignored"}}
            ]
        }"#;
        let reply = parse_completion(body).unwrap();
        assert_eq!(reply.content, None);
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(ToolCall::from(&reply.tool_calls[0]).name, "get_habit_progress");
    }

    #[test]
    fn empty_choices_read_as_empty_reply() {
        let reply = parse_completion(r#"{"choices": []}"#).unwrap();
        assert_eq!(reply.content_or_empty(), "");
        assert!(reply.tool_calls.is_empty());

        let err = parse_completion("<html>").unwrap_err();
        assert!(matches!(err, ChatError::Request(_)));
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let client = OpenRouterClient::new("https://openrouter.ai/api/v1/", None);
        assert_eq!(client.endpoint(), "https://openrouter.ai/api/v1/chat/completions");
    }
}
