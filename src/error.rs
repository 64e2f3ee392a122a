//! Error taxonomy for a chat turn.
//!
//! Configuration and request errors end the turn and reach the caller.
//! Tool errors never do: the registry folds them into the tool message so the
//! follow-up call still sees one result per request.

use serde_json::{json, Value};
use thiserror::Error;

/// Terminal failure of one `converse` invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// Missing credential. Raised before any network call.
    #[error("configuration: {0}")]
    Configuration(String),
    /// Non-2xx response or transport failure on either round-trip.
    #[error("request failed: {0}")]
    Request(String),
}

impl ChatError {
    pub fn missing_credential() -> Self {
        ChatError::Configuration(
            "Missing OpenRouter API key. Set it before chatting.".to_string(),
        )
    }

    /// Text suitable for showing to the user as-is.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Configuration(msg) => msg.clone(),
            ChatError::Request(msg) if msg.trim().is_empty() => "Request failed".to_string(),
            ChatError::Request(msg) => msg.clone(),
        }
    }
}

/// Failure inside the tool registry; recovered locally.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool")]
    UnknownTool(String),
    #[error("tool execution failed")]
    Execution {
        tool: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ToolError {
    /// In-band payload sent back to the model in place of a result.
    pub fn to_payload(&self) -> Value {
        match self {
            ToolError::UnknownTool(_) => json!({ "error": "unknown tool" }),
            ToolError::Execution { source, .. } => json!({
                "error": "tool execution failed",
                "detail": format!("{:#}", source),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_payload_is_exact() {
        let payload = ToolError::UnknownTool("get_weather".to_string()).to_payload();
        assert_eq!(payload, json!({ "error": "unknown tool" }));
    }

    #[test]
    fn execution_payload_carries_detail() {
        let err = ToolError::Execution {
            tool: "get_habit_progress".to_string(),
            source: anyhow::anyhow!("store offline"),
        };
        let payload = err.to_payload();
        assert_eq!(payload["error"], "tool execution failed");
        assert!(payload["detail"].as_str().unwrap().contains("store offline"));
    }

    #[test]
    fn empty_request_error_falls_back_to_generic_text() {
        assert_eq!(ChatError::Request(String::new()).user_message(), "Request failed");
        assert_eq!(
            ChatError::Request("HTTP 500".to_string()).user_message(),
            "HTTP 500"
        );
    }
}
