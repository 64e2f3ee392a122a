//! Tool registry for local data lookups the coach can request mid-turn.
//!
//! Each tool declares a JSON Schema for its parameters so the registry can
//! emit OpenAI-format function definitions. Dispatch never fails: unknown
//! names and execution errors come back as in-band error payloads.

pub mod progress;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::ToolError;
use crate::habits::HabitBook;

pub use progress::{
    register_builtin_tools, HabitProgressTool, LeadershipScoresTool, TasksTodayTool,
};

/// The result of executing a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolOutput {
    /// Successful text output (markdown reports)
    Text(String),
    /// Successful structured output
    Json(Value),
    /// Recovered failure, already shaped as the payload the model sees
    Error(Value),
}

impl ToolOutput {
    /// Convert to the tool message content. Never empty.
    pub fn to_llm_string(&self) -> String {
        match self {
            ToolOutput::Text(s) if s.trim().is_empty() => "(no output)".to_string(),
            ToolOutput::Text(s) => s.clone(),
            ToolOutput::Json(v) => {
                serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
            }
            ToolOutput::Error(v) => v.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutput::Text(_) | ToolOutput::Json(_))
    }
}

/// Context passed to tools during execution
pub struct ToolContext {
    pub book: Arc<HabitBook>,
    /// Calendar day the tool treats as "today"
    pub today: NaiveDate,
}

/// A read-only view over local data, callable by the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used in function-calling (e.g., "get_habit_progress")
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// OpenAI-format function definition for LLM function-calling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// OpenAI-format tool definition (wraps FunctionDef)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, usually `{}`
    pub arguments: String,
}

/// Result of one tool call, ready to feed back to the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub output: ToolOutput,
}

impl ToolResult {
    pub fn content(&self) -> String {
        self.output.to_llm_string()
    }
}

/// Ordered registry of tools; declaration order is registration order.
pub struct ToolRegistry {
    tools: RwLock<Vec<Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(Vec::new()),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name in place.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let mut tools = self.tools.write().await;
        tracing::info!("Registered tool: {}", tool.name());
        match tools.iter().position(|t| t.name() == tool.name()) {
            Some(idx) => tools[idx] = tool,
            None => tools.push(tool),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .await
            .iter()
            .find(|t| t.name() == name)
            .cloned()
    }

    pub async fn list_names(&self) -> Vec<String> {
        self.tools
            .read()
            .await
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// OpenAI-format definitions for every registered tool.
    pub async fn tool_definitions(&self) -> Vec<ToolDef> {
        self.tools
            .read()
            .await
            .iter()
            .map(|tool| ToolDef {
                tool_type: "function".to_string(),
                function: FunctionDef {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                },
            })
            .collect()
    }

    /// Execute one call. Always yields exactly one result for the call's id.
    pub async fn execute_call(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let output = match self.try_execute(call, ctx).await {
            Ok(output) => output,
            Err(err) => {
                match &err {
                    ToolError::UnknownTool(name) => {
                        tracing::warn!("Model requested unknown tool '{}'", name)
                    }
                    ToolError::Execution { tool, source } => {
                        tracing::warn!("Tool '{}' failed: {:#}", tool, source)
                    }
                }
                ToolOutput::Error(err.to_payload())
            }
        };

        ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            output,
        }
    }

    async fn try_execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .get(&call.name)
            .await
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        let params = parse_arguments(&call.arguments);
        tool.execute(params, ctx)
            .await
            .map_err(|source| ToolError::Execution {
                tool: call.name.clone(),
                source,
            })
    }

    /// Execute calls sequentially, preserving request order.
    pub async fn execute_calls(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute_call(call, ctx).await);
        }
        results
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Failed to parse tool arguments as JSON: {}", e);
        json!({})
    })
}
