//! Conversation orchestrator: one user turn against the remote model.
//!
//! A turn is at most two round-trips. The first request carries the tool
//! declarations; if the reply asks for tools they are dispatched in order and
//! a second request (without tools) produces the final text. Tool calls in the
//! second reply are never dispatched.

use std::sync::Arc;

use chrono::{Local, NaiveDate};

use crate::error::ChatError;
use crate::habits::HabitBook;
use crate::llm_client::{AssistantReply, ChatCompletionRequest, ChatTransport, LlmToolCall, Message};
use crate::tools::{ToolCall, ToolContext, ToolRegistry, ToolResult};

pub const SYSTEM_PROMPT: &str = "You are Jocko Willink. Speak in first person as Jocko texting the user directly. \
Format replies as a short text message: 1–3 tight sentences, no preamble, no bullet points. \
Be terse, direct, disciplined, and motivating; use imperative voice. \
Use the user's habit data and leadership scores when helpful; call tools if needed to fetch the latest local progress. \
Do not fabricate data.";

/// Synthetic user prompt for unprompted daily/refresh messages.
pub const DAILY_PROMPT: &str = "Send me a short text as Jocko: direct, disciplined, motivating. \
Use my current habits and leadership scores; call tools if helpful to fetch the last 7 days. \
Keep it punchy: 1–3 short sentences, no preamble.";

/// Tool-call rounds dispatched per turn.
pub const MAX_TOOL_ROUNDS: usize = 1;

/// Caller-supplied credential plus the attribution title for this kind of turn.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub title: String,
}

impl Credentials {
    pub fn new(api_key: Option<String>, title: impl Into<String>) -> Self {
        Self {
            api_key,
            title: title.into(),
        }
    }

    fn key(&self) -> Result<&str, ChatError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(ChatError::missing_credential)
    }
}

/// Everything a completed turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Final assistant text, possibly empty
    pub final_text: String,
    /// Messages to append to the caller's history, in order
    pub transcript: Vec<Message>,
    pub tool_results: Vec<ToolResult>,
    /// Tool calls requested by the follow-up reply; left un-dispatched
    pub undispatched_calls: Vec<LlmToolCall>,
}

pub struct Orchestrator {
    transport: Arc<dyn ChatTransport>,
    registry: Arc<ToolRegistry>,
    book: Arc<HabitBook>,
    model: String,
    temperature: f32,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        registry: Arc<ToolRegistry>,
        book: Arc<HabitBook>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            transport,
            registry,
            book,
            model: model.into(),
            temperature,
        }
    }

    pub fn book(&self) -> &Arc<HabitBook> {
        &self.book
    }

    /// Run one turn with "today" taken from the local clock.
    pub async fn converse(
        &self,
        history: &[Message],
        user_text: &str,
        credentials: &Credentials,
    ) -> Result<TurnOutcome, ChatError> {
        let today = Local::now().date_naive();
        self.converse_on(today, history, user_text, credentials).await
    }

    pub async fn converse_on(
        &self,
        today: NaiveDate,
        history: &[Message],
        user_text: &str,
        credentials: &Credentials,
    ) -> Result<TurnOutcome, ChatError> {
        let api_key = credentials.key()?;

        let user_message = Message::user(user_text);
        let mut messages = Vec::with_capacity(history.len() + 4);
        messages.push(Message::system(SYSTEM_PROMPT));
        messages.extend_from_slice(history);
        messages.push(user_message.clone());

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            tools: Some(self.registry.tool_definitions().await),
            tool_choice: Some("auto".to_string()),
            temperature: self.temperature,
        };

        tracing::debug!(
            "Chat round 1: {} messages, model {}",
            request.messages.len(),
            self.model
        );
        let first = self
            .transport
            .complete(&request, api_key, &credentials.title)
            .await?;

        if first.tool_calls.is_empty() {
            let final_text = first.content_or_empty();
            return Ok(TurnOutcome {
                transcript: vec![user_message, Message::assistant(final_text.clone())],
                final_text,
                tool_results: Vec::new(),
                undispatched_calls: Vec::new(),
            });
        }

        let ctx = ToolContext {
            book: self.book.clone(),
            today,
        };
        let (round_messages, tool_results) = self.dispatch_round(&first, &ctx).await;

        let mut messages = request.messages;
        messages.extend(round_messages.iter().cloned());

        let follow_up = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            tools: None,
            tool_choice: None,
            temperature: self.temperature,
        };

        tracing::debug!("Chat round 2: {} messages", follow_up.messages.len());
        let second = self
            .transport
            .complete(&follow_up, api_key, &credentials.title)
            .await?;

        if !second.tool_calls.is_empty() {
            tracing::debug!(
                "Follow-up requested {} more tool call(s); not dispatched (max {} round)",
                second.tool_calls.len(),
                MAX_TOOL_ROUNDS
            );
        }

        let final_text = second.content_or_empty();
        let mut transcript = Vec::with_capacity(round_messages.len() + 2);
        transcript.push(user_message);
        transcript.extend(round_messages);
        transcript.push(Message::assistant(final_text.clone()));

        Ok(TurnOutcome {
            final_text,
            transcript,
            tool_results,
            undispatched_calls: second.tool_calls,
        })
    }

    /// Dispatch one reply's tool calls. Returns the assistant tool-call
    /// message followed by one tool message per call, plus the raw results.
    async fn dispatch_round(
        &self,
        reply: &AssistantReply,
        ctx: &ToolContext,
    ) -> (Vec<Message>, Vec<ToolResult>) {
        let calls: Vec<ToolCall> = reply.tool_calls.iter().map(ToolCall::from).collect();
        for call in &calls {
            tracing::debug!("Dispatching tool '{}' ({})", call.name, call.id);
        }
        let results = self.registry.execute_calls(&calls, ctx).await;

        let mut messages = Vec::with_capacity(results.len() + 1);
        messages.push(Message::assistant_with_calls(
            reply.content_or_empty(),
            reply.tool_calls.clone(),
        ));
        messages.extend(results.iter().map(Message::tool_result));
        (messages, results)
    }
}
