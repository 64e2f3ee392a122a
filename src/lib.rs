//! Habit and leadership tracker backend with a tool-calling AI coach.

pub mod catalog;
pub mod config;
pub mod conversation;
pub mod error;
pub mod habits;
pub mod llm_client;
pub mod runtime;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod tools;

pub use conversation::{Credentials, Orchestrator, TurnOutcome};
pub use error::{ChatError, ToolError};
pub use scheduler::{CoachEvent, TriggerScheduler};
