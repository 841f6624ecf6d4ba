//! Agent invocation
//!
//! The workflow depends only on the [`AgentInvoker`] trait. Two
//! implementations ship with the crate:
//!
//! - [`crate::llm::LlmInvoker`]: backed by an LLM HTTP API
//! - [`ScriptedInvoker`]: replays canned replies, for tests and demos

pub mod scripted;
pub mod types;

pub use scripted::{ScriptedInvoker, ScriptedReply};
pub use types::{AgentInvoker, AgentOutput, AgentRole, AgentTask, TaskId};
