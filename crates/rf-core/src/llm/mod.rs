//! LLM backend
//!
//! HTTP client for the Claude and OpenAI-compatible APIs, and the
//! [`LlmInvoker`] that runs agent tasks through it.

pub mod client;
pub mod invoker;
pub mod types;

pub use client::LlmClient;
pub use invoker::LlmInvoker;
pub use types::{Message, MessageContent, MessagesRequest, MessagesResponse, Usage};
