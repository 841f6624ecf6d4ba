//! Progress event types
//!
//! Defines the JSON shape pushed to every observer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identity of the stage emitting an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    Researcher,
    Reviewer,
    Synthesizer,
    System,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "Researcher",
            Self::Reviewer => "Reviewer",
            Self::Synthesizer => "Synthesizer",
            Self::System => "System",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed status vocabulary (case-sensitive on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Started,
    Thinking,
    Working,
    Done,
    Error,
    Retry,
    Approved,
    Rejected,
    Completed,
    Connected,
    Ping,
    Pong,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Thinking => "thinking",
            Self::Working => "working",
            Self::Done => "done",
            Self::Error => "error",
            Self::Retry => "retry",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Connected => "connected",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    /// Display icon used in log lines and UIs
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Started => "🚀",
            Self::Thinking => "🤔",
            Self::Working => "⚙️",
            Self::Done => "✅",
            Self::Error => "❌",
            Self::Retry => "🔄",
            Self::Approved => "✓",
            Self::Rejected => "✗",
            _ => "📡",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status update pushed to observers.
///
/// Events are immutable once emitted. `timestamp` may be left empty by the
/// emitter; the hub fills it in before delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub agent: AgentKind,
    pub status: AgentStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProgressEvent {
    pub fn new(agent: AgentKind, status: AgentStatus, message: impl Into<String>) -> Self {
        Self {
            agent,
            status,
            message: message.into(),
            details: None,
            iteration: None,
            timestamp: None,
        }
    }

    pub fn system(status: AgentStatus, message: impl Into<String>) -> Self {
        Self::new(AgentKind::System, status, message)
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Add one key to the details payload
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.as_ref().and_then(|d| d.get(key))
    }

    /// Stamp with the current time unless already stamped
    pub fn stamped(mut self) -> Self {
        self.timestamp.get_or_insert_with(Utc::now);
        self
    }

    /// One-line rendering for logs
    pub fn log_line(&self) -> String {
        format!(
            "{} [{}] {}: {}",
            self.status.icon(),
            self.agent,
            self.status.as_str().to_uppercase(),
            self.message
        )
    }
}
