//! Run state and stage identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::documents::AttachedDocument;

/// Identifier of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Position of a run in the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Generating,
    Evaluating,
    RetryWait,
    Synthesizing,
    MaxRetryFailed,
    Completed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MaxRetryFailed | Self::Completed)
    }
}

/// State of one run. Owned by the engine driving it; never shared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub id: RunId,
    pub topic: String,
    pub current_year: String,
    /// Latest draft; overwritten every generation
    pub research_result: String,
    /// Why the previous draft was rejected
    pub feedback: Option<String>,
    /// Verdict of the most recent evaluation
    pub valid: bool,
    /// Completed evaluations so far
    pub retry_count: u32,
    pub attached_documents: Vec<AttachedDocument>,
    pub final_report: Option<String>,
}

impl RunState {
    pub fn new(topic: impl Into<String>, attached_documents: Vec<AttachedDocument>) -> Self {
        Self::with_id(RunId::new(), topic, attached_documents)
    }

    pub fn with_id(
        id: RunId,
        topic: impl Into<String>,
        attached_documents: Vec<AttachedDocument>,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            current_year: chrono::Utc::now().format("%Y").to_string(),
            research_result: String::new(),
            feedback: None,
            valid: false,
            retry_count: 0,
            attached_documents,
            final_report: None,
        }
    }

    /// 1-based number of the iteration in progress
    pub fn iteration(&self) -> u32 {
        self.retry_count + 1
    }
}
