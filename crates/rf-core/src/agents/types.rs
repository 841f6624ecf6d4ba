//! Agent task types and the invoker trait
//!
//! The workflow never talks to a model directly. It hands an [`AgentTask`] to
//! an [`AgentInvoker`] and gets back an [`AgentOutput`]: raw text, optionally
//! with a structured payload the backend already parsed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::documents::AttachedDocument;
use crate::Result;

/// Unique identifier for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

/// Which agent a task is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Researcher,
    Reviewer,
    Synthesizer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::Reviewer => "reviewer",
            Self::Synthesizer => "synthesizer",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work for an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub role: AgentRole,
    /// What the agent is asked to do
    pub description: String,
    /// Named inputs (topic, current_year, feedback, ...)
    pub inputs: BTreeMap<String, String>,
    /// Reference documents supplied with the run
    pub documents: Vec<AttachedDocument>,
}

impl AgentTask {
    pub fn new(role: AgentRole, description: impl Into<String>) -> Self {
        Self {
            id: TaskId::default(),
            role,
            description: description.into(),
            inputs: BTreeMap::new(),
            documents: vec![],
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_documents(mut self, documents: Vec<AttachedDocument>) -> Self {
        self.documents = documents;
        self
    }

    pub fn input(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).map(String::as_str)
    }
}

/// What an agent produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// The raw text of the response
    pub raw: String,
    /// Structured payload, when the backend returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

impl AgentOutput {
    pub fn text(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            structured: None,
        }
    }

    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            raw: value.to_string(),
            structured: Some(value),
        }
    }
}

/// Runs a task with an agent. May fail; rate-limit failures should be
/// reported as [`crate::Error::QuotaExceeded`] or carry a quota marker.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, task: AgentTask) -> Result<AgentOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = AgentTask::new(AgentRole::Researcher, "Research the topic")
            .with_input("topic", "graph neural networks")
            .with_input("current_year", "2026");
        assert_eq!(task.input("topic"), Some("graph neural networks"));
        assert_eq!(task.input("feedback"), None);
        assert!(task.documents.is_empty());
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = AgentTask::new(AgentRole::Reviewer, "a");
        let b = AgentTask::new(AgentRole::Reviewer, "b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_structured_output_keeps_raw_text() {
        let output = AgentOutput::structured(serde_json::json!({"valid": true}));
        assert_eq!(output.raw, r#"{"valid":true}"#);
        assert!(output.structured.is_some());
    }

    #[test]
    fn test_role_names() {
        assert_eq!(AgentRole::Synthesizer.to_string(), "synthesizer");
        let json = serde_json::to_string(&AgentRole::Reviewer).unwrap();
        assert_eq!(json, r#""reviewer""#);
    }
}
