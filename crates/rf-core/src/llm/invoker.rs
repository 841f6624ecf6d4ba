//! LLM-backed agent invoker
//!
//! Turns an [`AgentTask`] into a single-turn completion. Each role gets a
//! short system prompt; the task description, its named inputs, and any
//! attached documents form the user message.

use async_trait::async_trait;
use std::fmt::Write as _;
use tracing::debug;

use super::client::LlmClient;
use crate::agents::{AgentInvoker, AgentOutput, AgentRole, AgentTask};
use crate::config::LlmConfig;
use crate::Result;

/// Per-document character budget when inlining text documents
const DOCUMENT_CHAR_BUDGET: usize = 40_000;

const RESEARCHER_PROMPT: &str = "You are a meticulous research analyst. \
Find and summarise the most relevant, credible sources on the topic. \
For each source give the title, authors, year, and a short explanation of its \
methodology and findings. Treat attached documents as primary sources.";

const REVIEWER_PROMPT: &str = "You are a demanding but fair research reviewer. \
Judge whether the report is relevant, well sourced, and clearly explained. \
Answer with a JSON object only: \
{\"approved\": bool, \"rejection_reasons\": [string], \"summary\": string}.";

const SYNTHESIZER_PROMPT: &str = "You are a research synthesizer. \
Write a comprehensive markdown report from the approved research: executive \
summary, introduction, main findings, analysis, conclusions, references.";

pub struct LlmInvoker {
    client: LlmClient,
}

impl LlmInvoker {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self::new(LlmClient::new(config)?))
    }

    fn system_prompt(role: AgentRole) -> &'static str {
        match role {
            AgentRole::Researcher => RESEARCHER_PROMPT,
            AgentRole::Reviewer => REVIEWER_PROMPT,
            AgentRole::Synthesizer => SYNTHESIZER_PROMPT,
        }
    }

    async fn render_prompt(task: &AgentTask) -> Result<String> {
        let mut prompt = task.description.clone();

        if !task.inputs.is_empty() {
            prompt.push_str("\n\n## Inputs\n");
            for (key, value) in &task.inputs {
                let _ = write!(prompt, "\n### {}\n{}\n", key, value);
            }
        }

        if !task.documents.is_empty() {
            prompt.push_str("\n\n## Uploaded documents (primary sources)\n");
            for doc in &task.documents {
                let _ = write!(prompt, "\n### {}\n", doc.file_name());
                match doc.read_text(DOCUMENT_CHAR_BUDGET).await? {
                    Some(text) => prompt.push_str(&text),
                    None => prompt.push_str("(binary document, content not inlined)"),
                }
                prompt.push('\n');
            }
        }

        Ok(prompt)
    }
}

#[async_trait]
impl AgentInvoker for LlmInvoker {
    async fn invoke(&self, task: AgentTask) -> Result<AgentOutput> {
        debug!("Invoking {} for task {}", task.role, task.id.as_str());

        let prompt = Self::render_prompt(&task).await?;
        let raw = self
            .client
            .complete(Self::system_prompt(task.role), &prompt)
            .await?;

        // A reviewer answering with bare JSON is handed over already parsed
        let structured = match task.role {
            AgentRole::Reviewer => serde_json::from_str::<serde_json::Value>(raw.trim())
                .ok()
                .filter(serde_json::Value::is_object),
            _ => None,
        };

        Ok(AgentOutput { raw, structured })
    }
}
