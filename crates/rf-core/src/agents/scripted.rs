//! Scripted invoker
//!
//! An in-memory [`AgentInvoker`] that replays canned replies per role and
//! records every task it receives. Used for testing and offline demos.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use super::types::{AgentInvoker, AgentOutput, AgentRole, AgentTask};
use crate::{Error, Result};

/// One canned reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Output(AgentOutput),
    /// Fail with a quota error
    Quota(String),
    /// Fail with a generic agent error
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedInvoker {
    replies: Mutex<HashMap<AgentRole, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<AgentTask>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next call addressed to `role`
    pub fn push(&self, role: AgentRole, reply: ScriptedReply) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(role)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn push_text(&self, role: AgentRole, text: impl Into<String>) -> &Self {
        self.push(role, ScriptedReply::Output(AgentOutput::text(text)))
    }

    /// Every task received so far, in call order
    pub fn calls(&self) -> Vec<AgentTask> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_for(&self, role: AgentRole) -> Vec<AgentTask> {
        self.calls()
            .into_iter()
            .filter(|task| task.role == role)
            .collect()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, task: AgentTask) -> Result<AgentOutput> {
        let role = task.role;
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&role)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(ScriptedReply::Output(output)) => Ok(output),
            Some(ScriptedReply::Quota(msg)) => Err(Error::QuotaExceeded(msg)),
            Some(ScriptedReply::Fail(msg)) => Err(Error::Agent(msg)),
            None => Err(Error::Agent(format!("no scripted reply left for {}", role))),
        }
    }
}
