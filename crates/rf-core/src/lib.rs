//! rf-core: Research Flow core library
//!
//! Configuration, the progress Broadcast Hub, the agent invoker seam with its
//! LLM backend, and the research → review → synthesis workflow engine.

pub mod agents;
pub mod config;
pub mod documents;
pub mod error;
pub mod llm;
pub mod progress;
pub mod workflow;

pub use agents::{AgentInvoker, AgentOutput, AgentRole, AgentTask, ScriptedInvoker, ScriptedReply};
pub use config::{Config, LlmConfig, LlmProvider, ServerConfig, WorkflowConfig, WsConfig};
pub use documents::{AttachedDocument, DocumentStore};
pub use error::{Error, Result};
pub use llm::{LlmClient, LlmInvoker};
pub use progress::{
    AgentKind, AgentStatus, BroadcastHub, ChannelObserver, Observer, ObserverId, ObserverMessage,
    ProgressEvent,
};
pub use workflow::{
    ResearchFlow, RunHandle, RunId, RunOutcome, RunRegistry, RunReport, RunRequest, RunState,
    RunStatus, RunSummary, WorkerPool,
};
