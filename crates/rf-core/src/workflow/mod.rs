//! Research workflow
//!
//! The state machine ([`ResearchFlow`]), verdict extraction, the artifacts a
//! run writes, and the pool and registry that run it in the background.

pub mod artifacts;
pub mod engine;
pub mod pool;
pub mod registry;
pub mod state;
pub mod verdict;

pub use artifacts::ArtifactWriter;
pub use engine::{CancelToken, FlowSettings, ResearchFlow, RunOutcome, RunReport};
pub use pool::{RunHandle, RunRequest, WorkerPool};
pub use registry::{RunRegistry, RunStatus, RunSummary};
pub use state::{RunId, RunState, Stage};
pub use verdict::{Assessment, Verdict};
