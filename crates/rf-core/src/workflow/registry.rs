//! Registry of submitted runs
//!
//! Pending and running runs are always kept. Finished runs are pruned oldest
//! first once more than `retention` of them are held.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use tracing::debug;

use super::state::RunId;

/// Finished runs kept by [`RunRegistry::new`]
pub const DEFAULT_RUN_RETENTION: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Public view of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub topic: String,
    pub status: RunStatus,
    /// Evaluations performed, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, RunSummary>>,
    retention: usize,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RUN_RETENTION)
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` finished runs
    pub fn with_retention(retention: usize) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<RunId, RunSummary>> {
        self.runs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, run_id: RunId, topic: &str) -> RunSummary {
        let summary = RunSummary {
            run_id,
            topic: topic.to_string(),
            status: RunStatus::Pending,
            iterations: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };
        self.write().insert(run_id, summary.clone());
        summary
    }

    pub fn mark_running(&self, run_id: RunId) {
        if let Some(run) = self.write().get_mut(&run_id) {
            run.status = RunStatus::Running;
            run.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&self, run_id: RunId, iterations: u32) {
        self.finish(run_id, |run| {
            run.status = RunStatus::Completed;
            run.iterations = Some(iterations);
        });
    }

    pub fn mark_failed(&self, run_id: RunId, iterations: Option<u32>, error: impl Into<String>) {
        let error = error.into();
        self.finish(run_id, |run| {
            run.status = RunStatus::Failed;
            run.iterations = iterations.or(run.iterations);
            run.error = Some(error);
        });
    }

    /// Fail every run still marked running. Returns their ids.
    pub fn fail_running(&self, error: &str) -> Vec<RunId> {
        let mut runs = self.write();
        let now = Utc::now();
        let mut failed = Vec::new();
        for run in runs.values_mut() {
            if run.status == RunStatus::Running {
                run.status = RunStatus::Failed;
                run.completed_at = Some(now);
                run.error = Some(error.to_string());
                failed.push(run.run_id);
            }
        }
        prune(&mut runs, self.retention);
        failed
    }

    pub fn get(&self, run_id: &RunId) -> Option<RunSummary> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
    }

    /// All runs, newest first
    pub fn list(&self) -> Vec<RunSummary> {
        let mut runs: Vec<_> = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.run_id.cmp(&a.run_id)));
        runs
    }

    fn finish(&self, run_id: RunId, f: impl FnOnce(&mut RunSummary)) {
        let mut runs = self.write();
        if let Some(run) = runs.get_mut(&run_id) {
            f(run);
            run.completed_at = Some(Utc::now());
            prune(&mut runs, self.retention);
        }
    }
}

/// Drop the oldest finished runs beyond `retention`
fn prune(runs: &mut HashMap<RunId, RunSummary>, retention: usize) {
    let mut finished: Vec<(DateTime<Utc>, RunId)> = runs
        .values()
        .filter(|run| run.status.is_finished())
        .map(|run| (run.completed_at.unwrap_or(run.created_at), run.run_id))
        .collect();
    if finished.len() <= retention {
        return;
    }

    finished.sort();
    let excess = finished.len() - retention;
    for (_, run_id) in finished.into_iter().take(excess) {
        runs.remove(&run_id);
    }
    debug!("Pruned {} finished run(s) from the registry", excess);
}
