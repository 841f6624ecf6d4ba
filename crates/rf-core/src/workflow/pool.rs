//! Worker pool
//!
//! Runs are queued and picked up by a fixed number of workers, each running
//! one run at a time. Submitting returns a [`RunHandle`] right away; the
//! handle can await the result or ask the run to stop.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use super::engine::{CancelToken, ResearchFlow, RunOutcome, RunReport};
use super::registry::RunRegistry;
use super::state::{RunId, RunState};
use crate::documents::AttachedDocument;
use crate::progress::{AgentStatus, ProgressEvent};
use crate::{Error, Result};

/// Recorded for runs cut off by [`WorkerPool::shutdown`]
const INTERRUPTED: &str = "worker pool shut down before the run finished";

/// A request to start a run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub topic: String,
    pub documents: Vec<AttachedDocument>,
}

impl RunRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            documents: vec![],
        }
    }

    pub fn with_documents(mut self, documents: Vec<AttachedDocument>) -> Self {
        self.documents = documents;
        self
    }
}

/// Handle to a submitted run. Dropping it leaves the run going.
pub struct RunHandle {
    run_id: RunId,
    created_at: DateTime<Utc>,
    cancel_tx: watch::Sender<bool>,
    result_rx: oneshot::Receiver<Result<RunReport>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Ask the run to stop at the next stage boundary
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Wait for the run to reach a terminal state
    pub async fn wait(self) -> Result<RunReport> {
        self.result_rx.await.unwrap_or(Err(Error::WorkerUnavailable))
    }
}

struct Job {
    state: RunState,
    cancel: CancelToken,
    reply: oneshot::Sender<Result<RunReport>>,
}

type JobQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>;

pub struct WorkerPool {
    flow: Arc<ResearchFlow>,
    queue_tx: mpsc::UnboundedSender<Job>,
    queue_rx: JobQueue,
    registry: Arc<RunRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Start `size` workers (at least one). Must be called inside a runtime.
    pub fn new(flow: Arc<ResearchFlow>, registry: Arc<RunRegistry>, size: usize) -> Self {
        let size = size.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue_rx: JobQueue = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let workers = (0..size)
            .map(|index| {
                let flow = Arc::clone(&flow);
                let registry = Arc::clone(&registry);
                let queue = Arc::clone(&queue_rx);
                let mut shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    run_worker(index, flow, registry, queue, &mut shutdown_rx).await;
                })
            })
            .collect();

        info!("Worker pool started with {} workers", size);

        Self {
            flow,
            queue_tx,
            queue_rx,
            registry,
            shutdown_tx,
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue a run. Returns as soon as the run is registered.
    pub fn submit(&self, request: RunRequest) -> Result<RunHandle> {
        if self.is_closed() {
            return Err(Error::WorkerUnavailable);
        }

        let state = RunState::new(request.topic, request.documents);
        let run_id = state.id;
        let summary = self.registry.insert(run_id, &state.topic);

        let (cancel_tx, cancel) = CancelToken::pair();
        let (reply, result_rx) = oneshot::channel();

        if self
            .queue_tx
            .send(Job {
                state,
                cancel,
                reply,
            })
            .is_err()
        {
            self.registry
                .mark_failed(run_id, None, Error::WorkerUnavailable.to_string());
            return Err(Error::WorkerUnavailable);
        }

        info!("Queued run {} ({})", run_id, summary.topic);
        Ok(RunHandle {
            run_id,
            created_at: summary.created_at,
            cancel_tx,
            result_rx,
        })
    }

    /// Stop taking work and wait for workers to finish their current run.
    /// Workers still busy once `grace` has elapsed are aborted and their
    /// runs failed. Queued runs are failed.
    pub async fn shutdown(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down worker pool");
        let _ = self.shutdown_tx.send(());

        let workers: Vec<_> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let deadline = Instant::now() + grace;
        let mut aborted = 0;
        for mut handle in workers {
            if timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
            }
        }

        if aborted > 0 {
            warn!("{} worker(s) still busy after {:?}, aborted", aborted, grace);
            for run_id in self.registry.fail_running(INTERRUPTED) {
                self.flow.hub().emit(
                    ProgressEvent::system(
                        AgentStatus::Error,
                        format!("Flow execution error: {}", INTERRUPTED),
                    )
                    .with_detail("run_id", run_id.to_string()),
                );
            }
        }

        let mut queue = self.queue_rx.lock().await;
        while let Ok(job) = queue.try_recv() {
            self.registry
                .mark_failed(job.state.id, None, "worker pool shut down");
            let _ = job.reply.send(Err(Error::WorkerUnavailable));
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(
    index: usize,
    flow: Arc<ResearchFlow>,
    registry: Arc<RunRegistry>,
    queue: JobQueue,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            job = async { queue.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };

        let run_id = job.state.id;
        info!("Worker {} picked up run {}", index, run_id);
        registry.mark_running(run_id);

        let result = flow.run_with_cancel(job.state, &job.cancel).await;
        match &result {
            Ok(report) => match &report.outcome {
                RunOutcome::Completed { .. } => {
                    registry.mark_completed(run_id, report.state.retry_count)
                }
                RunOutcome::MaxRetryFailed { .. } => registry.mark_failed(
                    run_id,
                    Some(report.state.retry_count),
                    format!(
                        "Maximum retries exceeded after {} attempts",
                        report.state.retry_count
                    ),
                ),
            },
            Err(e) => {
                error!("Run {} failed: {}", run_id, e);
                registry.mark_failed(run_id, None, e.to_string());
            }
        }

        // The submitter may have dropped its handle
        let _ = job.reply.send(result);
    }
    info!("Worker {} stopped", index);
}
