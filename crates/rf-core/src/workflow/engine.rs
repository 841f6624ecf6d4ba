//! Research workflow engine
//!
//! Drives one run through generate → evaluate → (retry wait → generate)* →
//! synthesize, or to a max-retry failure. Every transition is reported to
//! the [`BroadcastHub`]; the engine never waits on observers.
//!
//! Retry accounting: `retry_count` grows by one after every evaluation,
//! approving ones included, so `max_attempts` bounds evaluations rather than
//! generations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::artifacts::ArtifactWriter;
use super::state::{RunState, Stage};
use super::verdict::{self, Verdict};
use crate::agents::{AgentInvoker, AgentOutput, AgentRole, AgentTask};
use crate::config::WorkflowConfig;
use crate::progress::{AgentKind, AgentStatus, BroadcastHub, ProgressEvent};
use crate::{Error, Result};

/// Feedback longer than this is cut in rejection events
const FEEDBACK_PREVIEW_CHARS: usize = 200;

/// Cooperative cancellation signal, checked between stages
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    /// A token plus the sender that trips it
    pub fn pair() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// A token that is never cancelled
    pub fn never() -> Self {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancelled. Pends forever if the sender is gone.
    async fn cancelled(&self) {
        let mut rx = self.0.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// How a run ended, when it did not fail outright
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { report: String, report_path: PathBuf },
    MaxRetryFailed { artifact: PathBuf },
}

/// Final state plus outcome
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }
}

/// Timing and limits for the state machine
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub quota_cooldown: Duration,
}

impl From<&WorkflowConfig> for FlowSettings {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
            quota_cooldown: config.quota_cooldown(),
        }
    }
}

/// Executes research runs. Cheap to share; holds no per-run state.
pub struct ResearchFlow {
    invoker: Arc<dyn AgentInvoker>,
    hub: Arc<BroadcastHub>,
    artifacts: ArtifactWriter,
    settings: FlowSettings,
}

impl ResearchFlow {
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        hub: Arc<BroadcastHub>,
        config: &WorkflowConfig,
    ) -> Self {
        Self {
            invoker,
            hub,
            artifacts: ArtifactWriter::new(&config.output_dir),
            settings: FlowSettings::from(config),
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Run to a terminal state
    pub async fn run(&self, state: RunState) -> Result<RunReport> {
        self.run_with_cancel(state, &CancelToken::never()).await
    }

    pub async fn run_with_cancel(
        &self,
        mut state: RunState,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        info!("Starting run {} for topic: {}", state.id, state.topic);
        self.hub.emit(ProgressEvent::system(
            AgentStatus::Started,
            format!("Starting research flow for: {}", state.topic),
        ));

        match self.drive(&mut state, cancel).await {
            Ok(outcome) => Ok(RunReport { state, outcome }),
            Err(e) => {
                error!("Run {} failed: {}", state.id, e);
                self.hub.emit(ProgressEvent::system(
                    AgentStatus::Error,
                    format!("Flow execution error: {}", e),
                ));
                Err(e)
            }
        }
    }

    async fn drive(&self, state: &mut RunState, cancel: &CancelToken) -> Result<RunOutcome> {
        let mut stage = Stage::Generating;
        let mut completed = None;
        while !stage.is_terminal() {
            cancel.check()?;
            debug!("Run {} entering {:?}", state.id, stage);

            stage = match stage {
                Stage::Generating => {
                    self.generate(state).await?;
                    Stage::Evaluating
                }
                Stage::Evaluating => self.evaluate(state).await?,
                Stage::RetryWait => {
                    self.retry_wait(state, cancel).await?;
                    Stage::Generating
                }
                Stage::Synthesizing => {
                    completed = Some(self.synthesize(state).await?);
                    Stage::Completed
                }
                Stage::MaxRetryFailed | Stage::Completed => break,
            };
        }

        debug!("Run {} reached {:?}", state.id, stage);
        match completed {
            Some(outcome) => Ok(outcome),
            None => self.record_failure(state).await,
        }
    }

    fn emit(&self, agent: AgentKind, status: AgentStatus, message: impl Into<String>) {
        self.hub.emit(ProgressEvent::new(agent, status, message));
    }

    fn emit_at(
        &self,
        state: &RunState,
        agent: AgentKind,
        status: AgentStatus,
        message: impl Into<String>,
    ) {
        self.hub
            .emit(ProgressEvent::new(agent, status, message).with_iteration(state.iteration()));
    }

    // ------------------------------------------------------------------
    // Generate
    // ------------------------------------------------------------------

    async fn generate(&self, state: &mut RunState) -> Result<()> {
        let iteration = state.iteration();
        if state.retry_count == 0 {
            self.emit_at(
                state,
                AgentKind::Researcher,
                AgentStatus::Thinking,
                format!("Starting research iteration {}", iteration),
            );
        }

        let working = if state.feedback.is_some() {
            format!(
                "Addressing reviewer feedback (attempt {}/{})",
                iteration, self.settings.max_attempts
            )
        } else {
            "Gathering information from sources".to_string()
        };
        self.emit_at(state, AgentKind::Researcher, AgentStatus::Working, working);

        let task = self.research_task(state);
        let output = match self.invoke_with_cooldown(state, task).await {
            Ok(output) => output,
            Err(e) => {
                self.emit_at(
                    state,
                    AgentKind::Researcher,
                    AgentStatus::Error,
                    format!("Error: {}", e),
                );
                return Err(e);
            }
        };

        let length = output.raw.chars().count();
        state.research_result = output.raw;
        self.hub.emit(
            ProgressEvent::new(
                AgentKind::Researcher,
                AgentStatus::Done,
                format!("Research completed ({} chars)", length),
            )
            .with_iteration(iteration)
            .with_detail("output_length", length),
        );
        Ok(())
    }

    fn research_task(&self, state: &RunState) -> AgentTask {
        let mut task = AgentTask::new(
            AgentRole::Researcher,
            format!(
                "Conduct thorough research on {} and report the most relevant, \
                 credible sources as of {}.",
                state.topic, state.current_year
            ),
        )
        .with_input("topic", state.topic.as_str())
        .with_input("current_year", state.current_year.as_str())
        .with_documents(state.attached_documents.clone());

        if let Some(feedback) = &state.feedback {
            task = task.with_input(
                "feedback",
                format!(
                    "PREVIOUS ATTEMPT WAS REJECTED (Attempt {}).\n\n\
                     REVIEWER FEEDBACK:\n{}\n\n\
                     Address every point above. This is attempt {} of {}.",
                    state.retry_count,
                    feedback,
                    state.iteration(),
                    self.settings.max_attempts
                ),
            );
        }
        task
    }

    /// Invoke once; on a quota error wait out the cooldown and try exactly
    /// one more time.
    async fn invoke_with_cooldown(&self, state: &RunState, task: AgentTask) -> Result<AgentOutput> {
        match self.invoker.invoke(task.clone()).await {
            Err(e) if e.is_quota_exceeded() => {
                let cooldown = self.settings.quota_cooldown;
                warn!("Run {}: quota exceeded, waiting {:?}: {}", state.id, cooldown, e);
                self.emit_at(
                    state,
                    AgentKind::Researcher,
                    AgentStatus::Retry,
                    format!("API quota exceeded, waiting {}s", cooldown.as_secs()),
                );
                tokio::time::sleep(cooldown).await;
                self.invoker.invoke(task).await
            }
            result => result,
        }
    }

    // ------------------------------------------------------------------
    // Retry wait
    // ------------------------------------------------------------------

    async fn retry_wait(&self, state: &RunState, cancel: &CancelToken) -> Result<()> {
        let delay = self.settings.retry_delay;
        self.emit_at(
            state,
            AgentKind::Researcher,
            AgentStatus::Retry,
            format!("Starting research iteration {}", state.iteration()),
        );
        self.emit_at(
            state,
            AgentKind::Researcher,
            AgentStatus::Thinking,
            format!("Waiting {}s before retry (API rate limit)", delay.as_secs()),
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    // ------------------------------------------------------------------
    // Evaluate
    // ------------------------------------------------------------------

    async fn evaluate(&self, state: &mut RunState) -> Result<Stage> {
        let iteration = state.iteration();
        let max = self.settings.max_attempts;
        self.emit_at(
            state,
            AgentKind::Reviewer,
            AgentStatus::Thinking,
            format!("Evaluating research quality (attempt {})", iteration),
        );

        if state.retry_count >= max {
            self.emit_at(
                state,
                AgentKind::Reviewer,
                AgentStatus::Error,
                format!("Maximum retry limit reached ({} attempts)", max),
            );
            return Ok(Stage::MaxRetryFailed);
        }

        self.emit_at(
            state,
            AgentKind::Reviewer,
            AgentStatus::Working,
            "Analyzing research papers and validating quality",
        );

        let task = AgentTask::new(
            AgentRole::Reviewer,
            format!(
                "Review and critically evaluate this research report about {}:\n\n{}",
                state.topic, state.research_result
            ),
        )
        .with_input("topic", state.topic.as_str());

        let output = match self.invoker.invoke(task).await {
            Ok(output) => output,
            Err(e) => {
                self.emit_at(
                    state,
                    AgentKind::Reviewer,
                    AgentStatus::Error,
                    format!("Error: {}", e),
                );
                return Err(e);
            }
        };

        let assessment = verdict::extract(&Verdict::from_output(output));
        state.valid = assessment.valid;
        state.feedback = assessment.feedback;
        state.retry_count += 1;

        if state.valid {
            info!("Run {}: research approved", state.id);
            self.hub.emit(
                ProgressEvent::new(
                    AgentKind::Reviewer,
                    AgentStatus::Approved,
                    "Research approved, proceeding to synthesis",
                )
                .with_iteration(iteration)
                .with_detail("approved", true),
            );
            return Ok(Stage::Synthesizing);
        }

        let preview: String = state
            .feedback
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(FEEDBACK_PREVIEW_CHARS)
            .collect();
        info!(
            "Run {}: research rejected ({}/{})",
            state.id, state.retry_count, max
        );
        self.hub.emit(
            ProgressEvent::new(
                AgentKind::Reviewer,
                AgentStatus::Rejected,
                format!("Research rejected. Retry {}/{}", state.retry_count, max),
            )
            .with_iteration(iteration)
            .with_detail("approved", false)
            .with_detail("feedback", preview),
        );

        if state.retry_count >= max {
            Ok(Stage::MaxRetryFailed)
        } else {
            Ok(Stage::RetryWait)
        }
    }

    // ------------------------------------------------------------------
    // Terminal stages
    // ------------------------------------------------------------------

    async fn synthesize(&self, state: &mut RunState) -> Result<RunOutcome> {
        self.hub.emit(
            ProgressEvent::new(
                AgentKind::Synthesizer,
                AgentStatus::Thinking,
                "Starting synthesis report generation",
            )
            .with_detail("iterations_required", state.retry_count),
        );
        self.emit(
            AgentKind::Synthesizer,
            AgentStatus::Working,
            "Analyzing patterns and synthesizing findings",
        );

        let task = AgentTask::new(
            AgentRole::Synthesizer,
            format!(
                "Create a comprehensive synthesis report on {} from the approved research below.\n\n\
                 APPROVED RESEARCH:\n{}\n\n\
                 REVIEW STATUS: APPROVED after {} iteration(s)",
                state.topic, state.research_result, state.retry_count
            ),
        )
        .with_input("topic", state.topic.as_str())
        .with_input("current_year", state.current_year.as_str())
        .with_input("approved_research", state.research_result.as_str());

        let report = match self.invoker.invoke(task).await {
            Ok(output) if !output.raw.trim().is_empty() => output.raw,
            Ok(_) => {
                return Err(self.synthesis_failed(Error::Synthesis(
                    "synthesizer returned an empty report".to_string(),
                )));
            }
            Err(e) if e.is_quota_exceeded() => return Err(self.synthesis_failed(e)),
            Err(e) => return Err(self.synthesis_failed(Error::Synthesis(e.to_string()))),
        };

        let report_path = self.artifacts.write_report(state, &report).await?;
        state.final_report = Some(report.clone());
        let output_file = report_path.display().to_string();

        self.hub.emit(
            ProgressEvent::new(
                AgentKind::Synthesizer,
                AgentStatus::Done,
                format!("Synthesis complete, report saved to {}", output_file),
            )
            .with_detail("total_iterations", state.retry_count)
            .with_detail("output_file", output_file)
            .with_detail("report_content", report.as_str()),
        );
        self.hub.emit(
            ProgressEvent::system(AgentStatus::Completed, "Research flow completed successfully")
                .with_detail("total_iterations", state.retry_count)
                .with_detail("final_report", report.as_str()),
        );

        Ok(RunOutcome::Completed {
            report,
            report_path,
        })
    }

    fn synthesis_failed(&self, e: Error) -> Error {
        self.emit(
            AgentKind::Synthesizer,
            AgentStatus::Error,
            format!("Synthesis failed: {}", e),
        );
        e
    }

    async fn record_failure(&self, state: &RunState) -> Result<RunOutcome> {
        warn!(
            "Run {}: maximum retries exceeded after {} attempts",
            state.id, state.retry_count
        );
        let artifact = self.artifacts.write_failure(state).await?;

        self.hub.emit(
            ProgressEvent::system(
                AgentStatus::Error,
                format!(
                    "Research failed after {} attempts. Maximum retries exceeded.",
                    state.retry_count
                ),
            )
            .with_detail("total_attempts", state.retry_count)
            .with_detail("last_feedback", state.feedback.clone().unwrap_or_default()),
        );

        Ok(RunOutcome::MaxRetryFailed { artifact })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ScriptedInvoker, ScriptedReply};
    use crate::documents::AttachedDocument;
    use crate::progress::{ChannelObserver, ObserverMessage};
    use tokio::sync::mpsc::Receiver;

    const REJECT_TWO_REASONS: &str = r#"Verdict follows.
{"approved": false, "rejection_reasons": ["too few sources", "missing methodology"]}"#;
    const APPROVE: &str = r#"{"approved": true}"#;

    struct Harness {
        invoker: Arc<ScriptedInvoker>,
        flow: ResearchFlow,
        events: Receiver<ObserverMessage>,
        _dir: tempfile::TempDir,
    }

    fn harness(max_attempts: u32) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkflowConfig {
            max_attempts,
            retry_delay_secs: 0,
            quota_cooldown_secs: 0,
            output_dir: dir.path().to_string_lossy().into_owned(),
            ..WorkflowConfig::default()
        };
        let hub = Arc::new(BroadcastHub::new());
        let (observer, events) = ChannelObserver::new();
        hub.register(Arc::new(observer));

        let invoker = Arc::new(ScriptedInvoker::new());
        let flow = ResearchFlow::new(invoker.clone(), hub, &config);
        Harness {
            invoker,
            flow,
            events,
            _dir: dir,
        }
    }

    fn drain(rx: &mut Receiver<ObserverMessage>) -> Vec<ProgressEvent> {
        let mut events = vec![];
        while let Ok(message) = rx.try_recv() {
            if let ObserverMessage::Event(event) = message {
                events.push(event);
            }
        }
        events
    }

    fn trace(events: &[ProgressEvent]) -> Vec<(AgentKind, AgentStatus)> {
        events.iter().map(|e| (e.agent, e.status)).collect()
    }

    #[tokio::test]
    async fn test_approval_on_first_evaluation() {
        let mut h = harness(3);
        h.invoker
            .push_text(AgentRole::Researcher, "draft")
            .push_text(AgentRole::Reviewer, APPROVE)
            .push_text(AgentRole::Synthesizer, "# Final report");

        let report = h
            .flow
            .run(RunState::new("graph neural networks", vec![]))
            .await
            .unwrap();

        assert!(report.is_completed());
        assert_eq!(report.state.retry_count, 1);
        assert!(report.state.valid);
        assert!(report.state.feedback.is_none());
        assert_eq!(report.state.final_report.as_deref(), Some("# Final report"));
        assert_eq!(h.invoker.calls_for(AgentRole::Researcher).len(), 1);
        assert_eq!(h.invoker.calls_for(AgentRole::Reviewer).len(), 1);
        assert_eq!(h.invoker.calls_for(AgentRole::Synthesizer).len(), 1);

        let RunOutcome::Completed { report_path, .. } = &report.outcome else {
            panic!("expected completion");
        };
        assert_eq!(
            std::fs::read_to_string(report_path).unwrap(),
            "# Final report"
        );

        use AgentKind::*;
        use AgentStatus::*;
        let events = drain(&mut h.events);
        assert_eq!(
            trace(&events),
            vec![
                (System, Started),
                (Researcher, Thinking),
                (Researcher, Working),
                (Researcher, Done),
                (Reviewer, Thinking),
                (Reviewer, Working),
                (Reviewer, Approved),
                (Synthesizer, Thinking),
                (Synthesizer, Working),
                (Synthesizer, Done),
                (System, Completed),
            ]
        );
        assert!(events.iter().all(|e| e.timestamp.is_some()));
        assert_eq!(events[3].detail("output_length"), Some(&5.into()));
        let completed = events.last().unwrap();
        assert_eq!(
            completed.detail("final_report").and_then(|v| v.as_str()),
            Some("# Final report")
        );
    }

    #[tokio::test]
    async fn test_rejection_feeds_next_generation() {
        let mut h = harness(3);
        h.invoker
            .push_text(AgentRole::Researcher, "thin draft")
            .push_text(AgentRole::Reviewer, REJECT_TWO_REASONS)
            .push_text(AgentRole::Researcher, "better draft")
            .push_text(AgentRole::Reviewer, APPROVE)
            .push_text(AgentRole::Synthesizer, "report");

        let report = h
            .flow
            .run(RunState::new("graph neural networks", vec![]))
            .await
            .unwrap();
        assert_eq!(report.state.retry_count, 2);
        assert!(report.state.feedback.is_none());

        let researcher_calls = h.invoker.calls_for(AgentRole::Researcher);
        assert_eq!(researcher_calls.len(), 2);
        assert!(researcher_calls[0].input("feedback").is_none());
        let feedback = researcher_calls[1].input("feedback").unwrap();
        assert!(feedback.contains("- too few sources\n- missing methodology"));
        assert!(feedback.contains("(Attempt 1)"));

        let events = drain(&mut h.events);
        let rejected = events
            .iter()
            .find(|e| e.status == AgentStatus::Rejected)
            .unwrap();
        assert_eq!(rejected.message, "Research rejected. Retry 1/3");
        assert_eq!(rejected.iteration, Some(1));
        assert_eq!(
            rejected.detail("feedback").and_then(|v| v.as_str()),
            Some("- too few sources\n- missing methodology")
        );

        // Retry wait owns the second iteration's opening events
        let second: Vec<_> = events
            .iter()
            .filter(|e| e.agent == AgentKind::Researcher && e.iteration == Some(2))
            .map(|e| e.status)
            .collect();
        assert_eq!(
            second,
            vec![
                AgentStatus::Retry,
                AgentStatus::Thinking,
                AgentStatus::Working,
                AgentStatus::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_three_rejections_fail_with_artifact() {
        let mut h = harness(3);
        for i in 1..=3 {
            h.invoker
                .push_text(AgentRole::Researcher, format!("draft {}", i))
                .push_text(
                    AgentRole::Reviewer,
                    format!(r#"{{"approved": false, "feedback": "weak sources round {}"}}"#, i),
                );
        }

        let report = h
            .flow
            .run(RunState::new("graph neural networks", vec![]))
            .await
            .unwrap();

        assert_eq!(report.state.retry_count, 3);
        assert!(!report.state.valid);
        assert!(report.state.final_report.is_none());
        assert_eq!(h.invoker.calls_for(AgentRole::Reviewer).len(), 3);
        assert!(h.invoker.calls_for(AgentRole::Synthesizer).is_empty());

        let RunOutcome::MaxRetryFailed { artifact } = &report.outcome else {
            panic!("expected max-retry failure");
        };
        let text = std::fs::read_to_string(artifact).unwrap();
        assert!(text.contains("**Topic:** graph neural networks"));
        assert!(text.contains("**Attempts:** 3"));
        assert!(text.contains("draft 3"));
        assert!(text.contains("weak sources round 3"));

        let events = drain(&mut h.events);
        let last = events.last().unwrap();
        assert_eq!((last.agent, last.status), (AgentKind::System, AgentStatus::Error));
        assert_eq!(last.detail("total_attempts"), Some(&3.into()));
    }

    #[tokio::test]
    async fn test_pre_check_skips_evaluation_at_cap() {
        let mut h = harness(0);
        h.invoker.push_text(AgentRole::Researcher, "draft");

        let report = h.flow.run(RunState::new("topic", vec![])).await.unwrap();
        assert!(matches!(report.outcome, RunOutcome::MaxRetryFailed { .. }));
        assert_eq!(report.state.retry_count, 0);
        assert!(h.invoker.calls_for(AgentRole::Reviewer).is_empty());

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| e.agent == AgentKind::Reviewer
            && e.status == AgentStatus::Error
            && e.message.starts_with("Maximum retry limit reached")));
    }

    #[tokio::test]
    async fn test_quota_error_retried_once() {
        let mut h = harness(3);
        h.invoker
            .push(AgentRole::Researcher, ScriptedReply::Quota("429".into()))
            .push_text(AgentRole::Researcher, "draft")
            .push_text(AgentRole::Reviewer, APPROVE)
            .push_text(AgentRole::Synthesizer, "report");

        let report = h.flow.run(RunState::new("topic", vec![])).await.unwrap();
        assert!(report.is_completed());
        assert_eq!(h.invoker.calls_for(AgentRole::Researcher).len(), 2);

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| e.status == AgentStatus::Retry
            && e.message == "API quota exceeded, waiting 0s"));
    }

    #[tokio::test]
    async fn test_second_quota_error_is_fatal() {
        let mut h = harness(3);
        h.invoker
            .push(AgentRole::Researcher, ScriptedReply::Quota("429".into()))
            .push(
                AgentRole::Researcher,
                ScriptedReply::Fail("RESOURCE_EXHAUSTED".into()),
            );

        let err = h
            .flow
            .run(RunState::new("topic", vec![]))
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(h.invoker.calls_for(AgentRole::Researcher).len(), 2);
        assert!(h.invoker.calls_for(AgentRole::Reviewer).is_empty());

        let events = drain(&mut h.events);
        let last = events.last().unwrap();
        assert_eq!(last.agent, AgentKind::System);
        assert!(last.message.starts_with("Flow execution error:"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_fatal_without_retry() {
        let mut h = harness(3);
        h.invoker
            .push(AgentRole::Researcher, ScriptedReply::Fail("connection reset".into()));

        let err = h
            .flow
            .run(RunState::new("topic", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Agent(_)));
        assert_eq!(h.invoker.calls().len(), 1);

        let statuses = trace(&drain(&mut h.events));
        assert!(statuses.contains(&(AgentKind::Researcher, AgentStatus::Error)));
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_fatal() {
        let mut h = harness(3);
        h.invoker
            .push_text(AgentRole::Researcher, "draft")
            .push_text(AgentRole::Reviewer, APPROVE)
            .push(AgentRole::Synthesizer, ScriptedReply::Fail("model crashed".into()));

        let err = h
            .flow
            .run(RunState::new("topic", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Synthesis(_)));
        assert_eq!(h.invoker.calls_for(AgentRole::Synthesizer).len(), 1);

        let statuses = trace(&drain(&mut h.events));
        assert!(statuses.contains(&(AgentKind::Synthesizer, AgentStatus::Error)));
        assert_eq!(statuses.last(), Some(&(AgentKind::System, AgentStatus::Error)));
    }

    #[tokio::test]
    async fn test_unparseable_review_counts_as_rejection() {
        let mut h = harness(1);
        h.invoker
            .push_text(AgentRole::Researcher, "draft")
            .push_text(AgentRole::Reviewer, "I liked it a lot");

        let report = h.flow.run(RunState::new("topic", vec![])).await.unwrap();
        assert_eq!(report.state.feedback.as_deref(), Some("Review parsing failed"));
        assert!(matches!(report.outcome, RunOutcome::MaxRetryFailed { .. }));
    }

    #[tokio::test]
    async fn test_documents_reach_the_researcher() {
        let h = harness(3);
        h.invoker
            .push_text(AgentRole::Researcher, "draft")
            .push_text(AgentRole::Reviewer, APPROVE)
            .push_text(AgentRole::Synthesizer, "report");

        let docs = vec![AttachedDocument {
            id: "n1".into(),
            path: PathBuf::from("uploads/n1.md"),
        }];
        h.flow.run(RunState::new("topic", docs.clone())).await.unwrap();

        assert_eq!(h.invoker.calls_for(AgentRole::Researcher)[0].documents, docs);
        assert!(h.invoker.calls_for(AgentRole::Reviewer)[0].documents.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = harness(3);
        let (tx, token) = CancelToken::pair();
        tx.send(true).unwrap();

        let err = h
            .flow
            .run_with_cancel(RunState::new("topic", vec![]), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(h.invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_retry_wait() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkflowConfig {
            retry_delay_secs: 3600,
            output_dir: dir.path().to_string_lossy().into_owned(),
            ..WorkflowConfig::default()
        };
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker
            .push_text(AgentRole::Researcher, "draft")
            .push_text(AgentRole::Reviewer, r#"{"approved": false}"#);
        let flow = ResearchFlow::new(invoker.clone(), Arc::new(BroadcastHub::new()), &config);

        let (tx, token) = CancelToken::pair();
        let run = tokio::spawn(async move {
            flow.run_with_cancel(RunState::new("topic", vec![]), &token)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(invoker.calls_for(AgentRole::Researcher).len(), 1);
    }
}
