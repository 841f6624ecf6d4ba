//! Files a run leaves behind in the output directory

use std::path::{Path, PathBuf};
use tracing::info;

use super::state::RunState;
use crate::Result;

/// Writes run artifacts under one output directory
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn report_path(&self, state: &RunState) -> PathBuf {
        self.output_dir
            .join(format!("synthesis_report_{}.md", state.id))
    }

    pub fn failure_path(&self, state: &RunState) -> PathBuf {
        self.output_dir
            .join(format!("failed_research_{}.md", state.id))
    }

    pub async fn write_report(&self, state: &RunState, report: &str) -> Result<PathBuf> {
        let path = self.report_path(state);
        self.write(&path, report).await?;
        info!("Synthesis report saved to {}", path.display());
        Ok(path)
    }

    /// Persist the record of a run that exhausted its attempts
    pub async fn write_failure(&self, state: &RunState) -> Result<PathBuf> {
        let path = self.failure_path(state);
        self.write(&path, &render_failure(state)).await?;
        info!("Failure record saved to {}", path.display());
        Ok(path)
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

fn render_failure(state: &RunState) -> String {
    format!(
        "# Failed Research Report\n\n\
         **Topic:** {}\n\n\
         **Attempts:** {}\n\n\
         ## Last Research Output\n\n{}\n\n\
         ## Last Reviewer Feedback\n\n{}\n",
        state.topic,
        state.retry_count,
        state.research_result,
        state.feedback.as_deref().unwrap_or("None"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_record_layout() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("out"));

        let mut state = RunState::new("graph neural networks", vec![]);
        state.retry_count = 3;
        state.research_result = "draft three".into();
        state.feedback = Some("- still thin".into());

        let path = writer.write_failure(&state).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();

        assert!(path.ends_with(format!("failed_research_{}.md", state.id)));
        assert!(text.starts_with("# Failed Research Report"));
        assert!(text.contains("**Topic:** graph neural networks"));
        assert!(text.contains("**Attempts:** 3"));
        assert!(text.contains("## Last Research Output\n\ndraft three"));
        assert!(text.contains("## Last Reviewer Feedback\n\n- still thin"));
    }

    #[tokio::test]
    async fn test_report_written_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let a = RunState::new("a topic", vec![]);
        let b = RunState::new("b topic", vec![]);

        let pa = writer.write_report(&a, "report a").await.unwrap();
        let pb = writer.write_report(&b, "report b").await.unwrap();

        assert_ne!(pa, pb);
        assert_eq!(std::fs::read_to_string(pa).unwrap(), "report a");
        assert_eq!(std::fs::read_to_string(pb).unwrap(), "report b");
    }
}
