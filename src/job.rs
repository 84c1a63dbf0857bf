use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Maximum size for captured deployment output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Where a deployment attempt ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
    /// Stopped before any repository command ran (e.g. missing credentials)
    Aborted,
}

/// One run of the deployment steps for a project. Lives only as long as the
/// background task that executes it.
#[derive(Debug, Clone)]
pub struct DeploymentAttempt {
    pub id: String,
    pub project_name: String,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: String,
    pub output_truncated: bool,
    pub error: Option<String>,
}

impl DeploymentAttempt {
    pub fn start(project_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            project_name: project_name.into(),
            status: AttemptStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            output: String::new(),
            output_truncated: false,
            error: None,
        }
    }

    /// Append captured step output, truncating once the cap is reached
    pub fn append_output(&mut self, chunk: &str) {
        if self.output_truncated {
            return;
        }
        let remaining = MAX_OUTPUT_SIZE.saturating_sub(self.output.len());
        if chunk.len() <= remaining {
            self.output.push_str(chunk);
            return;
        }
        let mut cut = remaining;
        while !chunk.is_char_boundary(cut) {
            cut -= 1;
        }
        self.output.push_str(&chunk[..cut]);
        self.output.push_str("\n... (output truncated)");
        self.output_truncated = true;
    }

    pub fn mark_succeeded(&mut self) {
        self.status = AttemptStatus::Succeeded;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = AttemptStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn mark_aborted(&mut self, reason: String) {
        self.status = AttemptStatus::Aborted;
        self.completed_at = Some(Utc::now());
        self.error = Some(reason);
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
