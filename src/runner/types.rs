/// What came back from one dbt subprocess invocation. Ephemeral; the
/// orchestrator-facing outcome is derived from it and the raw result is
/// not persisted.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    /// Combined stdout/stderr text, line-buffered.
    pub output: String,
}

/// Orchestrator-facing outcome of a task. Failure is not a variant here:
/// a failed dbt run surfaces as [`crate::TaskError::ToolFailed`] so the
/// skip outcome stays distinguishable from both success and failure.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success { output: String },
    Skipped { exit_code: i32 },
}

impl TaskOutcome {
    pub fn output(&self) -> Option<&str> {
        match self {
            TaskOutcome::Success { output } => Some(output),
            TaskOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TaskOutcome::Skipped { .. })
    }
}
