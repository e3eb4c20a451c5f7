//! Per-step and aggregate results of a workflow run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

/// Terminal and in-flight states of one step.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    /// The step's deadline elapsed; kept distinct from business failure
    TimedOut,
}

impl StepStatus {
    /// Terminal states unblock dependent steps.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }

    /// States that count as failure for error-handling policy.
    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::TimedOut)
    }
}

/// Lifecycle state of a whole run: `pending -> running -> terminal`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// Some steps failed but others completed (continue-on-failure runs)
    Partial,
    /// The run's overall deadline elapsed
    TimedOut,
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub outputs: Value,
    /// Audit event recorded for this step's dispatch, when one was written
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StepResult {
    /// A step that never ran.
    pub fn skipped(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            outputs: Value::Null,
            event_id: None,
            error: None,
        }
    }

    /// A step that failed before dispatch (e.g. unresolved reference).
    pub fn failed(step_id: impl Into<String>, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Failed,
            started_at: Some(at),
            completed_at: Some(at),
            duration_ms: Some(0),
            outputs: Value::Null,
            event_id: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate outcome of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Step results in declaration order
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkflowResult {
    /// Derives the aggregate status from step outcomes.
    ///
    /// `failed_fast` forces `Failed` (stop-on-failure aborts); a run timeout
    /// forces `TimedOut`. Otherwise: all success -> `Success`, any failure
    /// among successes -> `Partial`, nothing succeeded -> `Failed`.
    pub fn aggregate_status(steps: &[StepResult], failed_fast: bool, timed_out: bool) -> WorkflowStatus {
        if timed_out {
            return WorkflowStatus::TimedOut;
        }
        if failed_fast {
            return WorkflowStatus::Failed;
        }
        let any_failure = steps.iter().any(|s| s.status.is_failure());
        let any_success = steps.iter().any(|s| s.status == StepStatus::Success);
        match (any_failure, any_success) {
            (false, _) => WorkflowStatus::Success,
            (true, true) => WorkflowStatus::Partial,
            (true, false) => WorkflowStatus::Failed,
        }
    }

    /// Looks up one step's result.
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}
