//! Workflow definition model.

use crate::operation::OperationSpec;
use crate::permission::PermissionLevel;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// How a workflow's steps are scheduled.
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
pub enum ExecutionMode {
    /// Steps run in declared order; later steps may reference earlier outputs.
    Sequential,
    /// All steps launch concurrently; inter-step references are rejected.
    Parallel,
    /// Dependency-driven scheduling from each step's `depends_on` set.
    Dag,
}

/// What happens to the run when a step fails.
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
pub enum ErrorHandling {
    /// Abort remaining steps on first failure.
    StopOnFailure,
    /// Run every independently schedulable step regardless of sibling failures.
    ContinueOnFailure,
}

/// One step of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: String,
    /// The operation this step dispatches (tool, agent, or nested workflow)
    pub operation: OperationSpec,
    /// Step ids that must reach a terminal state before this step is eligible
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional per-step deadline in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl WorkflowStep {
    pub fn new(step_id: impl Into<String>, operation: OperationSpec) -> Self {
        Self {
            step_id: step_id.into(),
            operation,
            depends_on: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn depends_on(mut self, step_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = step_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// A declarative multi-step operation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_id: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default = "default_execution_mode")]
    pub execution_mode: ExecutionMode,
    #[serde(default = "default_error_handling")]
    pub error_handling: ErrorHandling,
    /// Optional overall deadline for the run in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Steps whose operation is itself a workflow are rejected unless set
    #[serde(default)]
    pub allow_nested_workflows: bool,
    /// Minimum permission level a session needs to start this workflow
    #[serde(default = "default_minimum_permission")]
    pub minimum_permission: PermissionLevel,
}

fn default_execution_mode() -> ExecutionMode {
    ExecutionMode::Sequential
}

fn default_error_handling() -> ErrorHandling {
    ErrorHandling::StopOnFailure
}

fn default_minimum_permission() -> PermissionLevel {
    PermissionLevel::Viewer
}

impl WorkflowDefinition {
    pub fn new(workflow_id: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            steps,
            execution_mode: default_execution_mode(),
            error_handling: default_error_handling(),
            timeout_ms: None,
            allow_nested_workflows: false,
            minimum_permission: default_minimum_permission(),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_error_handling(mut self, policy: ErrorHandling) -> Self {
        self.error_handling = policy;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Looks up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}
