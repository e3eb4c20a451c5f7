//! Multi-step workflow runs.
//!
//! A run validates its whole definition before any step executes, then
//! schedules steps per the declared execution mode. Every step dispatches
//! through the shared dispatcher path, so it inherits the invoking session's
//! permission and records a `WorkflowStep` audit event. Cancellation stops
//! new launches; in-flight steps run to completion.

use crate::dispatcher::ExecutionDispatcher;
use crate::refs::{collect_references, resolve_operation, RefScope};
use casefile_core::error::{CasefileError, Result};
use casefile_core::operation::{OperationRequest, OperationSpec};
use casefile_core::permission::PermissionLevel;
use casefile_core::session::{EventType, SessionType};
use casefile_core::workflow::{
    ErrorHandling, ExecutionMode, StepResult, StepStatus, WorkflowDefinition, WorkflowResult,
    WorkflowStep,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Identity and authorization a run inherits from its invoking session.
#[derive(Debug, Clone)]
pub struct WorkflowScope {
    pub user_id: String,
    pub casefile_id: String,
    /// Effective level of the invoking session; steps never escalate past it
    pub permission_level: PermissionLevel,
    /// Nesting depth of this run (a top-level run is depth 1)
    pub depth: u32,
}

/// Schedules and runs workflow definitions.
pub struct WorkflowEngine {
    dispatcher: Arc<ExecutionDispatcher>,
    cancel: CancellationToken,
}

/// Mutable state shared by the per-mode runners.
struct RunState {
    results: HashMap<String, StepResult>,
    failed_fast: bool,
    cancelled: bool,
    timed_out: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RunState {
    fn new(deadline: Option<Instant>) -> Self {
        Self {
            results: HashMap::new(),
            failed_fast: false,
            cancelled: false,
            timed_out: Arc::new(AtomicBool::new(false)),
            deadline,
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl WorkflowEngine {
    pub fn new(dispatcher: Arc<ExecutionDispatcher>) -> Self {
        Self {
            dispatcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Ties the run to an externally controlled cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this engine's runs when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs a workflow to completion and returns the aggregate result.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when the definition is invalid (duplicate or
    /// unknown step ids, dependency cycles, forbidden references, ungated
    /// nested workflows). Validation runs before any step executes, so an
    /// invalid definition leaves no step results and no audit events.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        context: &Map<String, Value>,
        scope: &WorkflowScope,
    ) -> Result<WorkflowResult> {
        self.validate(definition)?;

        let started_at = Utc::now();
        let deadline = definition
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut state = RunState::new(deadline);

        tracing::info!(
            target: "workflow",
            workflow_id = %definition.workflow_id,
            mode = %definition.execution_mode,
            steps = definition.steps.len(),
            depth = scope.depth,
            "workflow run started"
        );

        match definition.execution_mode {
            ExecutionMode::Sequential => {
                self.run_sequential(definition, context, scope, &mut state).await
            }
            ExecutionMode::Parallel => {
                self.run_parallel(definition, context, scope, &mut state).await
            }
            ExecutionMode::Dag => self.run_dag(definition, context, scope, &mut state).await,
        }

        // Assemble results in declaration order; anything never launched is
        // reported as skipped.
        let steps: Vec<StepResult> = definition
            .steps
            .iter()
            .map(|step| {
                state
                    .results
                    .remove(&step.step_id)
                    .unwrap_or_else(|| StepResult::skipped(&step.step_id))
            })
            .collect();

        let timed_out = state.timed_out.load(Ordering::Relaxed);
        let status = WorkflowResult::aggregate_status(
            &steps,
            state.failed_fast || state.cancelled,
            timed_out,
        );
        let error = if state.cancelled {
            Some("workflow run cancelled".to_string())
        } else if timed_out {
            Some(format!(
                "workflow '{}' exceeded its deadline",
                definition.workflow_id
            ))
        } else {
            None
        };
        let completed_at = Utc::now();

        tracing::info!(
            target: "workflow",
            workflow_id = %definition.workflow_id,
            status = %status,
            "workflow run finished"
        );

        Ok(WorkflowResult {
            workflow_id: definition.workflow_id.clone(),
            status,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
            steps,
            error,
        })
    }

    /// Whole-definition validation; nothing executes when this fails.
    fn validate(&self, definition: &WorkflowDefinition) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &definition.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(CasefileError::configuration(format!(
                    "duplicate step id '{}'",
                    step.step_id
                )));
            }
            if matches!(step.operation, OperationSpec::Workflow { .. })
                && !definition.allow_nested_workflows
            {
                return Err(CasefileError::configuration(format!(
                    "step '{}' nests a workflow but allow_nested_workflows is not set",
                    step.step_id
                )));
            }
            for dep in &step.depends_on {
                if definition.step(dep).is_none() {
                    return Err(CasefileError::configuration(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.step_id
                    )));
                }
                if dep == &step.step_id {
                    return Err(CasefileError::configuration(format!(
                        "step '{}' depends on itself",
                        step.step_id
                    )));
                }
            }
        }

        match definition.execution_mode {
            ExecutionMode::Sequential => {
                // Execution is declaration order; a forward dependency can
                // never be satisfied.
                for (index, step) in definition.steps.iter().enumerate() {
                    for dep in &step.depends_on {
                        let dep_index = definition
                            .steps
                            .iter()
                            .position(|s| &s.step_id == dep)
                            .unwrap_or(usize::MAX);
                        if dep_index >= index {
                            return Err(CasefileError::configuration(format!(
                                "sequential step '{}' depends on later step '{dep}'",
                                step.step_id
                            )));
                        }
                    }
                }
            }
            ExecutionMode::Parallel => {
                for step in &definition.steps {
                    if !step.depends_on.is_empty() {
                        return Err(CasefileError::configuration(format!(
                            "parallel step '{}' declares dependencies",
                            step.step_id
                        )));
                    }
                    if collect_references(&step.operation)
                        .iter()
                        .any(|(kind, _)| kind == "steps")
                    {
                        return Err(CasefileError::configuration(format!(
                            "parallel step '{}' references another step's output",
                            step.step_id
                        )));
                    }
                }
            }
            ExecutionMode::Dag => {
                kahn_order(definition)?;
            }
        }
        Ok(())
    }

    async fn run_sequential(
        &self,
        definition: &WorkflowDefinition,
        context: &Map<String, Value>,
        scope: &WorkflowScope,
        state: &mut RunState,
    ) {
        for step in &definition.steps {
            if self.cancel.is_cancelled() {
                state.cancelled = true;
                break;
            }
            if state.deadline_passed() {
                state.timed_out.store(true, Ordering::Relaxed);
                break;
            }

            // Dependents of a failed or skipped step never run, mirroring the
            // dag scheduler's blocked-dependency handling.
            let blocked = step.depends_on.iter().any(|d| {
                state
                    .results
                    .get(d)
                    .is_none_or(|dep| dep.status.is_failure() || dep.status == StepStatus::Skipped)
            });
            if blocked {
                state
                    .results
                    .insert(step.step_id.clone(), StepResult::skipped(&step.step_id));
                continue;
            }

            let ref_scope = RefScope {
                steps: &state.results,
                context,
            };
            let operation = match resolve_operation(&step.operation, &ref_scope) {
                Ok(op) => op,
                Err(err) => {
                    let result = StepResult::failed(&step.step_id, err.to_string(), Utc::now());
                    let stop = definition.error_handling == ErrorHandling::StopOnFailure;
                    state.results.insert(step.step_id.clone(), result);
                    if stop {
                        state.failed_fast = true;
                        break;
                    }
                    continue;
                }
            };

            let launch = StepLaunch {
                dispatcher: Arc::clone(&self.dispatcher),
                scope: scope.clone(),
                timed_out: Arc::clone(&state.timed_out),
                deadline: state.deadline,
            };
            let result = launch.run(step.step_id.clone(), operation, step.timeout_ms).await;
            let failed = result.status.is_failure();
            state.results.insert(step.step_id.clone(), result);
            if failed && definition.error_handling == ErrorHandling::StopOnFailure {
                state.failed_fast = true;
                break;
            }
        }
    }

    async fn run_parallel(
        &self,
        definition: &WorkflowDefinition,
        context: &Map<String, Value>,
        scope: &WorkflowScope,
        state: &mut RunState,
    ) {
        let semaphore = Arc::new(Semaphore::new(
            self.dispatcher.config().max_in_flight_steps.max(1),
        ));
        let child_cancel = self.cancel.child_token();
        let mut join_set: JoinSet<(String, StepResult)> = JoinSet::new();

        for step in &definition.steps {
            if self.cancel.is_cancelled() {
                state.cancelled = true;
                break;
            }
            let ref_scope = RefScope {
                steps: &state.results,
                context,
            };
            let operation = match resolve_operation(&step.operation, &ref_scope) {
                Ok(op) => op,
                Err(err) => {
                    state.results.insert(
                        step.step_id.clone(),
                        StepResult::failed(&step.step_id, err.to_string(), Utc::now()),
                    );
                    if definition.error_handling == ErrorHandling::StopOnFailure {
                        child_cancel.cancel();
                        state.failed_fast = true;
                    }
                    continue;
                }
            };

            let launch = StepLaunch {
                dispatcher: Arc::clone(&self.dispatcher),
                scope: scope.clone(),
                timed_out: Arc::clone(&state.timed_out),
                deadline: state.deadline,
            };
            let step_id = step.step_id.clone();
            let timeout_ms = step.timeout_ms;
            let semaphore = Arc::clone(&semaphore);
            let cancel = child_cancel.clone();
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            step_id.clone(),
                            StepResult::failed(&step_id, "concurrency limiter closed", Utc::now()),
                        );
                    }
                };
                if cancel.is_cancelled() {
                    return (step_id.clone(), StepResult::skipped(&step_id));
                }
                if launch.deadline.is_some_and(|d| Instant::now() >= d) {
                    launch.timed_out.store(true, Ordering::Relaxed);
                    return (step_id.clone(), StepResult::skipped(&step_id));
                }
                let result = launch.run(step_id.clone(), operation, timeout_ms).await;
                (step_id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((step_id, result)) => {
                    if result.status.is_failure()
                        && definition.error_handling == ErrorHandling::StopOnFailure
                    {
                        // Steps still waiting on a permit will skip.
                        child_cancel.cancel();
                        state.failed_fast = true;
                    }
                    state.results.insert(step_id, result);
                }
                Err(join_err) => {
                    tracing::error!(target: "workflow", error = %join_err, "step task aborted");
                }
            }
        }
    }

    async fn run_dag(
        &self,
        definition: &WorkflowDefinition,
        context: &Map<String, Value>,
        scope: &WorkflowScope,
        state: &mut RunState,
    ) {
        let semaphore = Arc::new(Semaphore::new(
            self.dispatcher.config().max_in_flight_steps.max(1),
        ));
        let mut join_set: JoinSet<(String, StepResult)> = JoinSet::new();
        let mut pending: Vec<&WorkflowStep> = definition.steps.iter().collect();
        let mut abort = false;

        loop {
            if !abort && self.cancel.is_cancelled() {
                state.cancelled = true;
                abort = true;
            }
            if !abort && state.deadline_passed() {
                state.timed_out.store(true, Ordering::Relaxed);
                abort = true;
            }

            if !abort {
                // Settle and launch until no pending step changes state; a
                // skip can make further dependents skippable in the same pass.
                let mut changed = true;
                while changed {
                    changed = false;
                    let mut remaining = Vec::with_capacity(pending.len());
                    for step in pending.drain(..) {
                        let terminal_deps = step
                            .depends_on
                            .iter()
                            .all(|d| state.results.contains_key(d));
                        if !terminal_deps {
                            remaining.push(step);
                            continue;
                        }
                        changed = true;
                        let blocked = step.depends_on.iter().any(|d| {
                            let dep = &state.results[d];
                            dep.status.is_failure() || dep.status == StepStatus::Skipped
                        });
                        if blocked {
                            state
                                .results
                                .insert(step.step_id.clone(), StepResult::skipped(&step.step_id));
                            continue;
                        }
                        let ref_scope = RefScope {
                            steps: &state.results,
                            context,
                        };
                        match resolve_operation(&step.operation, &ref_scope) {
                            Ok(operation) => {
                                let launch = StepLaunch {
                                    dispatcher: Arc::clone(&self.dispatcher),
                                    scope: scope.clone(),
                                    timed_out: Arc::clone(&state.timed_out),
                                    deadline: state.deadline,
                                };
                                let step_id = step.step_id.clone();
                                let timeout_ms = step.timeout_ms;
                                let semaphore = Arc::clone(&semaphore);
                                join_set.spawn(async move {
                                    let _permit = match semaphore.acquire_owned().await {
                                        Ok(permit) => permit,
                                        Err(_) => {
                                            return (
                                                step_id.clone(),
                                                StepResult::failed(
                                                    &step_id,
                                                    "concurrency limiter closed",
                                                    Utc::now(),
                                                ),
                                            );
                                        }
                                    };
                                    let result =
                                        launch.run(step_id.clone(), operation, timeout_ms).await;
                                    (step_id, result)
                                });
                            }
                            Err(err) => {
                                state.results.insert(
                                    step.step_id.clone(),
                                    StepResult::failed(&step.step_id, err.to_string(), Utc::now()),
                                );
                                if definition.error_handling == ErrorHandling::StopOnFailure {
                                    abort = true;
                                    state.failed_fast = true;
                                }
                            }
                        }
                    }
                    pending = remaining;
                    if abort {
                        break;
                    }
                }
            }

            match join_set.join_next().await {
                Some(Ok((step_id, result))) => {
                    if result.status.is_failure()
                        && definition.error_handling == ErrorHandling::StopOnFailure
                    {
                        abort = true;
                        state.failed_fast = true;
                    }
                    state.results.insert(step_id, result);
                }
                Some(Err(join_err)) => {
                    tracing::error!(target: "workflow", error = %join_err, "step task aborted");
                }
                None => {
                    if abort || pending.is_empty() {
                        break;
                    }
                    // No tasks in flight and nothing became ready: the
                    // remaining steps are unreachable (their dependencies can
                    // no longer settle), which validation should have caught.
                    tracing::error!(
                        target: "workflow",
                        workflow_id = %definition.workflow_id,
                        stuck = pending.len(),
                        "dag scheduling stalled"
                    );
                    break;
                }
            }
        }

        if state.failed_fast || state.cancelled {
            // Unlaunched steps are reported as skipped by result assembly.
            while let Some(joined) = join_set.join_next().await {
                if let Ok((step_id, result)) = joined {
                    state.results.insert(step_id, result);
                }
            }
        }
    }
}

/// Everything one step needs to dispatch on its own task.
#[derive(Clone)]
struct StepLaunch {
    dispatcher: Arc<ExecutionDispatcher>,
    scope: WorkflowScope,
    timed_out: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl StepLaunch {
    /// Dispatches one step and converts the outcome into a `StepResult`.
    ///
    /// The effective timeout is the step's own deadline capped by the time
    /// remaining on the run; hitting the run-derived cap marks the whole run
    /// as timed out.
    async fn run(
        &self,
        step_id: String,
        operation: OperationSpec,
        timeout_ms: Option<u64>,
    ) -> StepResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let step_timeout = timeout_ms.map(Duration::from_millis);
        let remaining = self.deadline.map(|d| d.saturating_duration_since(start));
        let (effective_timeout, deadline_bound) = match (step_timeout, remaining) {
            (Some(step), Some(run)) if run < step => (Some(run), true),
            (Some(step), _) => (Some(step), false),
            (None, Some(run)) => (Some(run), true),
            (None, None) => (None, false),
        };

        let mut request = OperationRequest::new(
            self.scope.user_id.clone(),
            self.scope.casefile_id.clone(),
            operation,
        );
        request.session_type = Some(SessionType::Workflow);

        // Nested workflows recurse through the dispatcher, which hands back
        // an already-boxed future.
        let dispatch = self.dispatcher.execute_inner(
            request,
            Some(self.scope.permission_level),
            self.scope.depth + 1,
            Some(EventType::WorkflowStep),
        );
        let outcome = match effective_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, dispatch).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if deadline_bound {
                        self.timed_out.store(true, Ordering::Relaxed);
                    }
                    let completed_at = Utc::now();
                    return StepResult {
                        step_id: step_id.clone(),
                        status: StepStatus::TimedOut,
                        started_at: Some(started_at),
                        completed_at: Some(completed_at),
                        duration_ms: Some((completed_at - started_at).num_milliseconds().max(0)
                            as u64),
                        outputs: Value::Null,
                        event_id: None,
                        error: Some(format!(
                            "step '{step_id}' timed out after {}ms",
                            timeout.as_millis()
                        )),
                    };
                }
            },
            None => dispatch.await,
        };
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        match outcome {
            Ok((envelope, _ctx)) => StepResult {
                step_id,
                status: if envelope.success {
                    StepStatus::Success
                } else {
                    StepStatus::Failed
                },
                started_at: Some(started_at),
                completed_at: Some(completed_at),
                duration_ms: Some(duration_ms),
                outputs: envelope.outputs,
                event_id: envelope.event_id,
                error: envelope.error,
            },
            Err(err) => StepResult {
                step_id,
                status: if err.is_timeout() {
                    StepStatus::TimedOut
                } else {
                    StepStatus::Failed
                },
                started_at: Some(started_at),
                completed_at: Some(completed_at),
                duration_ms: Some(duration_ms),
                outputs: Value::Null,
                event_id: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Kahn's algorithm over `depends_on` edges; errors on any cycle.
fn kahn_order(definition: &WorkflowDefinition) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = definition
        .steps
        .iter()
        .map(|s| (s.step_id.as_str(), s.depends_on.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &definition.steps {
        for dep in &step.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.step_id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = definition
        .steps
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| s.step_id.as_str())
        .collect();
    let mut order = Vec::with_capacity(definition.steps.len());
    while let Some(step_id) = queue.pop_front() {
        order.push(step_id.to_string());
        for dependent in dependents.get(step_id).into_iter().flatten() {
            let degree = in_degree
                .get_mut(dependent)
                .expect("dependent is a declared step");
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != definition.steps.len() {
        let stuck: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(id, _)| *id)
            .collect();
        return Err(CasefileError::configuration(format!(
            "workflow '{}' has a dependency cycle involving: {}",
            definition.workflow_id,
            stuck.join(", ")
        )));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FailingTool};
    use casefile_core::session::{EventQuery, SessionStore};
    use casefile_core::workflow::WorkflowStatus;
    use serde_json::json;

    fn tool_step(step_id: &str, text: Value) -> WorkflowStep {
        WorkflowStep::new(
            step_id,
            OperationSpec::Tool {
                name: "echo".to_string(),
                parameters: testing::params(&[("text", text)]),
            },
        )
    }

    fn failing_step(step_id: &str) -> WorkflowStep {
        WorkflowStep::new(
            step_id,
            OperationSpec::Tool {
                name: "broken".to_string(),
                parameters: Map::new(),
            },
        )
    }

    fn sleep_step(step_id: &str, ms: u64) -> WorkflowStep {
        WorkflowStep::new(
            step_id,
            OperationSpec::Tool {
                name: "sleep".to_string(),
                parameters: testing::params(&[("ms", json!(ms))]),
            },
        )
    }

    fn scope() -> WorkflowScope {
        WorkflowScope {
            user_id: "alice".to_string(),
            casefile_id: "cf-1".to_string(),
            permission_level: PermissionLevel::Editor,
            depth: 1,
        }
    }

    async fn run(
        harness: &testing::Harness,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowResult> {
        let engine = WorkflowEngine::new(harness.dispatcher.clone());
        engine.execute(definition, &Map::new(), &scope()).await
    }

    #[tokio::test]
    async fn test_sequential_steps_in_order_with_references() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-seq",
            vec![
                tool_step("first", json!("one")),
                tool_step("second", json!("after ${steps.first.text}")),
            ],
        );
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Success);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].step_id, "first");
        assert_eq!(result.step("second").unwrap().outputs["text"], json!("after one"));
    }

    #[tokio::test]
    async fn test_each_step_records_workflow_step_event() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-audit",
            vec![tool_step("a", json!("x")), tool_step("b", json!("y"))],
        );
        let result = run(&harness, &definition).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Success);

        // Both steps land in the same workflow session, in sequence order.
        let event_id = result.steps[0].event_id.as_deref().unwrap();
        let sessions = harness
            .store
            .list(&Default::default())
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        let events = harness
            .store
            .events(&sessions[0].id, &EventQuery::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.event_type == EventType::WorkflowStep));
        assert_eq!(events[0].id, event_id);
    }

    #[tokio::test]
    async fn test_stop_on_failure_skips_rest() {
        let harness = testing::harness_with(|registry| {
            registry.register(
                testing::descriptor("broken", PermissionLevel::Viewer),
                Arc::new(FailingTool),
            );
        })
        .await;
        let definition = WorkflowDefinition::new(
            "wf-stop",
            vec![
                tool_step("ok", json!("x")),
                failing_step("bad"),
                tool_step("never", json!("y")),
            ],
        );
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.step("ok").unwrap().status, StepStatus::Success);
        assert_eq!(result.step("bad").unwrap().status, StepStatus::Failed);
        assert_eq!(result.step("never").unwrap().status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_continue_on_failure_is_partial() {
        let harness = testing::harness_with(|registry| {
            registry.register(
                testing::descriptor("broken", PermissionLevel::Viewer),
                Arc::new(FailingTool),
            );
        })
        .await;
        let definition = WorkflowDefinition::new(
            "wf-continue",
            vec![
                tool_step("ok", json!("x")),
                failing_step("bad"),
                tool_step("also-ok", json!("y")),
            ],
        )
        .with_error_handling(ErrorHandling::ContinueOnFailure);
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Partial);
        assert_eq!(result.step("also-ok").unwrap().status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_unresolved_reference_fails_only_that_step() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-refs",
            vec![
                tool_step("ok", json!("x")),
                tool_step("bad-ref", json!("${context.missing}")),
                tool_step("fine", json!("y")),
            ],
        )
        .with_error_handling(ErrorHandling::ContinueOnFailure);
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Partial);
        let failed = result.step("bad-ref").unwrap();
        assert_eq!(failed.status, StepStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("missing"));
        assert_eq!(result.step("fine").unwrap().status, StepStatus::Success);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parallel_runs_all_steps() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-par",
            vec![
                sleep_step("a", 20),
                sleep_step("b", 20),
                sleep_step("c", 20),
            ],
        )
        .with_mode(ExecutionMode::Parallel);
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Success);
        assert!(result.steps.iter().all(|s| s.status == StepStatus::Success));
    }

    #[tokio::test]
    async fn test_parallel_rejects_step_references() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-par-ref",
            vec![
                tool_step("a", json!("x")),
                tool_step("b", json!("${steps.a.text}")),
            ],
        )
        .with_mode(ExecutionMode::Parallel);
        let err = run(&harness, &definition).await.unwrap_err();
        assert!(matches!(err, CasefileError::Configuration(_)));

        // Rejected before anything ran.
        assert_eq!(harness.store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_parallel_rejects_dependencies() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-par-dep",
            vec![
                tool_step("a", json!("x")),
                tool_step("b", json!("y")).depends_on(["a"]),
            ],
        )
        .with_mode(ExecutionMode::Parallel);
        let err = run(&harness, &definition).await.unwrap_err();
        assert!(matches!(err, CasefileError::Configuration(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dag_respects_dependencies() {
        let harness = testing::harness().await;
        // diamond: a -> (b, c) -> d
        let definition = WorkflowDefinition::new(
            "wf-dag",
            vec![
                tool_step("a", json!("root")),
                tool_step("b", json!("${steps.a.text}-b")).depends_on(["a"]),
                tool_step("c", json!("${steps.a.text}-c")).depends_on(["a"]),
                tool_step("d", json!("${steps.b.text}+${steps.c.text}")).depends_on(["b", "c"]),
            ],
        )
        .with_mode(ExecutionMode::Dag);
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Success);
        assert_eq!(
            result.step("d").unwrap().outputs["text"],
            json!("root-b+root-c")
        );
    }

    #[tokio::test]
    async fn test_dag_cycle_rejected_before_execution() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-cycle",
            vec![
                tool_step("a", json!("x")).depends_on(["b"]),
                tool_step("b", json!("y")).depends_on(["a"]),
            ],
        )
        .with_mode(ExecutionMode::Dag);
        let err = run(&harness, &definition).await.unwrap_err();
        assert!(matches!(err, CasefileError::Configuration(_)));
        assert!(err.to_string().contains("cycle"));
        assert_eq!(harness.store.session_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dag_skips_dependents_of_failed_step() {
        let harness = testing::harness_with(|registry| {
            registry.register(
                testing::descriptor("broken", PermissionLevel::Viewer),
                Arc::new(FailingTool),
            );
        })
        .await;
        let definition = WorkflowDefinition::new(
            "wf-dag-skip",
            vec![
                failing_step("bad"),
                tool_step("child", json!("x")).depends_on(["bad"]),
                tool_step("free", json!("y")),
            ],
        )
        .with_mode(ExecutionMode::Dag)
        .with_error_handling(ErrorHandling::ContinueOnFailure);
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Partial);
        assert_eq!(result.step("bad").unwrap().status, StepStatus::Failed);
        assert_eq!(result.step("child").unwrap().status, StepStatus::Skipped);
        assert_eq!(result.step("free").unwrap().status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_sequential_skips_dependents_of_failed_step() {
        let harness = testing::harness_with(|registry| {
            registry.register(
                testing::descriptor("broken", PermissionLevel::Viewer),
                Arc::new(FailingTool),
            );
        })
        .await;
        let definition = WorkflowDefinition::new(
            "wf-seq-skip",
            vec![
                failing_step("bad"),
                tool_step("child", json!("x")).depends_on(["bad"]),
                tool_step("free", json!("y")),
            ],
        )
        .with_error_handling(ErrorHandling::ContinueOnFailure);
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Partial);
        assert_eq!(result.step("bad").unwrap().status, StepStatus::Failed);
        assert_eq!(result.step("child").unwrap().status, StepStatus::Skipped);
        assert_eq!(result.step("free").unwrap().status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_step_timeout_is_timed_out_not_failed() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-step-timeout",
            vec![sleep_step("slow", 5_000).with_timeout_ms(50)],
        );
        let result = run(&harness, &definition).await.unwrap();

        let step = result.step("slow").unwrap();
        assert_eq!(step.status, StepStatus::TimedOut);
        assert!(step.error.as_deref().unwrap().contains("timed out"));
        // A lone step timeout is a step failure, not a run timeout.
        assert_eq!(result.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_timeout_skips_remaining() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-run-timeout",
            vec![sleep_step("slow", 5_000), sleep_step("later", 10)],
        )
        .with_timeout_ms(50);
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::TimedOut);
        assert_eq!(result.step("slow").unwrap().status, StepStatus::TimedOut);
        assert_eq!(result.step("later").unwrap().status, StepStatus::Skipped);
        assert!(result.error.as_deref().unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_everything() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-cancel",
            vec![tool_step("a", json!("x")), tool_step("b", json!("y"))],
        );
        let engine = WorkflowEngine::new(harness.dispatcher.clone());
        engine.cancellation_token().cancel();
        let result = engine
            .execute(&definition, &Map::new(), &scope())
            .await
            .unwrap();

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(result.steps.iter().all(|s| s.status == StepStatus::Skipped));
        assert!(result.error.as_deref().unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_nested_workflow_requires_flag() {
        let harness = testing::harness().await;
        let inner = WorkflowDefinition::new("inner", vec![tool_step("i", json!("x"))]);
        let definition = WorkflowDefinition::new(
            "wf-nest-denied",
            vec![WorkflowStep::new(
                "nested",
                OperationSpec::Workflow {
                    definition: inner,
                    context: Map::new(),
                },
            )],
        );
        let err = run(&harness, &definition).await.unwrap_err();
        assert!(matches!(err, CasefileError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_nested_workflow_runs_when_allowed() {
        let harness = testing::harness().await;
        let inner = WorkflowDefinition::new("inner", vec![tool_step("i", json!("deep"))]);
        let mut definition = WorkflowDefinition::new(
            "wf-nest",
            vec![WorkflowStep::new(
                "nested",
                OperationSpec::Workflow {
                    definition: inner,
                    context: Map::new(),
                },
            )],
        );
        definition.allow_nested_workflows = true;
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Success);
        let nested = result.step("nested").unwrap();
        assert_eq!(nested.status, StepStatus::Success);
        // The nested run's aggregate lands in the step outputs.
        assert_eq!(nested.outputs["status"], json!("success"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_nested_workflow_runs_on_spawned_step() {
        let harness = testing::harness().await;
        let inner = WorkflowDefinition::new("inner", vec![tool_step("i", json!("deep"))]);
        let mut definition = WorkflowDefinition::new(
            "wf-nest-dag",
            vec![
                tool_step("a", json!("x")),
                WorkflowStep::new(
                    "nested",
                    OperationSpec::Workflow {
                        definition: inner,
                        context: Map::new(),
                    },
                )
                .depends_on(["a"]),
            ],
        )
        .with_mode(ExecutionMode::Dag);
        definition.allow_nested_workflows = true;
        let result = run(&harness, &definition).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Success);
        assert_eq!(result.step("nested").unwrap().outputs["status"], json!("success"));
    }

    #[tokio::test]
    async fn test_nesting_depth_bound() {
        let harness = testing::harness().await;
        // Build a chain nested one level past the default bound of 3.
        let mut definition = WorkflowDefinition::new("level-4", vec![tool_step("leaf", json!("x"))]);
        for level in (1..=3).rev() {
            let mut outer = WorkflowDefinition::new(
                format!("level-{level}"),
                vec![WorkflowStep::new(
                    "down",
                    OperationSpec::Workflow {
                        definition,
                        context: Map::new(),
                    },
                )],
            );
            outer.allow_nested_workflows = true;
            definition = outer;
        }
        let result = run(&harness, &definition).await.unwrap();

        // The depth violation surfaces as a failure of the innermost step
        // that tried to cross the bound, not as a hard error.
        assert_ne!(result.status, WorkflowStatus::Success);
    }

    #[tokio::test]
    async fn test_steps_inherit_invoking_permission() {
        let harness = testing::harness_with(|registry| {
            registry.register(
                testing::descriptor("admin-only", PermissionLevel::Admin),
                Arc::new(testing::EchoTool),
            );
        })
        .await;
        let definition = WorkflowDefinition::new(
            "wf-privilege",
            vec![WorkflowStep::new(
                "escalate",
                OperationSpec::Tool {
                    name: "admin-only".to_string(),
                    parameters: Map::new(),
                },
            )],
        );
        // The run holds Editor from its invoking session; the step cannot
        // re-resolve a higher level.
        let engine = WorkflowEngine::new(harness.dispatcher.clone());
        let result = engine
            .execute(&definition, &Map::new(), &scope())
            .await
            .unwrap();

        let step = result.step("escalate").unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.error.as_deref().unwrap().contains("requires 'admin'"));
        assert_eq!(result.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_duplicate_step_id_rejected() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-dup",
            vec![tool_step("a", json!("x")), tool_step("a", json!("y"))],
        );
        let err = run(&harness, &definition).await.unwrap_err();
        assert!(matches!(err, CasefileError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_unknown_dependency_rejected() {
        let harness = testing::harness().await;
        let definition = WorkflowDefinition::new(
            "wf-unknown-dep",
            vec![tool_step("a", json!("x")).depends_on(["ghost"])],
        )
        .with_mode(ExecutionMode::Dag);
        let err = run(&harness, &definition).await.unwrap_err();
        assert!(matches!(err, CasefileError::Configuration(_)));
    }

    #[test]
    fn test_kahn_order_linearizes() {
        let definition = WorkflowDefinition::new(
            "wf",
            vec![
                WorkflowStep::new("c", OperationSpec::Tool {
                    name: "t".to_string(),
                    parameters: Map::new(),
                })
                .depends_on(["a", "b"]),
                WorkflowStep::new("a", OperationSpec::Tool {
                    name: "t".to_string(),
                    parameters: Map::new(),
                }),
                WorkflowStep::new("b", OperationSpec::Tool {
                    name: "t".to_string(),
                    parameters: Map::new(),
                })
                .depends_on(["a"]),
            ],
        );
        let order = kahn_order(&definition).unwrap();
        let pos = |id: &str| order.iter().position(|s| s == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }
}
