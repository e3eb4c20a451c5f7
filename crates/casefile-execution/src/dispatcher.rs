//! The single entry point for executing operations against a casefile.
//!
//! Every dispatch follows the same pipeline: resolve the operation's minimum
//! permission, route through the permission router (which binds or creates
//! the session), run the backend, and record exactly one audit event for
//! tool and agent calls. Failures inside the dispatched operation are
//! captured in the result envelope with `success = false`; only
//! pre-condition failures (auth, permission, unknown tool, invalid
//! parameters) surface as errors, and those never create sessions or events.

use crate::workflow::{WorkflowEngine, WorkflowScope};
use casefile_application::router::{PermissionRouter, SessionContext};
use casefile_core::config::CoreConfig;
use casefile_core::error::{CasefileError, Result};
use casefile_core::operation::{
    validate_parameters, AgentBackend, ExecutionResult, OperationRequest, OperationSpec,
    ToolRegistry,
};
use casefile_core::permission::{PermissionCache, PermissionLevel};
use casefile_core::session::{EventStatus, EventType, NewExecutionEvent, SessionStore};
use casefile_core::workflow::WorkflowStatus;
use casefile_infrastructure::retry_with_backoff;
use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Routes operation requests to their backend and records the audit trail.
pub struct ExecutionDispatcher {
    router: Arc<PermissionRouter>,
    store: Arc<dyn SessionStore>,
    tools: Arc<dyn ToolRegistry>,
    agent: Arc<dyn AgentBackend>,
    config: CoreConfig,
}

impl ExecutionDispatcher {
    pub fn new(
        router: Arc<PermissionRouter>,
        store: Arc<dyn SessionStore>,
        tools: Arc<dyn ToolRegistry>,
        agent: Arc<dyn AgentBackend>,
        config: CoreConfig,
    ) -> Self {
        Self {
            router,
            store,
            tools,
            agent,
            config,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Executes one operation and returns the result envelope.
    ///
    /// # Arguments
    ///
    /// * `request` - The operation request to dispatch
    /// * `permission_cache` - Advisory cache from the caller's token, if any
    ///
    /// # Errors
    ///
    /// Returns an error only for pre-condition failures: unknown tools,
    /// invalid parameters, missing sessions, or insufficient permission.
    /// Failures while the operation runs are reported in the envelope.
    pub async fn execute_operation(
        self: &Arc<Self>,
        request: OperationRequest,
        permission_cache: Option<PermissionCache>,
    ) -> Result<ExecutionResult> {
        let cached_level = permission_cache
            .as_ref()
            .and_then(|cache| cache.get(&request.casefile_id));
        let casefile_id = request.casefile_id.clone();

        let (mut envelope, ctx) = self.execute_inner(request, cached_level, 1, None).await?;

        // Fold the authorization decision back into the caller's cache so the
        // refreshed token reflects it.
        let mut cache = permission_cache.unwrap_or_default();
        let now = Utc::now();
        if ctx.from_cache {
            cache.touch(&casefile_id, now);
        } else {
            cache.insert(
                casefile_id.as_str(),
                ctx.permission_level,
                now,
                self.config.permission_cache_max_entries,
            );
        }
        envelope.updated_permission_cache = cache.entries().to_vec();
        Ok(envelope)
    }

    /// Shared dispatch path for top-level calls and workflow steps.
    ///
    /// `depth` counts workflow nesting (a top-level workflow run is depth 1);
    /// `event_type_override` lets workflow steps record `WorkflowStep` events
    /// regardless of the operation kind they dispatch.
    ///
    /// Workflow steps recurse back into this path, so the future is boxed
    /// here; at the recursive call site only this nominal type is named.
    pub(crate) fn execute_inner<'a>(
        self: &'a Arc<Self>,
        request: OperationRequest,
        cached_level: Option<PermissionLevel>,
        depth: u32,
        event_type_override: Option<EventType>,
    ) -> Pin<Box<dyn Future<Output = Result<(ExecutionResult, SessionContext)>> + Send + 'a>> {
        Box::pin(self.dispatch_inner(request, cached_level, depth, event_type_override))
    }

    async fn dispatch_inner(
        self: &Arc<Self>,
        request: OperationRequest,
        cached_level: Option<PermissionLevel>,
        depth: u32,
        event_type_override: Option<EventType>,
    ) -> Result<(ExecutionResult, SessionContext)> {
        let operation_name = request.operation.operation_name();
        let operation_type = request.operation.operation_type();

        // Resolve the minimum permission (and fail invalid requests) before
        // touching the session store: a rejected dispatch must leave no trace.
        let resolved_tool = match &request.operation {
            OperationSpec::Tool { name, parameters } => {
                let tool = self.tools.resolve(name).await?;
                validate_parameters(&tool.descriptor.parameters, parameters)?;
                Some(tool)
            }
            OperationSpec::Agent { .. } => None,
            OperationSpec::Workflow { definition, .. } => {
                if depth > self.config.max_workflow_depth {
                    return Err(CasefileError::configuration(format!(
                        "workflow '{}' exceeds maximum nesting depth {}",
                        definition.workflow_id, self.config.max_workflow_depth
                    )));
                }
                None
            }
        };
        let minimum_permission = match &request.operation {
            OperationSpec::Tool { .. } => {
                resolved_tool
                    .as_ref()
                    .map(|t| t.descriptor.minimum_permission)
                    .unwrap_or(PermissionLevel::Owner)
            }
            OperationSpec::Agent { .. } => self.agent.minimum_permission(),
            OperationSpec::Workflow { definition, .. } => definition.minimum_permission,
        };

        let ctx = match &request.session_id {
            Some(session_id) => {
                self.router
                    .validate_existing_session(
                        &request.user_id,
                        &request.casefile_id,
                        session_id,
                        cached_level,
                        Some(minimum_permission),
                    )
                    .await?
            }
            None => {
                self.router
                    .validate_and_get_session(
                        &request.user_id,
                        &request.casefile_id,
                        request.effective_session_type(),
                        cached_level,
                        Some(minimum_permission),
                    )
                    .await?
            }
        };

        // Workflow runs record per-step events through this same path, so the
        // run itself writes none.
        if let OperationSpec::Workflow { definition, context } = &request.operation {
            let engine = WorkflowEngine::new(Arc::clone(self));
            let scope = WorkflowScope {
                user_id: request.user_id.clone(),
                casefile_id: request.casefile_id.clone(),
                permission_level: ctx.permission_level,
                depth,
            };
            let run = engine.execute(definition, context, &scope).await?;
            let success = run.status == WorkflowStatus::Success;
            let error = run.error.clone().or_else(|| {
                (!success).then(|| format!("workflow finished with status '{}'", run.status))
            });
            tracing::info!(
                target: "dispatch",
                request_id = %request.request_id,
                operation_type,
                operation_name = %operation_name,
                status = %run.status,
                duration_ms = run.duration_ms,
                "workflow dispatch complete"
            );
            let envelope = ExecutionResult {
                event_id: None,
                operation_type: operation_type.to_string(),
                operation_name,
                success,
                outputs: serde_json::to_value(&run)?,
                duration_ms: run.duration_ms,
                session_id: ctx.session.id.clone(),
                session_created: ctx.session_created,
                permission_level: ctx.permission_level,
                updated_permission_cache: Vec::new(),
                error,
            };
            return Ok((envelope, ctx));
        }

        let started_at = Utc::now();
        let (inputs, outcome) = match &request.operation {
            OperationSpec::Tool { parameters, .. } => {
                let tool = resolved_tool.as_ref().ok_or_else(|| {
                    CasefileError::internal("tool resolution lost before dispatch")
                })?;
                (
                    Value::Object(parameters.clone()),
                    tool.handler.invoke(parameters.clone()).await,
                )
            }
            OperationSpec::Agent {
                prompt,
                history,
                context,
            } => (
                json!({ "prompt": prompt, "history_len": history.len() }),
                self.agent
                    .send(prompt, history, context)
                    .await
                    .map(Value::String),
            ),
            OperationSpec::Workflow { .. } => unreachable!("workflow handled above"),
        };
        let completed_at = Utc::now();

        let (success, outputs, status, error) = match outcome {
            Ok(value) => (true, value, EventStatus::Success, None),
            Err(err) => {
                let status = if err.is_timeout() {
                    EventStatus::TimedOut
                } else {
                    EventStatus::Failed
                };
                tracing::warn!(
                    target: "dispatch",
                    request_id = %request.request_id,
                    operation_name = %operation_name,
                    error = %err,
                    "operation failed"
                );
                (false, Value::Null, status, Some(err.to_string()))
            }
        };

        let draft = NewExecutionEvent {
            event_type: event_type_override.unwrap_or_else(|| request.operation.event_type()),
            operation_name: operation_name.clone(),
            started_at,
            completed_at,
            inputs: truncate_snapshot(inputs, self.config.snapshot_max_bytes),
            outputs: truncate_snapshot(outputs.clone(), self.config.snapshot_max_bytes),
            success,
            status,
            error: error.clone(),
        };
        let session_id = ctx.session.id.clone();
        let event = retry_with_backoff(&self.config.retry, "event.append", || {
            self.store.append_event(&session_id, draft.clone())
        })
        .await?;

        tracing::info!(
            target: "dispatch",
            request_id = %request.request_id,
            operation_type,
            operation_name = %operation_name,
            success,
            duration_ms = event.duration_ms,
            "dispatch complete"
        );

        let envelope = ExecutionResult {
            event_id: Some(event.id.clone()),
            operation_type: operation_type.to_string(),
            operation_name,
            success,
            outputs,
            duration_ms: event.duration_ms,
            session_id,
            session_created: ctx.session_created,
            permission_level: ctx.permission_level,
            updated_permission_cache: Vec::new(),
            error,
        };
        Ok((envelope, ctx))
    }
}

/// Replaces oversized snapshots with a marker carrying a bounded preview.
fn truncate_snapshot(value: Value, max_bytes: usize) -> Value {
    let serialized = match serde_json::to_string(&value) {
        Ok(s) => s,
        Err(_) => return Value::Null,
    };
    if serialized.len() <= max_bytes {
        return value;
    }
    let preview: String = serialized.chars().take(256).collect();
    json!({
        "truncated": true,
        "original_bytes": serialized.len(),
        "preview": preview,
    })
}
