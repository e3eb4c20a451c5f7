//! Dispatch hooks: policy-scoped observers around operation execution.
//!
//! Hooks run outside the dispatcher pipeline. A before-hook may veto the
//! dispatch (nothing executes and no session is touched); after-hooks observe
//! the result envelope and cannot change it.

use crate::dispatcher::ExecutionDispatcher;
use async_trait::async_trait;
use casefile_core::error::Result;
use casefile_core::operation::{ExecutionResult, OperationRequest, OperationSpec};
use casefile_core::permission::PermissionCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observer around operation dispatch.
#[async_trait]
pub trait DispatchHook: Send + Sync {
    fn name(&self) -> &str;

    /// Runs before the dispatch; returning an error vetoes it.
    async fn before_dispatch(&self, _request: &OperationRequest) -> Result<()> {
        Ok(())
    }

    /// Runs after the dispatch with the final envelope.
    async fn after_dispatch(&self, _request: &OperationRequest, _result: &ExecutionResult) {}
}

/// Which operation kinds a hook fires for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookPolicy {
    pub tools: bool,
    pub agents: bool,
    pub workflows: bool,
}

impl HookPolicy {
    pub fn all() -> Self {
        Self {
            tools: true,
            agents: true,
            workflows: true,
        }
    }

    pub fn only_tools() -> Self {
        Self {
            tools: true,
            agents: false,
            workflows: false,
        }
    }

    pub fn applies_to(&self, operation: &OperationSpec) -> bool {
        match operation {
            OperationSpec::Tool { .. } => self.tools,
            OperationSpec::Agent { .. } => self.agents,
            OperationSpec::Workflow { .. } => self.workflows,
        }
    }
}

/// A dispatcher wrapped with an ordered hook chain.
pub struct HookedDispatcher {
    inner: Arc<ExecutionDispatcher>,
    hooks: Vec<(HookPolicy, Arc<dyn DispatchHook>)>,
}

impl HookedDispatcher {
    pub fn new(inner: Arc<ExecutionDispatcher>) -> Self {
        Self {
            inner,
            hooks: Vec::new(),
        }
    }

    /// Appends a hook; hooks fire in registration order.
    pub fn with_hook(mut self, policy: HookPolicy, hook: Arc<dyn DispatchHook>) -> Self {
        self.hooks.push((policy, hook));
        self
    }

    /// Executes an operation through the hook chain.
    ///
    /// # Errors
    ///
    /// Propagates a before-hook veto or any dispatcher pre-condition failure.
    pub async fn execute_operation(
        &self,
        request: OperationRequest,
        permission_cache: Option<PermissionCache>,
    ) -> Result<ExecutionResult> {
        for (policy, hook) in &self.hooks {
            if !policy.applies_to(&request.operation) {
                continue;
            }
            if let Err(err) = hook.before_dispatch(&request).await {
                tracing::warn!(
                    target: "hooks",
                    hook = hook.name(),
                    request_id = %request.request_id,
                    error = %err,
                    "dispatch vetoed by hook"
                );
                return Err(err);
            }
        }

        let result = self
            .inner
            .execute_operation(request.clone(), permission_cache)
            .await?;

        for (policy, hook) in &self.hooks {
            if policy.applies_to(&request.operation) {
                hook.after_dispatch(&request, &result).await;
            }
        }
        Ok(result)
    }
}

/// Counter snapshot from a [`MetricsHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchCounters {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Counts dispatches and their outcomes.
#[derive(Default)]
pub struct MetricsHook {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl MetricsHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DispatchCounters {
        DispatchCounters {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl DispatchHook for MetricsHook {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn before_dispatch(&self, _request: &OperationRequest) -> Result<()> {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn after_dispatch(&self, _request: &OperationRequest, result: &ExecutionResult) {
        if result.success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Emits one structured audit line per dispatch.
pub struct AuditHook;

#[async_trait]
impl DispatchHook for AuditHook {
    fn name(&self) -> &str {
        "audit"
    }

    async fn after_dispatch(&self, request: &OperationRequest, result: &ExecutionResult) {
        tracing::info!(
            target: "audit",
            request_id = %request.request_id,
            user_id = %request.user_id,
            casefile_id = %request.casefile_id,
            operation_type = %result.operation_type,
            operation_name = %result.operation_name,
            session_id = %result.session_id,
            success = result.success,
            duration_ms = result.duration_ms,
            "operation dispatched"
        );
    }
}
