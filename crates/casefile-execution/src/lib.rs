//! Execution dispatch for casefile sessions.
//!
//! Everything an operation needs to run lives here: the dispatcher that
//! routes tool, agent, and workflow requests through permission validation
//! and audit recording, the workflow engine, the hook chain, and a tracing
//! layer for streaming dispatch activity.

pub mod dispatcher;
pub mod hooks;
pub mod tracing_layer;
pub mod workflow;

mod refs;
#[cfg(test)]
mod testing;

pub use dispatcher::ExecutionDispatcher;
pub use hooks::{
    AuditHook, DispatchCounters, DispatchHook, HookPolicy, HookedDispatcher, MetricsHook,
};
pub use tracing_layer::{DispatchEvent, DispatchEventLayer};
pub use workflow::{WorkflowEngine, WorkflowScope};
