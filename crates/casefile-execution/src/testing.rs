//! Shared fixtures for dispatcher and workflow tests.

use crate::dispatcher::ExecutionDispatcher;
use async_trait::async_trait;
use casefile_application::router::PermissionRouter;
use casefile_core::config::CoreConfig;
use casefile_core::error::{CasefileError, Result};
use casefile_core::operation::{
    AgentBackend, AgentMessage, ParamType, ParameterSpec, StaticToolRegistry, ToolDescriptor,
    ToolHandler,
};
use casefile_core::permission::{CasefileAcl, PermissionLevel};
use casefile_infrastructure::{MemoryAclReader, MemorySessionStore};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Harness {
    pub dispatcher: Arc<ExecutionDispatcher>,
    pub store: Arc<MemorySessionStore>,
    pub router: Arc<PermissionRouter>,
}

/// Standard fixture: casefile `cf-1` owned by olivia, alice as editor,
/// public viewer access, and an `echo` tool requiring a `text` parameter.
pub(crate) async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub(crate) async fn harness_with(extra: impl FnOnce(&mut StaticToolRegistry)) -> Harness {
    harness_with_config(CoreConfig::default(), extra).await
}

pub(crate) async fn harness_with_config(
    config: CoreConfig,
    extra: impl FnOnce(&mut StaticToolRegistry),
) -> Harness {
    let reader = Arc::new(MemoryAclReader::new());
    reader
        .put(CasefileAcl {
            casefile_id: "cf-1".to_string(),
            owner_id: "olivia".to_string(),
            entries: HashMap::from([("alice".to_string(), PermissionLevel::Editor)]),
            public_access: PermissionLevel::Viewer,
        })
        .await;

    let mut registry = StaticToolRegistry::new();
    registry.register(
        ToolDescriptor {
            name: "echo".to_string(),
            description: "returns its parameters".to_string(),
            minimum_permission: PermissionLevel::Viewer,
            parameters: vec![ParameterSpec::required("text", ParamType::string())],
        },
        Arc::new(EchoTool),
    );
    registry.register(
        ToolDescriptor {
            name: "sleep".to_string(),
            description: "sleeps for the ms parameter".to_string(),
            minimum_permission: PermissionLevel::Viewer,
            parameters: vec![ParameterSpec::optional("ms", ParamType::integer())],
        },
        Arc::new(SleepTool),
    );
    extra(&mut registry);

    let store = Arc::new(MemorySessionStore::new());
    let router = Arc::new(PermissionRouter::new(
        reader,
        store.clone(),
        config.retry,
    ));
    let dispatcher = Arc::new(ExecutionDispatcher::new(
        router.clone(),
        store.clone(),
        Arc::new(registry),
        Arc::new(EchoAgent),
        config,
    ));
    Harness {
        dispatcher,
        store,
        router,
    }
}

pub(crate) fn descriptor(name: &str, minimum_permission: PermissionLevel) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: String::new(),
        minimum_permission,
        parameters: Vec::new(),
    }
}

pub(crate) fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub(crate) struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn invoke(&self, parameters: Map<String, Value>) -> Result<Value> {
        Ok(Value::Object(parameters))
    }
}

pub(crate) struct FailingTool;

#[async_trait]
impl ToolHandler for FailingTool {
    async fn invoke(&self, _parameters: Map<String, Value>) -> Result<Value> {
        Err(CasefileError::operation("boom"))
    }
}

/// Sleeps for the `ms` parameter (default 50) before returning.
pub(crate) struct SleepTool;

#[async_trait]
impl ToolHandler for SleepTool {
    async fn invoke(&self, parameters: Map<String, Value>) -> Result<Value> {
        let ms = parameters.get("ms").and_then(|v| v.as_u64()).unwrap_or(50);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept": ms }))
    }
}

/// Returns a timeout error without sleeping.
pub(crate) struct SleepyTool {
    pub fail_timeout: bool,
}

#[async_trait]
impl ToolHandler for SleepyTool {
    async fn invoke(&self, _parameters: Map<String, Value>) -> Result<Value> {
        if self.fail_timeout {
            Err(CasefileError::timeout("backend deadline elapsed"))
        } else {
            Ok(Value::Null)
        }
    }
}

pub(crate) struct EchoAgent;

#[async_trait]
impl AgentBackend for EchoAgent {
    async fn send(
        &self,
        prompt: &str,
        _history: &[AgentMessage],
        _context: &Map<String, Value>,
    ) -> Result<String> {
        Ok(format!("reply to: {prompt}"))
    }
}
