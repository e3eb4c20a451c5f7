//! Tool registry seam.
//!
//! Tools are registered once during explicit startup composition and looked
//! up read-only at dispatch time; nothing here is populated by import-order
//! side effects.

use super::params::ParameterSpec;
use crate::error::{CasefileError, Result};
use crate::permission::PermissionLevel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Static description of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Minimum permission level a session needs to invoke this tool
    pub minimum_permission: PermissionLevel,
    /// Declared parameter schema, consulted before dispatch
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

/// The callable side of a registered tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invokes the tool with already-validated parameters.
    ///
    /// Business failures should be returned as `CasefileError::Operation`;
    /// the dispatcher records them as failed events rather than raising.
    async fn invoke(&self, parameters: Map<String, Value>) -> Result<Value>;
}

/// A descriptor paired with its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Read-only lookup of registered tools.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Resolves a tool by name; `NotFound` when unregistered.
    async fn resolve(&self, name: &str) -> Result<RegisteredTool>;

    /// Lists the descriptors of every registered tool.
    async fn descriptors(&self) -> Vec<ToolDescriptor>;
}

/// An in-memory registry populated once at composition time.
#[derive(Default)]
pub struct StaticToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any previous registration of the name.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                handler,
            },
        );
    }

    /// Builder-style registration for composition roots.
    pub fn with_tool(
        mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        self.register(descriptor, handler);
        self
    }
}

#[async_trait]
impl ToolRegistry for StaticToolRegistry {
    async fn resolve(&self, name: &str) -> Result<RegisteredTool> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| CasefileError::not_found("tool", name))
    }

    async fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }
}
