//! Operation envelopes and the seams to execution backends.
//!
//! The dispatcher consumes an [`OperationRequest`], routes it to one of the
//! three backends (tool registry, agent backend, workflow engine) and returns
//! an [`ExecutionResult`] envelope.

pub mod agent;
pub mod params;
pub mod registry;

pub use agent::{AgentBackend, AgentMessage};
pub use params::{validate_parameters, ParamType, ParameterSpec};
pub use registry::{RegisteredTool, StaticToolRegistry, ToolDescriptor, ToolHandler, ToolRegistry};

use crate::permission::{PermissionCacheEntry, PermissionLevel};
use crate::session::{EventType, SessionType};
use crate::workflow::WorkflowDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The operation payload of a request, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation_type", rename_all = "snake_case")]
pub enum OperationSpec {
    /// A single registered tool call.
    Tool {
        name: String,
        #[serde(default)]
        parameters: Map<String, Value>,
    },
    /// One conversational-agent turn.
    Agent {
        prompt: String,
        #[serde(default)]
        history: Vec<AgentMessage>,
        #[serde(default)]
        context: Map<String, Value>,
    },
    /// A multi-step workflow run.
    Workflow {
        definition: WorkflowDefinition,
        /// Externally supplied values for `${context.<key>}` references
        #[serde(default)]
        context: Map<String, Value>,
    },
}

impl OperationSpec {
    /// Human-readable operation name for audit records.
    pub fn operation_name(&self) -> String {
        match self {
            OperationSpec::Tool { name, .. } => name.clone(),
            OperationSpec::Agent { .. } => "agent".to_string(),
            OperationSpec::Workflow { definition, .. } => definition.workflow_id.clone(),
        }
    }

    /// Wire tag of the operation kind.
    pub fn operation_type(&self) -> &'static str {
        match self {
            OperationSpec::Tool { .. } => "tool",
            OperationSpec::Agent { .. } => "agent",
            OperationSpec::Workflow { .. } => "workflow",
        }
    }

    /// The event type a top-level dispatch of this operation records.
    pub fn event_type(&self) -> EventType {
        match self {
            OperationSpec::Tool { .. } => EventType::ToolExecution,
            OperationSpec::Agent { .. } => EventType::AgentResponse,
            OperationSpec::Workflow { .. } => EventType::WorkflowStep,
        }
    }

    /// Default session type when the request does not name one.
    pub fn default_session_type(&self) -> SessionType {
        match self {
            OperationSpec::Tool { .. } => SessionType::Interactive,
            OperationSpec::Agent { .. } => SessionType::Chat,
            OperationSpec::Workflow { .. } => SessionType::Workflow,
        }
    }
}

/// The inbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub request_id: String,
    pub user_id: String,
    pub casefile_id: String,
    /// Reuse an existing session instead of the per-key live one
    #[serde(default)]
    pub session_id: Option<String>,
    /// Session type to bind; defaults per operation kind
    #[serde(default)]
    pub session_type: Option<SessionType>,
    pub operation: OperationSpec,
}

impl OperationRequest {
    /// Builds a request with a fresh request id.
    pub fn new(
        user_id: impl Into<String>,
        casefile_id: impl Into<String>,
        operation: OperationSpec,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            casefile_id: casefile_id.into(),
            session_id: None,
            session_type: None,
            operation,
        }
    }

    /// The session type this request binds to.
    pub fn effective_session_type(&self) -> SessionType {
        self.session_type
            .unwrap_or_else(|| self.operation.default_session_type())
    }
}

/// The outbound result envelope.
///
/// Dispatch failures inside the operation are reported here with
/// `success = false`; only pre-condition failures raise errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Recorded audit event, when one was written at this level.
    ///
    /// Workflow runs record per-step events instead and leave this empty.
    #[serde(default)]
    pub event_id: Option<String>,
    pub operation_type: String,
    pub operation_name: String,
    pub success: bool,
    pub outputs: Value,
    pub duration_ms: u64,
    pub session_id: String,
    pub session_created: bool,
    /// Permission level the call was authorized at
    pub permission_level: PermissionLevel,
    /// Refreshed permission cache to fold back into the caller's token
    #[serde(default)]
    pub updated_permission_cache: Vec<PermissionCacheEntry>,
    /// Error detail when `success` is false
    #[serde(default)]
    pub error: Option<String>,
}
