//! Conversational backend seam.

use crate::error::Result;
use crate::permission::PermissionLevel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One message of an agent conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// "user", "assistant", or "system"
    pub role: String,
    pub content: String,
}

impl AgentMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// External conversational backend.
///
/// The model itself is out of scope here; the dispatcher only forwards the
/// prompt plus history and captures the reply as the operation output.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Sends one turn to the backend and returns its reply.
    async fn send(
        &self,
        prompt: &str,
        history: &[AgentMessage],
        context: &Map<String, Value>,
    ) -> Result<String>;

    /// Minimum permission level a session needs for agent turns.
    fn minimum_permission(&self) -> PermissionLevel {
        PermissionLevel::Viewer
    }
}
