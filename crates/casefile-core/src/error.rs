//! Error types for the casefile orchestration core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The reason a bearer token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    /// The token's expiry timestamp is in the past.
    Expired,
    /// The token could not be parsed or is structurally invalid.
    Malformed,
    /// The token's signature does not verify against the service key.
    SignatureInvalid,
}

impl std::fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthErrorKind::Expired => write!(f, "expired"),
            AuthErrorKind::Malformed => write!(f, "malformed"),
            AuthErrorKind::SignatureInvalid => write!(f, "signature_invalid"),
        }
    }
}

/// A shared error type for the entire casefile core.
///
/// Only `Auth`, `NotFound`, `Forbidden`, `Configuration` and `Validation`
/// abort a dispatch call; failures inside a dispatched operation are captured
/// as failed audit events instead (see the dispatcher).
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum CasefileError {
    /// Bearer token rejected
    #[error("Authentication failed: {kind}")]
    Auth { kind: AuthErrorKind },

    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Caller's effective permission is below the required level
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Store unavailable or timed out; retriable with backoff
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Invalid workflow graph, bad reference, or bad engine configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request parameters failed schema validation
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A per-step or per-run deadline was exceeded
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Business failure inside a dispatched operation.
    ///
    /// The dispatcher catches this variant and converts it into a failed,
    /// recorded event; it never escapes `execute_operation`.
    #[error("Operation failed: {0}")]
    Operation(String),

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CasefileError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates an Auth error
    pub fn auth(kind: AuthErrorKind) -> Self {
        Self::Auth { kind }
    }

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates a Forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a TransientStore error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientStore(message.into())
    }

    /// Creates a Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a Timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Creates an Operation failure
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a Forbidden error
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Check if this error should be retried with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }

    /// Check if this is a Timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this error aborts a dispatch call.
    ///
    /// Everything else resolves to a structured, non-throwing result with
    /// `success = false`.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. }
                | Self::NotFound { .. }
                | Self::Forbidden { .. }
                | Self::Configuration(_)
                | Self::Validation(_)
        )
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for CasefileError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for CasefileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for CasefileError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for CasefileError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, CasefileError>`.
pub type Result<T> = std::result::Result<T, CasefileError>;
