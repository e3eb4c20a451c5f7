//! Casefile orchestration core: domain models and collaborator contracts.
//!
//! Everything stateful or effectful lives behind traits (`SessionStore`,
//! `CasefileAclReader`, `ToolRegistry`, `AgentBackend`); this crate only
//! defines the entities, envelopes, and invariants the other crates build on.

pub mod config;
pub mod error;
pub mod operation;
pub mod permission;
pub mod session;
pub mod workflow;

// Re-export common error type
pub use error::{AuthErrorKind, CasefileError, Result};
