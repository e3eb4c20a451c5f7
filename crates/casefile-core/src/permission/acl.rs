//! Read-only view of a casefile's access-control list.
//!
//! The authoritative permission store lives outside this core; we only ever
//! consume it through [`CasefileAclReader`].

use super::level::PermissionLevel;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A snapshot of one casefile's access-control list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasefileAcl {
    /// The casefile this ACL belongs to
    pub casefile_id: String,
    /// User ID of the casefile owner
    pub owner_id: String,
    /// Explicit per-user grants
    #[serde(default)]
    pub entries: HashMap<String, PermissionLevel>,
    /// Default access level for users without an explicit grant
    #[serde(default = "default_public_access")]
    pub public_access: PermissionLevel,
}

fn default_public_access() -> PermissionLevel {
    PermissionLevel::None
}

impl CasefileAcl {
    /// Computes the effective permission level for a user.
    ///
    /// The owner always maps to the top level; everyone else gets the max of
    /// their explicit grant and the casefile's public access level.
    pub fn effective_permission(&self, user_id: &str) -> PermissionLevel {
        if user_id == self.owner_id {
            return PermissionLevel::Owner;
        }
        let explicit = self
            .entries
            .get(user_id)
            .copied()
            .unwrap_or(PermissionLevel::None);
        explicit.max(self.public_access)
    }
}

/// An abstract reader for casefile ACLs.
///
/// Implementations are expected to return `CasefileError::NotFound` when the
/// casefile does not exist, and `CasefileError::TransientStore` for outages
/// that are worth retrying.
#[async_trait]
pub trait CasefileAclReader: Send + Sync {
    /// Reads the current ACL for a casefile.
    async fn get(&self, casefile_id: &str) -> Result<CasefileAcl>;
}
