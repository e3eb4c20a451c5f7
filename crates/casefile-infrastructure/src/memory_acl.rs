//! In-memory ACL reader for composition roots and tests.
//!
//! Production deployments plug in a reader backed by the real casefile
//! service; this one holds a mutable snapshot so permission changes can be
//! exercised without that collaborator.

use async_trait::async_trait;
use casefile_core::error::{CasefileError, Result};
use casefile_core::permission::{CasefileAcl, CasefileAclReader, PermissionLevel};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A `CasefileAclReader` backed by an in-memory map.
#[derive(Default)]
pub struct MemoryAclReader {
    acls: RwLock<HashMap<String, CasefileAcl>>,
}

impl MemoryAclReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a casefile's ACL.
    pub async fn put(&self, acl: CasefileAcl) {
        let mut acls = self.acls.write().await;
        acls.insert(acl.casefile_id.clone(), acl);
    }

    /// Updates one user's grant on a casefile.
    ///
    /// Returns `NotFound` if the casefile is unknown.
    pub async fn set_grant(
        &self,
        casefile_id: &str,
        user_id: &str,
        level: PermissionLevel,
    ) -> Result<()> {
        let mut acls = self.acls.write().await;
        let acl = acls
            .get_mut(casefile_id)
            .ok_or_else(|| CasefileError::not_found("casefile", casefile_id))?;
        acl.entries.insert(user_id.to_string(), level);
        Ok(())
    }

    /// Removes a casefile entirely.
    pub async fn remove(&self, casefile_id: &str) {
        let mut acls = self.acls.write().await;
        acls.remove(casefile_id);
    }
}

#[async_trait]
impl CasefileAclReader for MemoryAclReader {
    async fn get(&self, casefile_id: &str) -> Result<CasefileAcl> {
        let acls = self.acls.read().await;
        acls.get(casefile_id)
            .cloned()
            .ok_or_else(|| CasefileError::not_found("casefile", casefile_id))
    }
}
