//! Permission levels, casefile ACLs, and the token-embedded permission cache.

pub mod acl;
pub mod cache;
pub mod level;

pub use acl::{CasefileAcl, CasefileAclReader};
pub use cache::{PermissionCache, PermissionCacheEntry};
pub use level::PermissionLevel;
