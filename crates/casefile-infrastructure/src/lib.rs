//! Infrastructure implementations of the casefile core contracts.
//!
//! Provides two `SessionStore` backends (in-memory and TOML-file directory),
//! an in-memory ACL reader for composition and tests, and the bounded
//! retry/backoff helper used around transient store failures.

pub mod dir_store;
pub mod memory_acl;
pub mod memory_store;
pub mod retry;

pub use dir_store::DirSessionStore;
pub use memory_acl::MemoryAclReader;
pub use memory_store::MemorySessionStore;
pub use retry::retry_with_backoff;
