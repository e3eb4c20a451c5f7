//! Permission routing: validate casefile access, resolve the effective
//! level, and get-or-create the session.
//!
//! The get-or-create step always goes through the store's atomic
//! `conditional_create`; the router never reads then writes, so concurrent
//! first calls for one key cannot race into duplicate sessions.

use casefile_core::config::RetryConfig;
use casefile_core::error::{CasefileError, Result};
use casefile_core::permission::{CasefileAclReader, PermissionLevel};
use casefile_core::session::{Session, SessionKey, SessionStore, SessionType};
use casefile_infrastructure::retry_with_backoff;
use chrono::Utc;
use std::sync::Arc;

/// The validated context a dispatch call runs under.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session: Session,
    /// Effective permission the call was authorized at
    pub permission_level: PermissionLevel,
    /// Whether this call created the session
    pub session_created: bool,
    /// Whether the permission decision came from the token cache
    pub from_cache: bool,
}

impl SessionContext {
    pub fn session_id(&self) -> &str {
        &self.session.id
    }
}

/// Validates casefile access and resolves sessions.
pub struct PermissionRouter {
    acl_reader: Arc<dyn CasefileAclReader>,
    store: Arc<dyn SessionStore>,
    retry: RetryConfig,
}

impl PermissionRouter {
    pub fn new(
        acl_reader: Arc<dyn CasefileAclReader>,
        store: Arc<dyn SessionStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            acl_reader,
            store,
            retry,
        }
    }

    /// Resolves the effective permission level for a user on a casefile.
    ///
    /// A supplied `cached_permission` is trusted as the fast path and skips
    /// the ACL read entirely. Otherwise the authoritative ACL is consulted;
    /// a user with no access at all gets `Forbidden`.
    ///
    /// Returns the level and whether it came from the cache.
    pub async fn resolve_permission(
        &self,
        user_id: &str,
        casefile_id: &str,
        cached_permission: Option<PermissionLevel>,
    ) -> Result<(PermissionLevel, bool)> {
        if let Some(level) = cached_permission {
            tracing::debug!(
                target: "permission",
                user_id,
                casefile_id,
                level = %level,
                "permission cache fast path"
            );
            return Ok((level, true));
        }

        let acl = retry_with_backoff(&self.retry, "acl.get", || {
            self.acl_reader.get(casefile_id)
        })
        .await?;

        let level = acl.effective_permission(user_id);
        if !level.grants_access() {
            tracing::warn!(
                target: "permission",
                user_id,
                casefile_id,
                "access denied: no grant, not owner, casefile not public"
            );
            return Err(CasefileError::forbidden(format!(
                "user '{user_id}' has no access to casefile '{casefile_id}'"
            )));
        }
        Ok((level, false))
    }

    /// Validates access and returns the live session for the key, creating
    /// one atomically if needed.
    ///
    /// When `required` is given, the minimum-permission check happens before
    /// the store is touched: a forbidden call never creates a session.
    pub async fn validate_and_get_session(
        &self,
        user_id: &str,
        casefile_id: &str,
        session_type: SessionType,
        cached_permission: Option<PermissionLevel>,
        required: Option<PermissionLevel>,
    ) -> Result<SessionContext> {
        let (level, from_cache) = self
            .resolve_permission(user_id, casefile_id, cached_permission)
            .await?;

        if let Some(required) = required {
            if !level.satisfies(required) {
                tracing::warn!(
                    target: "permission",
                    user_id,
                    casefile_id,
                    level = %level,
                    required = %required,
                    "operation rejected below minimum permission"
                );
                return Err(CasefileError::forbidden(format!(
                    "operation requires '{required}', user '{user_id}' has '{level}'"
                )));
            }
        }

        let key = SessionKey::new(user_id, casefile_id, session_type);
        let (session, session_created) =
            retry_with_backoff(&self.retry, "session.conditional_create", || {
                self.store.conditional_create(&key)
            })
            .await?;

        tracing::debug!(
            target: "permission",
            user_id,
            casefile_id,
            session_id = %session.id,
            session_created,
            "validated session context"
        );

        Ok(SessionContext {
            session,
            permission_level: level,
            session_created,
            from_cache,
        })
    }

    /// Validates access against an explicitly named session.
    ///
    /// The session must exist, still be live, and belong to the requesting
    /// user and casefile; on success it is touched like any other dispatch.
    pub async fn validate_existing_session(
        &self,
        user_id: &str,
        casefile_id: &str,
        session_id: &str,
        cached_permission: Option<PermissionLevel>,
        required: Option<PermissionLevel>,
    ) -> Result<SessionContext> {
        let (level, from_cache) = self
            .resolve_permission(user_id, casefile_id, cached_permission)
            .await?;

        if let Some(required) = required {
            if !level.satisfies(required) {
                tracing::warn!(
                    target: "permission",
                    user_id,
                    casefile_id,
                    session_id,
                    level = %level,
                    required = %required,
                    "operation rejected below minimum permission"
                );
                return Err(CasefileError::forbidden(format!(
                    "operation requires '{required}', user '{user_id}' has '{level}'"
                )));
            }
        }

        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| CasefileError::not_found("session", session_id))?;
        if session.user_id != user_id || session.casefile_id != casefile_id {
            return Err(CasefileError::forbidden(format!(
                "session '{session_id}' does not belong to user '{user_id}' on casefile '{casefile_id}'"
            )));
        }
        // Closed and expired sessions take no further operations.
        if !session.is_live(Utc::now()) {
            tracing::debug!(
                target: "permission",
                user_id,
                session_id,
                "dispatch to a session that is no longer live"
            );
            return Err(CasefileError::not_found("session", session_id));
        }

        let session = retry_with_backoff(&self.retry, "session.touch", || {
            self.store.touch(session_id)
        })
        .await?;

        Ok(SessionContext {
            session,
            permission_level: level,
            session_created: false,
            from_cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use casefile_core::permission::CasefileAcl;
    use casefile_core::session::{EventQuery, ExecutionEvent, NewExecutionEvent, SessionFilter};
    use casefile_infrastructure::{MemoryAclReader, MemorySessionStore};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn acl(casefile_id: &str) -> CasefileAcl {
        let mut entries = HashMap::new();
        entries.insert("alice".to_string(), PermissionLevel::Editor);
        CasefileAcl {
            casefile_id: casefile_id.to_string(),
            owner_id: "olivia".to_string(),
            entries,
            public_access: PermissionLevel::None,
        }
    }

    async fn router() -> (PermissionRouter, Arc<MemoryAclReader>, Arc<MemorySessionStore>) {
        let reader = Arc::new(MemoryAclReader::new());
        reader.put(acl("cf-1")).await;
        let store = Arc::new(MemorySessionStore::new());
        let router = PermissionRouter::new(reader.clone(), store.clone(), RetryConfig::default());
        (router, reader, store)
    }

    #[tokio::test]
    async fn test_get_or_create_session() {
        let (router, _, _) = router().await;
        let ctx = router
            .validate_and_get_session("alice", "cf-1", SessionType::Interactive, None, None)
            .await
            .unwrap();
        assert!(ctx.session_created);
        assert_eq!(ctx.permission_level, PermissionLevel::Editor);

        let again = router
            .validate_and_get_session("alice", "cf-1", SessionType::Interactive, None, None)
            .await
            .unwrap();
        assert!(!again.session_created);
        assert_eq!(again.session_id(), ctx.session_id());
    }

    #[tokio::test]
    async fn test_unknown_casefile_is_not_found() {
        let (router, _, _) = router().await;
        let err = router
            .validate_and_get_session("alice", "cf-404", SessionType::Interactive, None, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stranger_is_forbidden() {
        let (router, _, store) = router().await;
        let err = router
            .validate_and_get_session("mallory", "cf-1", SessionType::Interactive, None, None)
            .await
            .unwrap_err();
        assert!(err.is_forbidden());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_required_level_checked_before_session_creation() {
        let (router, _, store) = router().await;
        let err = router
            .validate_and_get_session(
                "alice",
                "cf-1",
                SessionType::Interactive,
                None,
                Some(PermissionLevel::Owner),
            )
            .await
            .unwrap_err();
        assert!(err.is_forbidden());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_cached_permission_skips_acl() {
        let (router, reader, _) = router().await;
        // Remove the casefile entirely: only the cache can authorize now.
        reader.remove("cf-1").await;
        let ctx = router
            .validate_and_get_session(
                "alice",
                "cf-1",
                SessionType::Interactive,
                Some(PermissionLevel::Viewer),
                None,
            )
            .await
            .unwrap();
        assert!(ctx.from_cache);
        assert_eq!(ctx.permission_level, PermissionLevel::Viewer);
    }

    #[tokio::test]
    async fn test_downgrade_visible_on_next_authoritative_lookup() {
        let (router, reader, _) = router().await;
        let first = router
            .resolve_permission("alice", "cf-1", None)
            .await
            .unwrap();
        assert_eq!(first.0, PermissionLevel::Editor);

        reader
            .set_grant("cf-1", "alice", PermissionLevel::Viewer)
            .await
            .unwrap();

        let second = router
            .resolve_permission("alice", "cf-1", None)
            .await
            .unwrap();
        assert_eq!(second.0, PermissionLevel::Viewer);
    }

    #[tokio::test]
    async fn test_closed_session_rejected_by_id() {
        let (router, _, store) = router().await;
        let ctx = router
            .validate_and_get_session("alice", "cf-1", SessionType::Interactive, None, None)
            .await
            .unwrap();
        store.close(ctx.session_id()).await.unwrap();

        let err = router
            .validate_existing_session("alice", "cf-1", ctx.session_id(), None, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_owner_always_top_level() {
        let (router, _, _) = router().await;
        let (level, _) = router
            .resolve_permission("olivia", "cf-1", None)
            .await
            .unwrap();
        assert_eq!(level, PermissionLevel::Owner);
    }

    /// A store whose conditional_create fails transiently N times.
    struct FlakyStore {
        inner: MemorySessionStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn conditional_create(&self, key: &SessionKey) -> Result<(Session, bool)> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CasefileError::transient("store hiccup"));
            }
            self.inner.conditional_create(key).await
        }

        async fn get(&self, session_id: &str) -> Result<Option<Session>> {
            self.inner.get(session_id).await
        }

        async fn touch(&self, session_id: &str) -> Result<Session> {
            self.inner.touch(session_id).await
        }

        async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
            self.inner.list(filter).await
        }

        async fn close(&self, session_id: &str) -> Result<Session> {
            self.inner.close(session_id).await
        }

        async fn append_event(
            &self,
            session_id: &str,
            event: NewExecutionEvent,
        ) -> Result<ExecutionEvent> {
            self.inner.append_event(session_id, event).await
        }

        async fn events(
            &self,
            session_id: &str,
            query: &EventQuery,
        ) -> Result<Vec<ExecutionEvent>> {
            self.inner.events(session_id, query).await
        }
    }

    #[tokio::test]
    async fn test_transient_store_failures_are_retried() {
        let reader = Arc::new(MemoryAclReader::new());
        reader.put(acl("cf-1")).await;
        let store = Arc::new(FlakyStore {
            inner: MemorySessionStore::new(),
            failures_left: AtomicU32::new(2),
        });
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let router = PermissionRouter::new(reader, store, retry);

        let ctx = router
            .validate_and_get_session("alice", "cf-1", SessionType::Interactive, None, None)
            .await
            .unwrap();
        assert!(ctx.session_created);
    }

    #[tokio::test]
    async fn test_transient_failures_escalate_after_retries() {
        let reader = Arc::new(MemoryAclReader::new());
        reader.put(acl("cf-1")).await;
        let store = Arc::new(FlakyStore {
            inner: MemorySessionStore::new(),
            failures_left: AtomicU32::new(10),
        });
        let retry = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let router = PermissionRouter::new(reader, store, retry);

        let err = router
            .validate_and_get_session("alice", "cf-1", SessionType::Interactive, None, None)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
