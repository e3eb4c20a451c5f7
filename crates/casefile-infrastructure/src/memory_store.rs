//! In-memory session store.
//!
//! All mutations take the single write guard, which is what makes
//! `conditional_create` and sequence allocation atomic: concurrent first
//! calls for one key serialize on the lock, and exactly one of them creates.

use async_trait::async_trait;
use casefile_core::error::{CasefileError, Result};
use casefile_core::session::{
    EventQuery, ExecutionEvent, NewExecutionEvent, Session, SessionFilter, SessionKey,
    SessionStore,
};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

struct SessionRecord {
    session: Session,
    events: Vec<ExecutionEvent>,
}

#[derive(Default)]
struct StoreInner {
    /// All sessions by id, live or not
    sessions: HashMap<String, SessionRecord>,
    /// Index from uniqueness key to the current session id for that key
    by_key: HashMap<SessionKey, String>,
}

/// A `SessionStore` backed by process memory.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<StoreInner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions (live or not), for tests and diagnostics.
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn conditional_create(&self, key: &SessionKey) -> Result<(Session, bool)> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        if let Some(existing_id) = inner.by_key.get(key).cloned() {
            if let Some(record) = inner.sessions.get_mut(&existing_id) {
                if record.session.is_live(now) {
                    record.session.touch(now);
                    return Ok((record.session.clone(), false));
                }
                // Expired sessions stay in the log but stop being the live
                // session for their key.
                record.session.active = false;
            }
        }

        let session = Session::new(key, now);
        inner.by_key.insert(key.clone(), session.id.clone());
        inner.sessions.insert(
            session.id.clone(),
            SessionRecord {
                session: session.clone(),
                events: Vec::new(),
            },
        );
        tracing::debug!(
            target: "session_store",
            session_id = %session.id,
            casefile_id = %key.casefile_id,
            user_id = %key.user_id,
            "created session"
        );
        Ok((session, true))
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(session_id).map(|r| r.session.clone()))
    }

    async fn touch(&self, session_id: &str) -> Result<Session> {
        let mut inner = self.inner.write().await;
        let record = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CasefileError::not_found("session", session_id))?;
        record.session.touch(Utc::now());
        Ok(record.session.clone())
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|r| filter.matches(&r.session, now))
            .map(|r| r.session.clone())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn close(&self, session_id: &str) -> Result<Session> {
        let mut inner = self.inner.write().await;
        let record = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CasefileError::not_found("session", session_id))?;
        if record.session.active {
            record.session.active = false;
            record.session.updated_at = Utc::now();
        }
        let session = record.session.clone();
        let key = session.key();
        if inner.by_key.get(&key) == Some(&session.id) {
            inner.by_key.remove(&key);
        }
        Ok(session)
    }

    async fn append_event(
        &self,
        session_id: &str,
        event: NewExecutionEvent,
    ) -> Result<ExecutionEvent> {
        let mut inner = self.inner.write().await;
        let record = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CasefileError::not_found("session", session_id))?;

        // Sequence is the session's event count plus one, allocated under the
        // same guard that appends, so it is gapless and strictly monotonic.
        let sequence = record.session.event_count + 1;
        let stored = ExecutionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sequence,
            event_type: event.event_type,
            operation_name: event.operation_name.clone(),
            started_at: event.started_at,
            completed_at: event.completed_at,
            duration_ms: event.duration_ms(),
            inputs: event.inputs,
            outputs: event.outputs,
            success: event.success,
            status: event.status,
            error: event.error,
        };
        record.events.push(stored.clone());
        record.session.record_event(stored.completed_at);
        Ok(stored)
    }

    async fn events(&self, session_id: &str, query: &EventQuery) -> Result<Vec<ExecutionEvent>> {
        let inner = self.inner.read().await;
        let record = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| CasefileError::not_found("session", session_id))?;
        Ok(record
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }
}
