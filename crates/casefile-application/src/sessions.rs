//! Session lifecycle surface: explicit create, get, list, close.
//!
//! Execute lives in the dispatcher (casefile-execution) and auto-creates
//! sessions through the same router used here.

use crate::router::{PermissionRouter, SessionContext};
use casefile_core::error::{CasefileError, Result};
use casefile_core::permission::PermissionLevel;
use casefile_core::session::{
    EventQuery, ExecutionEvent, Session, SessionFilter, SessionStore, SessionSummary, SessionType,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Coordinates session lifecycle operations against the store.
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    router: Arc<PermissionRouter>,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, router: Arc<PermissionRouter>) -> Self {
        Self { store, router }
    }

    /// Explicitly creates (or returns) the live session for the key.
    ///
    /// Goes through the full permission validation, so a user without access
    /// to the casefile cannot open sessions in it.
    pub async fn create_session(
        &self,
        user_id: &str,
        casefile_id: &str,
        session_type: SessionType,
        cached_permission: Option<PermissionLevel>,
    ) -> Result<SessionContext> {
        self.router
            .validate_and_get_session(user_id, casefile_id, session_type, cached_permission, None)
            .await
    }

    /// Finds a session by its ID.
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| CasefileError::not_found("session", session_id))
    }

    /// Finds a session along with its (filtered) event history.
    pub async fn get_session_with_history(
        &self,
        session_id: &str,
        query: &EventQuery,
    ) -> Result<(Session, Vec<ExecutionEvent>)> {
        let session = self.get_session(session_id).await?;
        let events = self.store.events(session_id, query).await?;
        Ok((session, events))
    }

    /// Lists sessions matching the filter.
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        self.store.list(filter).await
    }

    /// Closes a session and returns its summary statistics.
    ///
    /// Closing is idempotent; the statistics are computed from the recorded
    /// event log, so they stay consistent with what `get` replays.
    pub async fn close_session(&self, session_id: &str) -> Result<SessionSummary> {
        let session = self.store.close(session_id).await?;
        let events = self
            .store
            .events(session_id, &EventQuery::default())
            .await?;

        let mut events_by_type = HashMap::new();
        let mut total_duration_ms = 0u64;
        for event in &events {
            *events_by_type.entry(event.event_type).or_insert(0u64) += 1;
            total_duration_ms += event.duration_ms;
        }

        tracing::info!(
            target: "sessions",
            session_id,
            event_count = events.len(),
            total_duration_ms,
            "closed session"
        );

        Ok(SessionSummary {
            session_id: session.id.clone(),
            casefile_id: session.casefile_id.clone(),
            user_id: session.user_id.clone(),
            session_type: session.session_type,
            created_at: session.created_at,
            closed_at: Utc::now(),
            event_count: session.event_count,
            total_duration_ms,
            events_by_type,
        })
    }
}
