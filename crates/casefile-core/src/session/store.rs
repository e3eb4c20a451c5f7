//! Session store trait.
//!
//! Defines the minimal persistence contract this core requires. The two
//! operations with atomicity obligations are `conditional_create` (get-or-
//! create must never race into duplicate active sessions) and `append_event`
//! (sequence numbers must be allocated at the store, not by callers).

use super::event::{EventQuery, ExecutionEvent, NewExecutionEvent};
use super::model::{Session, SessionFilter, SessionKey};
use crate::error::Result;
use async_trait::async_trait;

/// An abstract store for sessions and their append-only event logs.
///
/// # Implementation Notes
///
/// Implementations must guarantee:
/// - `conditional_create` is atomic: N concurrent calls for the same key
///   yield exactly one created session, the rest observe it.
/// - `append_event` allocates a strictly monotonic per-session sequence
///   even under concurrent writers.
/// - Events are immutable once written.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Gets the live session for `key`, or atomically creates one.
    ///
    /// An existing live session is touched (TTL extended) and returned with
    /// `created = false`. An expired or closed session is replaced by a fresh
    /// one with `created = true`.
    async fn conditional_create(&self, key: &SessionKey) -> Result<(Session, bool)>;

    /// Finds a session by its ID.
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Bumps `updated_at` and extends the TTL of a live session.
    ///
    /// Returns `NotFound` if the session does not exist.
    async fn touch(&self, session_id: &str) -> Result<Session>;

    /// Lists sessions matching the filter.
    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>>;

    /// Closes a session and returns its final state.
    ///
    /// Closing is idempotent; closing an already-closed session returns it
    /// unchanged.
    async fn close(&self, session_id: &str) -> Result<Session>;

    /// Appends an event, allocating its id and sequence number atomically.
    async fn append_event(
        &self,
        session_id: &str,
        event: NewExecutionEvent,
    ) -> Result<ExecutionEvent>;

    /// Reads back events in sequence order, filtered by `query`.
    async fn events(&self, session_id: &str, query: &EventQuery) -> Result<Vec<ExecutionEvent>>;
}
