//! Session domain model.
//!
//! A session is the bounded interaction context for one user within one
//! casefile. It groups a sequence of audited operations and carries the
//! counters the close summary is built from.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

use super::event::EventType;

/// The kind of interaction a session groups.
///
/// The type determines the idle TTL: interactive and workflow sessions expire
/// after 24 hours, chat sessions after 7 days.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionType {
    Interactive,
    Workflow,
    Chat,
}

impl SessionType {
    /// Idle time-to-live for this session type.
    pub fn ttl(&self) -> Duration {
        match self {
            SessionType::Interactive | SessionType::Workflow => Duration::hours(24),
            SessionType::Chat => Duration::days(7),
        }
    }
}

/// The uniqueness key for active sessions.
///
/// Invariant: at most one active session exists per key; the store's atomic
/// conditional-create enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: String,
    pub casefile_id: String,
    pub session_type: SessionType,
}

impl SessionKey {
    pub fn new(
        user_id: impl Into<String>,
        casefile_id: impl Into<String>,
        session_type: SessionType,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            casefile_id: casefile_id.into(),
            session_type,
        }
    }
}

/// A user session scoped to one casefile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (UUID format)
    pub id: String,
    /// The owning casefile
    pub casefile_id: String,
    /// The user this session belongs to
    pub user_id: String,
    /// Kind of interaction this session groups
    pub session_type: SessionType,
    /// Timestamp when the session was created
    pub created_at: DateTime<Utc>,
    /// Timestamp when the session was last touched
    pub updated_at: DateTime<Utc>,
    /// When the session expires if not touched again
    pub expires_at: DateTime<Utc>,
    /// Whether the session is still open
    pub active: bool,
    /// Number of events recorded so far; also the high-water sequence number
    pub event_count: u64,
    /// Timestamp of the most recent event, if any
    pub last_event_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates a fresh active session for the given key.
    pub fn new(key: &SessionKey, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            casefile_id: key.casefile_id.clone(),
            user_id: key.user_id.clone(),
            session_type: key.session_type,
            created_at: now,
            updated_at: now,
            expires_at: now + key.session_type.ttl(),
            active: true,
            event_count: 0,
            last_event_at: None,
        }
    }

    /// The uniqueness key of this session.
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.user_id.clone(), self.casefile_id.clone(), self.session_type)
    }

    /// Bumps `updated_at` and extends the TTL.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.expires_at = now + self.session_type.ttl();
    }

    /// Returns true once the idle TTL has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns true if the session can still accept operations.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }

    /// Records that an event was appended at `at`.
    pub fn record_event(&mut self, at: DateTime<Utc>) {
        self.event_count += 1;
        self.last_event_at = Some(at);
        self.touch(at);
    }
}

/// Filters for listing sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFilter {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub casefile_id: Option<String>,
    #[serde(default)]
    pub session_type: Option<SessionType>,
    /// When true, only live (active and unexpired) sessions match
    #[serde(default)]
    pub active_only: bool,
}

impl SessionFilter {
    pub fn matches(&self, session: &Session, now: DateTime<Utc>) -> bool {
        if let Some(user_id) = &self.user_id {
            if &session.user_id != user_id {
                return false;
            }
        }
        if let Some(casefile_id) = &self.casefile_id {
            if &session.casefile_id != casefile_id {
                return false;
            }
        }
        if let Some(session_type) = self.session_type {
            if session.session_type != session_type {
                return false;
            }
        }
        if self.active_only && !session.is_live(now) {
            return false;
        }
        true
    }
}

/// Statistics returned when a session is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub casefile_id: String,
    pub user_id: String,
    pub session_type: SessionType,
    pub created_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    /// Total events recorded over the session's lifetime
    pub event_count: u64,
    /// Sum of recorded event durations in milliseconds
    pub total_duration_ms: u64,
    /// Per-event-type counts
    pub events_by_type: HashMap<EventType, u64>,
}
