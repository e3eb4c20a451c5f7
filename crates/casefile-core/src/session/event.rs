//! Immutable audit events.
//!
//! Every dispatched operation leaves exactly one `ExecutionEvent` in its
//! session's append-only log (workflow runs leave one per step). Events are
//! never mutated or deleted by this core; retention is external policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

/// The kind of operation an event records.
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
pub enum EventType {
    ToolExecution,
    AgentResponse,
    WorkflowStep,
    Message,
}

/// Terminal status of a recorded operation.
///
/// Timeouts are kept distinct from business failures.
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
pub enum EventStatus {
    Success,
    Failed,
    TimedOut,
}

/// An immutable audit record of one dispatched operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Unique event identifier (UUID format)
    pub id: String,
    /// The owning session
    pub session_id: String,
    /// Strictly monotonic per-session sequence number, allocated by the store
    pub sequence: u64,
    /// Kind of operation recorded
    pub event_type: EventType,
    /// Name of the dispatched operation
    pub operation_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Snapshot of the operation inputs (possibly truncated)
    pub inputs: Value,
    /// Snapshot of the operation outputs (possibly truncated)
    pub outputs: Value,
    pub success: bool,
    pub status: EventStatus,
    /// Error detail when the operation failed or timed out
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload for appending an event; id and sequence are allocated by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExecutionEvent {
    pub event_type: EventType,
    pub operation_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub inputs: Value,
    pub outputs: Value,
    pub success: bool,
    pub status: EventStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl NewExecutionEvent {
    /// Duration between start and completion, clamped to zero.
    pub fn duration_ms(&self) -> u64 {
        (self.completed_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Filters for reading back a session's event log.
///
/// An empty query replays the full log in sequence order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    /// Restrict to these event types (empty means all)
    #[serde(default)]
    pub event_types: Vec<EventType>,
    /// Only events that started at or after this instant
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Only events that started before this instant
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl EventQuery {
    pub fn matches(&self, event: &ExecutionEvent) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(since) = self.since {
            if event.started_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.started_at >= until {
                return false;
            }
        }
        true
    }
}
