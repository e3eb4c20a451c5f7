//! Tracing layer that streams dispatch activity to a channel.
//!
//! Consumers (UIs, log shippers) subscribe to the structured events the
//! dispatcher, workflow engine, and hooks emit without scraping formatted
//! log output.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// One captured dispatch event.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchEvent {
    /// Event target (e.g. "dispatch", "workflow", "audit")
    pub target: String,
    /// Log level (INFO, DEBUG, WARN, ERROR)
    pub level: String,
    /// Human-readable message
    pub message: String,
    /// Structured fields from the event
    pub fields: HashMap<String, Value>,
    /// RFC 3339 capture timestamp
    pub timestamp: String,
}

/// Forwards matching tracing events to a channel.
pub struct DispatchEventLayer {
    sender: mpsc::UnboundedSender<DispatchEvent>,
    targets: Vec<String>,
}

impl DispatchEventLayer {
    /// Captures events whose target starts with any of `targets`;
    /// an empty list captures everything.
    pub fn new(sender: mpsc::UnboundedSender<DispatchEvent>, targets: Vec<String>) -> Self {
        Self { sender, targets }
    }

    /// Layer capturing the orchestration targets this crate emits.
    pub fn for_orchestration(sender: mpsc::UnboundedSender<DispatchEvent>) -> Self {
        Self::new(
            sender,
            ["dispatch", "workflow", "audit", "hooks", "sessions", "permission"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }
}

impl<S> Layer<S> for DispatchEventLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if !self.targets.is_empty() && !self.targets.iter().any(|t| target.starts_with(t)) {
            return;
        }

        let mut fields = HashMap::new();
        let mut visitor = FieldVisitor(&mut fields);
        event.record(&mut visitor);

        let dispatch_event = DispatchEvent {
            target: target.to_string(),
            level: event.metadata().level().to_string(),
            message: fields
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            fields,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        // Non-blocking send; a dropped receiver just stops the stream.
        let _ = self.sender.send(dispatch_event);
    }
}

/// Extracts tracing event fields into a JSON map.
struct FieldVisitor<'a>(&'a mut HashMap<String, Value>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(
            field.name().to_string(),
            serde_json::json!(format!("{:?}", value)),
        );
    }
}
