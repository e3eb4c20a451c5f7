//! Session domain: models, audit events, and the store contract.

pub mod event;
pub mod model;
pub mod store;

pub use event::{EventQuery, EventStatus, EventType, ExecutionEvent, NewExecutionEvent};
pub use model::{Session, SessionFilter, SessionKey, SessionSummary, SessionType};
pub use store::SessionStore;
