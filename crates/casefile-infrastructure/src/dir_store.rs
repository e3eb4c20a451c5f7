//! TOML directory-backed session store.
//!
//! Layout:
//!
//! ```text
//! base_dir/
//! ├── index.toml
//! └── casefiles/
//!     └── <casefile_id>/
//!         └── sessions/
//!             ├── <session_id>.toml
//!             └── <session_id>.toml
//! ```
//!
//! Each session file holds the session plus its full event log. Writes go
//! through tmp file + fsync + atomic rename; mutations additionally hold a
//! store-wide `fs2` exclusive lock so conditional-create and sequence
//! allocation stay atomic across processes. All file work runs on tokio's
//! blocking pool so trait calls never stall the async executor.

use async_trait::async_trait;
use casefile_core::error::{CasefileError, Result};
use casefile_core::session::{
    EventQuery, EventStatus, EventType, ExecutionEvent, NewExecutionEvent, Session, SessionFilter,
    SessionKey, SessionStore,
};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

// ============================================================================
// Storage DTOs
// ============================================================================

/// Stored form of an event. Inputs/outputs are kept as JSON text because
/// TOML has no null value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEvent {
    id: String,
    sequence: u64,
    event_type: EventType,
    operation_name: String,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    duration_ms: u64,
    inputs_json: String,
    outputs_json: String,
    success: bool,
    status: EventStatus,
    #[serde(default)]
    error: Option<String>,
}

impl StoredEvent {
    fn from_event(event: &ExecutionEvent) -> Result<Self> {
        Ok(Self {
            id: event.id.clone(),
            sequence: event.sequence,
            event_type: event.event_type,
            operation_name: event.operation_name.clone(),
            started_at: event.started_at,
            completed_at: event.completed_at,
            duration_ms: event.duration_ms,
            inputs_json: serde_json::to_string(&event.inputs)?,
            outputs_json: serde_json::to_string(&event.outputs)?,
            success: event.success,
            status: event.status,
            error: event.error.clone(),
        })
    }

    fn into_event(self, session_id: &str) -> Result<ExecutionEvent> {
        Ok(ExecutionEvent {
            id: self.id,
            session_id: session_id.to_string(),
            sequence: self.sequence,
            event_type: self.event_type,
            operation_name: self.operation_name,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
            inputs: serde_json::from_str(&self.inputs_json)?,
            outputs: serde_json::from_str(&self.outputs_json)?,
            success: self.success,
            status: self.status,
            error: self.error,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionDocument {
    session: Session,
    #[serde(default)]
    events: Vec<StoredEvent>,
}

/// Index from session keys to the current live session and from session ids
/// to their casefile directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexDocument {
    #[serde(default)]
    by_key: HashMap<String, String>,
    #[serde(default)]
    casefile_of: HashMap<String, String>,
}

fn key_string(key: &SessionKey) -> String {
    format!("{}|{}|{}", key.user_id, key.casefile_id, key.session_type)
}

// ============================================================================
// Store
// ============================================================================

/// A `SessionStore` persisting sessions as TOML files.
#[derive(Clone)]
pub struct DirSessionStore {
    base_dir: PathBuf,
}

impl DirSessionStore {
    /// Creates a store rooted at `base_dir`, creating the directory tree.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(base_dir.join("casefiles"))?;
        Ok(Self { base_dir })
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join("index.toml")
    }

    fn session_path(&self, casefile_id: &str, session_id: &str) -> PathBuf {
        self.base_dir
            .join("casefiles")
            .join(casefile_id)
            .join("sessions")
            .join(format!("{session_id}.toml"))
    }

    fn acquire_lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(&self.base_dir.join(".lock"))
    }

    fn load_index(&self) -> Result<IndexDocument> {
        load_toml(&self.index_path()).map(|doc| doc.unwrap_or_default())
    }

    fn save_index(&self, index: &IndexDocument) -> Result<()> {
        save_toml(&self.index_path(), index)
    }

    fn load_document(&self, session_id: &str) -> Result<Option<SessionDocument>> {
        let index = self.load_index()?;
        let Some(casefile_id) = index.casefile_of.get(session_id) else {
            return Ok(None);
        };
        load_toml(&self.session_path(casefile_id, session_id))
    }

    fn save_document(&self, doc: &SessionDocument) -> Result<()> {
        save_toml(
            &self.session_path(&doc.session.casefile_id, &doc.session.id),
            doc,
        )
    }
}

// Synchronous bodies; the trait impl below runs them on the blocking pool.
impl DirSessionStore {
    fn conditional_create_sync(&self, key: &SessionKey) -> Result<(Session, bool)> {
        let _lock = self.acquire_lock()?;
        let now = Utc::now();
        let mut index = self.load_index()?;
        let key_str = key_string(key);

        if let Some(existing_id) = index.by_key.get(&key_str).cloned() {
            if let Some(mut doc) = self.load_document(&existing_id)? {
                if doc.session.is_live(now) {
                    doc.session.touch(now);
                    self.save_document(&doc)?;
                    return Ok((doc.session, false));
                }
                doc.session.active = false;
                self.save_document(&doc)?;
            }
        }

        let session = Session::new(key, now);
        index.by_key.insert(key_str, session.id.clone());
        index
            .casefile_of
            .insert(session.id.clone(), session.casefile_id.clone());
        self.save_document(&SessionDocument {
            session: session.clone(),
            events: Vec::new(),
        })?;
        self.save_index(&index)?;
        tracing::debug!(
            target: "session_store",
            session_id = %session.id,
            path = %self.session_path(&session.casefile_id, &session.id).display(),
            "created session file"
        );
        Ok((session, true))
    }

    fn get_sync(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.load_document(session_id)?.map(|doc| doc.session))
    }

    fn touch_sync(&self, session_id: &str) -> Result<Session> {
        let _lock = self.acquire_lock()?;
        let mut doc = self
            .load_document(session_id)?
            .ok_or_else(|| CasefileError::not_found("session", session_id))?;
        doc.session.touch(Utc::now());
        self.save_document(&doc)?;
        Ok(doc.session)
    }

    fn list_sync(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let now = Utc::now();
        let index = self.load_index()?;
        let mut sessions = Vec::new();
        for (session_id, casefile_id) in &index.casefile_of {
            if let Some(cf) = &filter.casefile_id {
                if cf != casefile_id {
                    continue;
                }
            }
            if let Some(doc) = load_toml::<SessionDocument>(&self.session_path(casefile_id, session_id))? {
                if filter.matches(&doc.session, now) {
                    sessions.push(doc.session);
                }
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    fn close_sync(&self, session_id: &str) -> Result<Session> {
        let _lock = self.acquire_lock()?;
        let mut doc = self
            .load_document(session_id)?
            .ok_or_else(|| CasefileError::not_found("session", session_id))?;
        if doc.session.active {
            doc.session.active = false;
            doc.session.updated_at = Utc::now();
            self.save_document(&doc)?;
        }
        let mut index = self.load_index()?;
        let key_str = key_string(&doc.session.key());
        if index.by_key.get(&key_str) == Some(&doc.session.id) {
            index.by_key.remove(&key_str);
            self.save_index(&index)?;
        }
        Ok(doc.session)
    }

    fn append_event_sync(
        &self,
        session_id: &str,
        event: NewExecutionEvent,
    ) -> Result<ExecutionEvent> {
        let _lock = self.acquire_lock()?;
        let mut doc = self
            .load_document(session_id)?
            .ok_or_else(|| CasefileError::not_found("session", session_id))?;

        let sequence = doc.session.event_count + 1;
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
        doc.events.push(StoredEvent::from_event(&stored)?);
        doc.session.record_event(stored.completed_at);
        self.save_document(&doc)?;
        Ok(stored)
    }

    fn events_sync(&self, session_id: &str, query: &EventQuery) -> Result<Vec<ExecutionEvent>> {
        let doc = self
            .load_document(session_id)?
            .ok_or_else(|| CasefileError::not_found("session", session_id))?;
        let mut events = Vec::new();
        for stored in doc.events {
            let event = stored.into_event(session_id)?;
            if query.matches(&event) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl SessionStore for DirSessionStore {
    async fn conditional_create(&self, key: &SessionKey) -> Result<(Session, bool)> {
        let store = self.clone();
        let key = key.clone();
        run_blocking(move || store.conditional_create_sync(&key)).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let store = self.clone();
        let session_id = session_id.to_string();
        run_blocking(move || store.get_sync(&session_id)).await
    }

    async fn touch(&self, session_id: &str) -> Result<Session> {
        let store = self.clone();
        let session_id = session_id.to_string();
        run_blocking(move || store.touch_sync(&session_id)).await
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let store = self.clone();
        let filter = filter.clone();
        run_blocking(move || store.list_sync(&filter)).await
    }

    async fn close(&self, session_id: &str) -> Result<Session> {
        let store = self.clone();
        let session_id = session_id.to_string();
        run_blocking(move || store.close_sync(&session_id)).await
    }

    async fn append_event(
        &self,
        session_id: &str,
        event: NewExecutionEvent,
    ) -> Result<ExecutionEvent> {
        let store = self.clone();
        let session_id = session_id.to_string();
        run_blocking(move || store.append_event_sync(&session_id, event)).await
    }

    async fn events(&self, session_id: &str, query: &EventQuery) -> Result<Vec<ExecutionEvent>> {
        let store = self.clone();
        let session_id = session_id.to_string();
        let query = query.clone();
        run_blocking(move || store.events_sync(&session_id, &query)).await
    }
}

/// Runs file-system work on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CasefileError::internal(format!("store task failed: {e}")))?
}

// ============================================================================
// Atomic TOML file helpers
// ============================================================================

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(toml::from_str(&content)?))
}

/// Writes via tmp file + fsync + atomic rename so readers never observe a
/// torn document.
fn save_toml<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        CasefileError::internal(format!("path has no parent: {}", path.display()))
    })?;
    if !parent.exists() {
        fs::create_dir_all(parent)?;
    }

    let toml_string = toml::to_string_pretty(data)?;
    let file_name = path
        .file_name()
        .ok_or_else(|| CasefileError::internal(format!("path has no file name: {}", path.display())))?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));

    let mut tmp_file = File::create(&tmp_path)?;
    tmp_file.write_all(toml_string.as_bytes())?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// An exclusive store lock released on drop.
struct StoreLock {
    #[allow(dead_code)]
    file: File,
}

impl StoreLock {
    fn acquire(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;
        file.lock_exclusive()
            .map_err(|e| CasefileError::transient(format!("failed to acquire store lock: {e}")))?;
        Ok(Self { file })
    }
}
