//! Session and session info types.

use crate::bridge::ExecutionBridge;
use crate::error::ToolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Worker is up, no project attached.
    Created,
    /// A project is open on the worker.
    ResourceAttached,
    /// Terminal. No further operations are accepted.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::ResourceAttached => write!(f, "resource_attached"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Resource owned by a session worker.
///
/// `release` runs on the worker as the last operation of a graceful close.
pub trait SessionResource {
    fn release(&mut self) -> Result<(), ToolError>;
}

/// Point-in-time view of a session (serializable for API responses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: String,
    /// Lifecycle state at snapshot time.
    pub state: SessionState,
    /// Name of the attached project, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached: Option<String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last completed operation.
    pub last_activity: DateTime<Utc>,
    pub age_secs: u64,
    pub idle_secs: u64,
    /// A call on this session timed out and may still be running.
    pub suspect: bool,
    /// Operations queued on the worker, not counting the running one.
    pub pending_operations: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    attached: Option<String>,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
}

/// A live session: identity, lifecycle, and the worker that owns its
/// resource.
pub struct Session<R> {
    id: String,
    created_at: DateTime<Utc>,
    created: Instant,
    lifecycle: Mutex<Lifecycle>,
    suspect: AtomicBool,
    metadata: Map<String, Value>,
    bridge: ExecutionBridge<R>,
}

impl<R> Session<R> {
    /// Wrap a freshly spawned bridge.
    pub fn new(id: String, metadata: Map<String, Value>, bridge: ExecutionBridge<R>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            created: Instant::now(),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Created,
                attached: None,
                last_activity: Instant::now(),
                last_activity_at: now,
            }),
            suspect: AtomicBool::new(false),
            metadata,
            bridge,
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bridge(&self) -> &ExecutionBridge<R> {
        &self.bridge
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Move to `Closed`. Returns `true` only for the caller that made the
    /// transition; that caller owns the release.
    pub fn begin_close(&self) -> bool {
        let mut lc = self.lifecycle();
        if lc.state == SessionState::Closed {
            return false;
        }
        lc.state = SessionState::Closed;
        true
    }

    /// Like [`begin_close`](Self::begin_close), but only when `evict`
    /// accepts the current idle time. The check and the transition happen
    /// under one lock, so a session touched in between is left alone.
    pub(crate) fn begin_close_if(&self, evict: impl FnOnce(Duration) -> bool) -> bool {
        let mut lc = self.lifecycle();
        if lc.state == SessionState::Closed || !evict(lc.last_activity.elapsed()) {
            return false;
        }
        lc.state = SessionState::Closed;
        true
    }

    /// Record a completed operation.
    pub fn touch(&self) {
        let mut lc = self.lifecycle();
        lc.last_activity = Instant::now();
        lc.last_activity_at = Utc::now();
    }

    /// Enter `ResourceAttached`. Ignored once closed.
    pub fn attach(&self, label: impl Into<String>) {
        let mut lc = self.lifecycle();
        if lc.state != SessionState::Closed {
            lc.state = SessionState::ResourceAttached;
            lc.attached = Some(label.into());
        }
    }

    /// Back to `Created`. Ignored once closed.
    pub fn detach(&self) {
        let mut lc = self.lifecycle();
        if lc.state != SessionState::Closed {
            lc.state = SessionState::Created;
            lc.attached = None;
        }
    }

    pub fn mark_suspect(&self) {
        self.suspect.store(true, Ordering::SeqCst);
    }

    pub fn is_suspect(&self) -> bool {
        self.suspect.load(Ordering::SeqCst)
    }

    /// Snapshot for listings.
    pub fn info(&self) -> SessionInfo {
        let lc = self.lifecycle();
        SessionInfo {
            id: self.id.clone(),
            state: lc.state,
            attached: lc.attached.clone(),
            created_at: self.created_at,
            last_activity: lc.last_activity_at,
            age_secs: self.created.elapsed().as_secs(),
            idle_secs: lc.last_activity.elapsed().as_secs(),
            suspect: self.is_suspect(),
            pending_operations: self.bridge.pending(),
            metadata: self.metadata.clone(),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<R> std::fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("lifecycle", &*self.lifecycle())
            .field("suspect", &self.is_suspect())
            .field("bridge", &self.bridge)
            .finish()
    }
}
