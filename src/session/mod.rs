//! Session management.
//!
//! A session pairs an id and a small lifecycle record with one execution
//! bridge. The manager owns the registry, enforces the session cap and runs
//! the eviction sweep.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ SessionManager                                            │
//! │  ├─ sessions: RwLock<HashMap<id, Arc<Session>>>           │
//! │  ├─ create / close / terminate / list / stats             │
//! │  └─ sweep task: idle, faulted, suspect-and-drained        │
//! └──────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//! ┌────────────────┐  ┌────────────────┐  ┌────────────────┐
//! │ Session "a1…"  │  │ Session "b7…"  │  │ Session "…"    │
//! │ Created        │  │ ResAttached    │  │                │
//! │ bridge ─▶ thr  │  │ bridge ─▶ thr  │  │ bridge ─▶ thr  │
//! └────────────────┘  └────────────────┘  └────────────────┘
//! ```
//!
//! Lifecycle: `Created` ⇄ `ResourceAttached` → `Closed`. Whoever makes the
//! transition to `Closed` owns the release; everyone else sees `Ok`.

mod manager;
mod types;

pub use manager::{SessionError, SessionManager, SessionSettings, SessionStats};
pub use types::{Session, SessionInfo, SessionResource, SessionState};
