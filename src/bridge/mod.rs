//! Per-session execution bridge.
//!
//! The engineering API is apartment-threaded: a project handle may only be
//! touched from the thread that created it. Each session therefore owns one
//! dedicated worker thread fed by a FIFO channel. The resource handle is
//! constructed on that thread by a factory, lives on its stack, and is
//! dropped there. Callers never see the handle; they submit closures and
//! await the reply on a oneshot channel.
//!
//! ```text
//!  dispatch A ─┐                      ┌──────────────────────────┐
//!  dispatch B ─┼─ submit ─▶ mpsc ───▶ │ worker "tia-session-…"   │
//!  dispatch C ─┘   (FIFO)             │  resource: R  (!Send ok) │
//!        ▲                            └────────────┬─────────────┘
//!        └──────────── oneshot reply ──────────────┘
//! ```

mod loop_impl;
mod request;
mod worker;

pub use request::WorkItem;
pub use worker::{BridgeFactory, Completion, ExecutionBridge, Ready};

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the bridge itself, never by the operations it runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("bridge is closed")]
    Closed,
    #[error("bridge worker faulted")]
    Faulted,
    #[error("bridge queue is full ({0} pending)")]
    Busy(usize),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
    #[error("resource initialization failed: {0}")]
    InitFailed(String),
}
