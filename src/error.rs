//! Error types for the TIA Portal MCP server.
//!
//! Every dispatched call ends in exactly one envelope. Failures detected by
//! the precondition layer, the session manager or the execution bridge are
//! all folded into [`ToolError`] so the envelope can carry a stable
//! `error_code` next to the human readable message.

use crate::bridge::BridgeError;
use crate::session::SessionError;
use std::time::Duration;
use thiserror::Error;

/// Tool execution errors - carried in a failed envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Maximum sessions ({0}) reached. Close an existing session first.")]
    CapacityExceeded(usize),

    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    #[error("Session worker is closed")]
    BridgeClosed,

    #[error("Session worker faulted; the session was closed, create a new one")]
    BridgeFaulted,

    #[error("Session worker queue is full ({0} pending operations)")]
    Busy(usize),

    #[error("Operation timed out after {0:?} (it may still be running)")]
    Timeout(Duration),

    #[error("Failed to initialize session: {0}")]
    SessionInitFailed(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("No project is currently open")]
    NoProjectOpen,

    #[error("A project is already open: {0}. Use close_project first.")]
    ProjectAlreadyOpen(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Engineering backend error: {0}")]
    Backend(String),
}

impl ToolError {
    /// Stable machine readable code, carried in the envelope's `error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::PreconditionNotMet(_) => "precondition_not_met",
            Self::BridgeClosed => "bridge_closed",
            Self::BridgeFaulted => "bridge_faulted",
            Self::Busy(_) => "busy",
            Self::Timeout(_) => "timeout",
            Self::SessionInitFailed(_) => "session_init_failed",
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidParams(_) | Self::InvalidPath(_) => "invalid_params",
            Self::NoProjectOpen
            | Self::ProjectAlreadyOpen(_)
            | Self::ProjectNotFound(_)
            | Self::Io(_)
            | Self::Backend(_) => "handler_failure",
        }
    }
}

impl From<BridgeError> for ToolError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Closed => ToolError::BridgeClosed,
            BridgeError::Faulted => ToolError::BridgeFaulted,
            BridgeError::Busy(depth) => ToolError::Busy(depth),
            BridgeError::Timeout(elapsed) => ToolError::Timeout(elapsed),
            BridgeError::Spawn(msg) | BridgeError::InitFailed(msg) => {
                ToolError::SessionInitFailed(msg)
            }
        }
    }
}

impl From<SessionError> for ToolError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(id) => ToolError::SessionNotFound(id),
            SessionError::CapacityExceeded(max) => ToolError::CapacityExceeded(max),
            SessionError::InitFailed(msg) => ToolError::SessionInitFailed(msg),
            SessionError::Bridge(e) => e.into(),
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::InvalidParams(e.to_string())
    }
}
