//! TIA Portal MCP Server
//!
//! This library provides an MCP (Model Context Protocol) server that lets
//! several callers work with TIA Portal engineering projects at once, while
//! every engineering connection stays on the one thread that created it.
//!
//! # Architecture
//!
//! - **ExecutionBridge**: one dedicated worker thread per session. It builds
//!   the session's backend on that thread and runs submitted operations one at
//!   a time, in submission order. Callers await a completion handle.
//!
//! - **SessionManager**: creates sessions up to a configured ceiling, hands
//!   them out by id, closes them exactly once and sweeps idle ones.
//!
//! - **Dispatcher**: checks each tool's precondition against a static table,
//!   queues the handler on the session's bridge and wraps every outcome in a
//!   [`ResponseEnvelope`].
//!
//! - **TiaMcpServer**: the `rmcp` handler that publishes the tool list and
//!   the `tia://config` / `tia://sessions` resources, and forwards calls to
//!   the dispatcher.
//!
//! # Tools
//!
//! ## Session
//! - `create_session`: Start a session with its own worker
//! - `list_sessions`: Snapshot of live sessions and manager stats
//! - `session_info`: Details for one session
//! - `close_session`: Release the backend and stop the worker
//! - `terminate_session`: Drop a session without waiting for its release
//!
//! ## Project
//! - `open_project`: Attach a project to a session
//! - `close_project`: Detach the project, saving by default
//! - `save_project`: Save the attached project
//! - `get_project_info`: Describe the attached project
//!
//! ## Blocks
//! - `list_blocks`: List program blocks, optionally filtered by type
//! - `export_blocks`: Export blocks to a directory
//! - `import_blocks`: Import block files into the project
//!
//! ## Discovery
//! - `tool_catalog`: Search tools by intent
//! - `tool_help`: Full documentation and schema for one tool

use std::path::PathBuf;

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod portal;
pub mod server;
pub mod session;
pub mod tool_registry;

#[cfg(test)]
mod testing;

pub use bridge::{BridgeError, ExecutionBridge};
pub use config::Config;
pub use dispatch::{Dispatcher, ResponseEnvelope};
pub use error::ToolError;
pub use portal::{LocalWorkspace, PortalBackend};
pub use server::TiaMcpServer;
pub use session::{SessionManager, SessionSettings};
pub use tool_registry::{ToolCategory, ToolInfo, TOOL_REGISTRY};

/// Expand `~/` prefix to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    path.strip_prefix("~/")
        .and_then(|stripped| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(stripped)))
        .unwrap_or_else(|| PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_leaves_plain_paths_alone() {
        assert_eq!(expand_path("/plant/Line"), PathBuf::from("/plant/Line"));
        assert_eq!(expand_path("relative/x"), PathBuf::from("relative/x"));
    }
}
