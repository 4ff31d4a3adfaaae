//! Domain handlers, one per worker-executed tool.
//!
//! A handler runs entirely on the session's worker with exclusive access to
//! the backend. It parses its own arguments, calls the backend and returns
//! a message plus a JSON payload. Session state checks are done by the
//! dispatcher before a handler is ever queued.

pub mod blocks;
pub mod project;

use super::PortalBackend;
use crate::error::ToolError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;

/// Settings handlers may consult. Cloned into every queued job.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Default target for `export_blocks`.
    pub export_dir: PathBuf,
}

impl Default for HandlerContext {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("./exports"),
        }
    }
}

/// Successful handler result.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    pub message: String,
    pub data: Value,
}

impl HandlerOutput {
    pub fn new(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

pub type Handler<R> = fn(&mut R, &HandlerContext, Value) -> Result<HandlerOutput, ToolError>;

/// Handler for a worker-executed tool, `None` for tools the dispatcher
/// answers itself.
pub fn lookup<R: PortalBackend>(tool: &str) -> Option<Handler<R>> {
    let handler: Handler<R> = match tool {
        "open_project" => project::open_project,
        "close_project" => project::close_project,
        "save_project" => project::save_project,
        "get_project_info" => project::get_project_info,
        "list_blocks" => blocks::list_blocks,
        "export_blocks" => blocks::export_blocks,
        "import_blocks" => blocks::import_blocks,
        _ => return None,
    };
    Some(handler)
}

pub(crate) fn parse<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidParams(e.to_string()))
}

pub(crate) fn to_data<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Backend(e.to_string()))
}
