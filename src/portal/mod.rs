//! Engineering backend seam.
//!
//! [`PortalBackend`] is the resource a session worker owns. Implementations
//! need not be `Send`: they are built, used and dropped on one worker
//! thread. [`LocalWorkspace`] is the bundled implementation over a project
//! directory on disk.

pub mod handlers;
mod workspace;

pub use workspace::LocalWorkspace;

use crate::error::ToolError;
use crate::session::SessionResource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Operations a session's worker may run against its project.
pub trait PortalBackend: SessionResource + 'static {
    /// Open a project. `path` is an `.ap*` file or a directory; `name`
    /// selects the project inside a directory.
    fn open_project(&mut self, path: &Path, name: Option<&str>) -> Result<ProjectInfo, ToolError>;

    fn save_project(&mut self) -> Result<ProjectInfo, ToolError>;

    /// Close the open project, saving first when `save` is set and there
    /// are unsaved changes. Returns the closed project's name.
    fn close_project(&mut self, save: bool) -> Result<String, ToolError>;

    fn project_info(&self) -> Result<ProjectInfo, ToolError>;

    fn list_blocks(&self) -> Result<Vec<BlockInfo>, ToolError>;

    /// Export `names`, or every block when `None`, into `output`.
    fn export_blocks(
        &mut self,
        names: Option<&[String]>,
        output: &Path,
    ) -> Result<ExportReport, ToolError>;

    fn import_blocks(
        &mut self,
        files: &[PathBuf],
        target_folder: Option<&str>,
    ) -> Result<ImportReport, ToolError>;
}

/// Attached project summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    /// Directory that contains the project directory.
    pub store_path: String,
    pub path: String,
    pub is_modified: bool,
    pub block_count: usize,
}

/// One PLC block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub block_type: String,
    /// Folder path relative to the project, `/` separated.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedBlock {
    pub block_name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedBlock {
    pub path: String,
    pub block_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

/// Per-item failure inside a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub item: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReport {
    pub output_path: String,
    pub exported: Vec<ExportedBlock>,
    pub errors: Vec<ItemError>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: Vec<ImportedBlock>,
    pub errors: Vec<ItemError>,
    pub summary: BatchSummary,
}

impl BatchSummary {
    pub fn new(succeeded: usize, failed: usize) -> Self {
        Self {
            total: succeeded + failed,
            succeeded,
            failed,
        }
    }
}
