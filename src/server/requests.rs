//! MCP tool request types.
//!
//! These structs define the parameters for each MCP tool exposed by the
//! server. Session-scoped requests carry `session_id`; the dispatcher reads
//! it from the raw arguments before these are parsed on the worker, so the
//! field is kept here for the published schema.

use rmcp::schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmptyParams {}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct CreateSessionRequest {
    #[schemars(description = "Caller metadata object, stored with the session and returned verbatim")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionRequest {
    #[schemars(description = "Session id returned by create_session")]
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[schemars(description = "Timeout in seconds for this operation (default: 120, max: 600)")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct OpenProjectRequest {
    #[schemars(description = "Session id returned by create_session")]
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[schemars(description = "Path to an .ap* project file or to a directory holding projects")]
    #[serde(alias = "path")]
    pub project_path: String,
    #[schemars(
        description = "Project name inside project_path (optional when project_path is an .ap* file)"
    )]
    #[serde(alias = "name")]
    pub project_name: Option<String>,
    #[schemars(description = "Timeout in seconds for this operation (default: 120, max: 600)")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CloseProjectRequest {
    #[schemars(description = "Session id returned by create_session")]
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[schemars(description = "Save unsaved changes before closing (default: true)")]
    pub save: Option<bool>,
    #[schemars(description = "Timeout in seconds for this operation (default: 120, max: 600)")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListBlocksRequest {
    #[schemars(description = "Session id returned by create_session")]
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[schemars(description = "Only return blocks of this type (OB, FB, FC, DB, UDT, SCL)")]
    #[serde(alias = "type")]
    pub block_type: Option<String>,
    #[schemars(description = "Timeout in seconds for this operation (default: 120, max: 600)")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExportBlocksRequest {
    #[schemars(description = "Session id returned by create_session")]
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[schemars(description = "Blocks to export; omit to export every block")]
    #[serde(alias = "names", alias = "blocks")]
    pub block_names: Option<Vec<String>>,
    #[schemars(description = "Output directory (default: configured export path)")]
    #[serde(alias = "output_dir")]
    pub output_path: Option<String>,
    #[schemars(description = "Timeout in seconds for this operation (default: 120, max: 600)")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ImportBlocksRequest {
    #[schemars(description = "Session id returned by create_session")]
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[schemars(description = "Block files to import (.xml, .scl, .udt, .db)")]
    #[serde(alias = "xml_paths", alias = "files")]
    pub paths: Vec<String>,
    #[schemars(description = "Folder inside the project to import into")]
    pub target_folder: Option<String>,
    #[schemars(description = "Timeout in seconds for this operation (default: 120, max: 600)")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ToolCatalogRequest {
    #[schemars(description = "What you're trying to accomplish (e.g., 'export all blocks')")]
    pub query: Option<String>,
    #[schemars(description = "Filter by category: session, project, blocks, discovery")]
    pub category: Option<String>,
    #[schemars(description = "Maximum number of tools to return (default: 7)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ToolHelpRequest {
    #[schemars(description = "Name of the tool to get help for")]
    pub name: String,
}

/// JSON schema of a tool's parameters, without the `$schema` key.
pub fn tool_params_schema(name: &str) -> Option<Value> {
    fn schema<T: JsonSchema>() -> Value {
        let mut value = serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({}));
        if let Some(map) = value.as_object_mut() {
            map.remove("$schema");
        }
        value
    }

    match name {
        // Session
        "create_session" => Some(schema::<CreateSessionRequest>()),
        "list_sessions" => Some(schema::<EmptyParams>()),
        "session_info" | "close_session" | "terminate_session" => {
            Some(schema::<SessionRequest>())
        }

        // Project
        "open_project" => Some(schema::<OpenProjectRequest>()),
        "close_project" => Some(schema::<CloseProjectRequest>()),
        "save_project" | "get_project_info" => Some(schema::<SessionRequest>()),

        // Blocks
        "list_blocks" => Some(schema::<ListBlocksRequest>()),
        "export_blocks" => Some(schema::<ExportBlocksRequest>()),
        "import_blocks" => Some(schema::<ImportBlocksRequest>()),

        // Discovery
        "tool_catalog" => Some(schema::<ToolCatalogRequest>()),
        "tool_help" => Some(schema::<ToolHelpRequest>()),
        _ => None,
    }
}
