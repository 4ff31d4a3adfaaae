//! MCP server surface.
//!
//! Tools are listed from [`crate::tool_registry`] and every call is handed
//! to the [`Dispatcher`]. The handler never runs backend code itself.
//!
//! Two read-only JSON resources are published next to the tools:
//! `tia://config` (limits and paths in effect) and `tia://sessions`
//! (live sessions with manager stats).

pub mod requests;

use crate::dispatch::{Dispatcher, ResponseEnvelope, MAX_TIMEOUT_SECS};
use crate::portal::PortalBackend;
use crate::tool_registry::{self, ToolCategory};
use requests::tool_params_schema;
use rmcp::model::{
    AnnotateAble, CallToolRequestParams, CallToolResult, JsonObject, ListResourcesResult,
    ListToolsResult, PaginatedRequestParams, RawResource, ReadResourceRequestParams,
    ReadResourceResult, Resource, ResourceContents, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Server configuration in effect.
pub const CONFIG_URI: &str = "tia://config";
/// Live sessions and manager statistics.
pub const SESSIONS_URI: &str = "tia://sessions";

const JSON_MIME: &str = "application/json";

/// MCP server for TIA Portal engineering sessions.
pub struct TiaMcpServer<R> {
    dispatcher: Arc<Dispatcher<R>>,
}

impl<R> Clone for TiaMcpServer<R> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<R: PortalBackend> TiaMcpServer<R> {
    pub fn new(dispatcher: Arc<Dispatcher<R>>) -> Self {
        info!("Creating TIA Portal MCP server");
        Self { dispatcher }
    }

    fn instructions(&self) -> String {
        let max = self.dispatcher.sessions().settings().max_concurrent;
        let categories: Vec<String> = ToolCategory::all()
            .iter()
            .map(|c| format!("- {}: {}", c.as_str(), c.description()))
            .collect();
        format!(
            "TIA Portal engineering server. Each session owns one engineering \
             connection; calls within a session run in order, sessions run in parallel. \
             \n\nWorkflow: \
             \n1. create_session: get a session_id (at most {max} at a time) \
             \n2. open_project: attach a project to the session \
             \n3. list_blocks / export_blocks / import_blocks / save_project \
             \n4. close_project, then close_session when done \
             \n\nEvery response is an envelope {{success, message, data, error}}. \
             Idle sessions are closed automatically. \
             \n\nTool Categories:\n{}",
            categories.join("\n")
        )
    }

    /// The published tool list, in registry order.
    pub fn tools() -> Vec<Tool> {
        tool_registry::all_tools()
            .map(|info| {
                let schema = tool_params_schema(info.name)
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                let input_schema: JsonObject = serde_json::from_value(schema).unwrap_or_default();
                Tool {
                    name: Cow::Borrowed(info.name),
                    description: Some(Cow::Borrowed(info.full_desc)),
                    input_schema: Arc::new(input_schema),
                    annotations: None,
                    execution: None,
                    icons: None,
                    meta: None,
                    output_schema: None,
                    title: None,
                }
            })
            .collect()
    }

    /// The published resource list.
    pub fn resources() -> Vec<Resource> {
        [
            (
                CONFIG_URI,
                "Server Configuration",
                "Session limits, timeouts and paths in effect",
            ),
            (SESSIONS_URI, "Sessions", "Live sessions and manager statistics"),
        ]
        .into_iter()
        .map(|(uri, name, description)| {
            let mut raw = RawResource::new(uri, name);
            raw.description = Some(description.to_string());
            raw.mime_type = Some(JSON_MIME.to_string());
            raw.no_annotation()
        })
        .collect()
    }

    /// JSON body of a published resource, `None` for an unknown URI.
    pub async fn resource(&self, uri: &str) -> Result<Option<Value>, serde_json::Error> {
        match uri {
            CONFIG_URI => Ok(Some(self.config_snapshot())),
            SESSIONS_URI => {
                let sessions = self.dispatcher.sessions();
                let listed = sessions.list_sessions().await;
                let stats = sessions.stats().await;
                Ok(Some(json!({
                    "count": listed.len(),
                    "sessions": serde_json::to_value(listed)?,
                    "stats": serde_json::to_value(stats)?,
                })))
            }
            _ => Ok(None),
        }
    }

    fn config_snapshot(&self) -> Value {
        let settings = self.dispatcher.sessions().settings();
        json!({
            "server_name": env!("CARGO_PKG_NAME"),
            "server_version": env!("CARGO_PKG_VERSION"),
            "max_sessions": settings.max_concurrent,
            "session_timeout": settings.idle_timeout.as_secs(),
            "sweep_interval": settings.sweep_interval.as_secs(),
            "release_timeout": settings.release_timeout.as_secs(),
            "max_queue_depth": settings.max_queue_depth,
            "call_timeout": self.dispatcher.call_timeout().as_secs(),
            "max_call_timeout": MAX_TIMEOUT_SECS,
            "export_path": self.dispatcher.context().export_dir.display().to_string(),
        })
    }

    /// Run a named tool with raw MCP arguments.
    #[instrument(skip(self, arguments))]
    pub async fn call(&self, name: &str, arguments: Option<JsonObject>) -> ResponseEnvelope {
        let args = arguments.map(Value::Object).unwrap_or_else(|| json!({}));
        let envelope = self.dispatcher.dispatch(name, args).await;
        debug!(success = envelope.success, "Tool call finished");
        envelope
    }
}

impl<R: PortalBackend> ServerHandler for TiaMcpServer<R> {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn list_resources(
        &self,
        _params: Option<PaginatedRequestParams>,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult::with_all_items(Self::resources()))
    }

    async fn read_resource(
        &self,
        params: ReadResourceRequestParams,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let body = match self.resource(&params.uri).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                warn!(uri = %params.uri, "Unknown resource requested");
                return Err(McpError::resource_not_found(
                    format!("Unknown resource: {}", params.uri),
                    None,
                ));
            }
            Err(e) => return Err(McpError::internal_error(e.to_string(), None)),
        };
        let text = serde_json::to_string_pretty(&body)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: params.uri,
                mime_type: Some(JSON_MIME.to_string()),
                text,
                meta: None,
            }],
        })
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self
            .call(&params.name, params.arguments)
            .await
            .into_tool_result())
    }
}
