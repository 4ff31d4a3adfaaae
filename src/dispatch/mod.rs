//! Tool dispatch: precondition checks, worker submission, envelopes.
//!
//! Every call is resolved against the static table in
//! [`crate::tool_registry`] before anything is queued. Calls that fail a
//! precondition never reach a worker. Worker-executed tools are awaited
//! with a deadline; a missed deadline stops the wait, not the operation.

mod envelope;

pub use envelope::ResponseEnvelope;

use crate::bridge::BridgeError;
use crate::error::ToolError;
use crate::portal::handlers::{self, HandlerContext, HandlerOutput};
use crate::portal::PortalBackend;
use crate::server::requests::{
    tool_params_schema, CreateSessionRequest, ToolCatalogRequest, ToolHelpRequest,
};
use crate::session::{Session, SessionManager, SessionState};
use crate::tool_registry::{self, Precondition, ToolCategory, ToolInfo, Transition};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Maximum allowed per-call timeout (10 minutes)
pub const MAX_TIMEOUT_SECS: u64 = 600;

/// Log result with debug on success and warn on error.
macro_rules! log_result {
    ($result:expr, $tool:expr, $ok_msg:literal, $err_msg:literal) => {
        match &$result {
            Ok(_) => debug!(tool = $tool, $ok_msg),
            Err(e) => warn!(tool = $tool, error = %e, $err_msg),
        }
    };
}

/// Routes tool calls to the session manager or to a session's worker.
pub struct Dispatcher<R> {
    sessions: Arc<SessionManager<R>>,
    ctx: Arc<HandlerContext>,
    call_timeout: Duration,
}

impl<R: PortalBackend> Dispatcher<R> {
    pub fn new(
        sessions: Arc<SessionManager<R>>,
        ctx: HandlerContext,
        call_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            ctx: Arc::new(ctx),
            call_timeout,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager<R>> {
        &self.sessions
    }

    /// Deadline for calls that do not pass `timeout_secs`.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    /// Run one tool call. Always yields an envelope.
    #[instrument(skip(self, args))]
    pub async fn dispatch(&self, tool: &str, args: Value) -> ResponseEnvelope {
        match self.try_dispatch(tool, args).await {
            Ok(out) => ResponseEnvelope::ok(out.message, out.data),
            Err(e) => {
                debug!(code = e.code(), error = %e, "Tool call failed");
                ResponseEnvelope::failure(tool, &e)
            }
        }
    }

    async fn try_dispatch(&self, tool: &str, args: Value) -> Result<HandlerOutput, ToolError> {
        let info = tool_registry::get_tool(tool)
            .ok_or_else(|| ToolError::UnknownTool(tool.to_string()))?;

        // Ending a session must also succeed for one that is already closing
        // or gone, so these bypass the live-session lookup.
        match info.name {
            "close_session" => {
                let session_id = session_id_arg(&args)?;
                self.sessions.close_session(session_id).await?;
                return Ok(HandlerOutput::new(
                    format!("Closed session {session_id}"),
                    json!({ "session_id": session_id, "closed": true }),
                ));
            }
            "terminate_session" => {
                let session_id = session_id_arg(&args)?;
                self.sessions.terminate_session(session_id).await?;
                return Ok(HandlerOutput::new(
                    format!("Terminated session {session_id}"),
                    json!({ "session_id": session_id, "terminated": true }),
                ));
            }
            _ => {}
        }

        let session = match info.precondition {
            Precondition::None => None,
            Precondition::SessionOnly | Precondition::SessionAndResource => {
                Some(self.resolve_session(info, &args).await?)
            }
        };

        match (info.name, session) {
            ("create_session", _) => self.create_session(args).await,
            ("list_sessions", _) => self.list_sessions().await,
            ("tool_catalog", _) => tool_catalog(args),
            ("tool_help", _) => tool_help(args),
            ("session_info", Some(session)) => Ok(HandlerOutput::new(
                format!("Session {}", session.id()),
                handlers::to_data(&session.info())?,
            )),
            (_, Some(session)) => self.run_on_worker(info, session, args).await,
            (name, None) => Err(ToolError::UnknownTool(name.to_string())),
        }
    }

    /// Check the session part of a tool's precondition.
    async fn resolve_session(
        &self,
        info: &ToolInfo,
        args: &Value,
    ) -> Result<Arc<Session<R>>, ToolError> {
        let session_id = session_id_arg(args)?;
        let session = self.sessions.get_session(session_id).await?;

        if info.precondition == Precondition::SessionAndResource
            && session.state() != SessionState::ResourceAttached
        {
            return Err(ToolError::PreconditionNotMet(format!(
                "{} requires an open project, but session {} has none",
                info.name, session_id
            )));
        }
        Ok(session)
    }

    async fn run_on_worker(
        &self,
        info: &'static ToolInfo,
        session: Arc<Session<R>>,
        args: Value,
    ) -> Result<HandlerOutput, ToolError> {
        let handler = handlers::lookup::<R>(info.name)
            .ok_or_else(|| ToolError::UnknownTool(info.name.to_string()))?;
        let timeout = self.timeout_for(&args);
        let ctx = self.ctx.clone();
        let tool = info.name;

        // Activity and the state transition are recorded on the worker, in
        // execution order, whether or not the caller is still waiting.
        let on_worker = session.clone();
        let submitted = session.bridge().submit(move |backend: &mut R| {
            let result = handler(backend, &ctx, args);
            log_result!(result, tool, "Handler completed", "Handler failed");
            on_worker.touch();
            if let Ok(out) = &result {
                match info.on_success {
                    Transition::Attach => {
                        let label = out
                            .data
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("project");
                        on_worker.attach(label);
                    }
                    Transition::Detach => on_worker.detach(),
                    Transition::None => {}
                }
            }
            result
        });
        let completion = match submitted {
            Ok(completion) => completion,
            Err(e) => return Err(self.bridge_failure(&session, e).await),
        };

        match completion.wait_timeout(timeout).await {
            Ok(result) => result,
            Err(e) => Err(self.bridge_failure(&session, e).await),
        }
    }

    /// Apply the session consequences of a bridge-level failure.
    async fn bridge_failure(&self, session: &Session<R>, err: BridgeError) -> ToolError {
        match &err {
            BridgeError::Timeout(after) => {
                warn!(
                    session_id = %session.id(),
                    timeout_ms = after.as_millis() as u64,
                    "Call timed out, marking session suspect"
                );
                session.mark_suspect();
            }
            BridgeError::Faulted => {
                error!(session_id = %session.id(), "Worker faulted, closing session");
                if let Err(e) = self.sessions.close_session(session.id()).await {
                    debug!(session_id = %session.id(), error = %e, "Faulted session already gone");
                }
            }
            _ => {}
        }
        err.into()
    }

    fn timeout_for(&self, args: &Value) -> Duration {
        args.get("timeout_secs")
            .and_then(Value::as_u64)
            .map(|secs| Duration::from_secs(secs.clamp(1, MAX_TIMEOUT_SECS)))
            .unwrap_or(self.call_timeout)
    }

    async fn create_session(&self, args: Value) -> Result<HandlerOutput, ToolError> {
        let req: CreateSessionRequest = handlers::parse(args)?;
        let metadata = match req.metadata {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(ToolError::InvalidParams(
                    "metadata must be a JSON object".to_string(),
                ))
            }
        };
        let info = self.sessions.create_session(metadata).await?;
        Ok(HandlerOutput::new(
            format!("Created session {}", info.id),
            handlers::to_data(&info)?,
        ))
    }

    async fn list_sessions(&self) -> Result<HandlerOutput, ToolError> {
        let sessions = self.sessions.list_sessions().await;
        let stats = self.sessions.stats().await;
        Ok(HandlerOutput::new(
            format!("{} sessions", sessions.len()),
            json!({
                "count": sessions.len(),
                "sessions": handlers::to_data(&sessions)?,
                "stats": handlers::to_data(&stats)?,
            }),
        ))
    }
}

/// The `session_id` argument. Missing or non-string counts as not found.
fn session_id_arg(args: &Value) -> Result<&str, ToolError> {
    args.get("session_id")
        .or_else(|| args.get("sessionId"))
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::SessionNotFound("<missing session_id>".to_string()))
}

fn tool_catalog(args: Value) -> Result<HandlerOutput, ToolError> {
    let req: ToolCatalogRequest = handlers::parse(args)?;
    let limit = req.limit.unwrap_or(7).clamp(1, 15);
    let describe = |t: &ToolInfo| {
        json!({
            "name": t.name,
            "description": t.short_desc,
            "category": t.category.as_str(),
            "precondition": t.precondition,
        })
    };

    if let Some(cat) = req
        .category
        .as_deref()
        .and_then(|c| c.parse::<ToolCategory>().ok())
    {
        let tools: Vec<_> = tool_registry::tools_by_category(cat)
            .take(limit)
            .map(describe)
            .collect();
        return Ok(HandlerOutput::new(
            format!("{} tools in {}", tools.len(), cat.as_str()),
            json!({
                "category": cat.as_str(),
                "category_description": cat.description(),
                "tools": tools,
                "hint": "Use tool_help(name) for full documentation and examples"
            }),
        ));
    }

    if let Some(query) = req.query.as_deref().filter(|q| !q.trim().is_empty()) {
        let tools: Vec<_> = tool_registry::search_tools(query, limit)
            .into_iter()
            .map(|(t, matched)| {
                let mut entry = describe(t);
                entry["matched"] = json!(matched);
                entry
            })
            .collect();
        return Ok(HandlerOutput::new(
            format!("{} tools match '{}'", tools.len(), query),
            json!({
                "query": query,
                "tools": tools,
                "hint": "Use tool_help(name) for full documentation and examples"
            }),
        ));
    }

    let categories: Vec<_> = ToolCategory::all()
        .iter()
        .map(|c| {
            json!({
                "category": c.as_str(),
                "description": c.description(),
                "tool_count": tool_registry::tools_by_category(*c).count(),
            })
        })
        .collect();
    Ok(HandlerOutput::new(
        "Tool categories",
        json!({
            "categories": categories,
            "hint": "Use tool_catalog(category='...') to list tools in a category, or tool_catalog(query='...') to search."
        }),
    ))
}

fn tool_help(args: Value) -> Result<HandlerOutput, ToolError> {
    let req: ToolHelpRequest = handlers::parse(args)?;
    match tool_registry::get_tool(&req.name) {
        Some(tool) => Ok(HandlerOutput::new(
            format!("Help for {}", tool.name),
            json!({
                "name": tool.name,
                "category": tool.category.as_str(),
                "precondition": tool.precondition,
                "description": tool.full_desc,
                "parameters": tool_params_schema(tool.name),
                "example": tool.example,
                "keywords": tool.keywords,
            }),
        )),
        None => {
            let suggestions: Vec<_> = tool_registry::search_tools(&req.name, 3)
                .into_iter()
                .map(|(t, _)| t.name)
                .collect();
            Ok(HandlerOutput::new(
                format!("Tool '{}' not found", req.name),
                json!({
                    "suggestions": suggestions,
                    "hint": "Use tool_catalog to discover available tools"
                }),
            ))
        }
    }
}
