//! Project open/save/close handlers.

use super::{parse, to_data, HandlerContext, HandlerOutput};
use crate::error::ToolError;
use crate::expand_path;
use crate::portal::PortalBackend;
use crate::server::requests::{CloseProjectRequest, OpenProjectRequest, SessionRequest};
use serde_json::{json, Value};

pub fn open_project<R: PortalBackend>(
    backend: &mut R,
    _ctx: &HandlerContext,
    args: Value,
) -> Result<HandlerOutput, ToolError> {
    let req: OpenProjectRequest = parse(args)?;
    if req.project_path.trim().is_empty() {
        return Err(ToolError::InvalidParams("project_path is empty".to_string()));
    }
    let path = expand_path(&req.project_path);
    let info = backend.open_project(&path, req.project_name.as_deref())?;
    Ok(HandlerOutput::new(
        format!("Opened project {}", info.name),
        to_data(&info)?,
    ))
}

pub fn close_project<R: PortalBackend>(
    backend: &mut R,
    _ctx: &HandlerContext,
    args: Value,
) -> Result<HandlerOutput, ToolError> {
    let req: CloseProjectRequest = parse(args)?;
    let save = req.save.unwrap_or(true);
    let name = backend.close_project(save)?;
    Ok(HandlerOutput::new(
        format!("Closed project {name}"),
        json!({ "closed": name, "saved": save }),
    ))
}

pub fn save_project<R: PortalBackend>(
    backend: &mut R,
    _ctx: &HandlerContext,
    args: Value,
) -> Result<HandlerOutput, ToolError> {
    let _: SessionRequest = parse(args)?;
    let info = backend.save_project()?;
    Ok(HandlerOutput::new(
        format!("Saved project {}", info.name),
        to_data(&info)?,
    ))
}

pub fn get_project_info<R: PortalBackend>(
    backend: &mut R,
    _ctx: &HandlerContext,
    args: Value,
) -> Result<HandlerOutput, ToolError> {
    let _: SessionRequest = parse(args)?;
    let info = backend.project_info()?;
    Ok(HandlerOutput::new(
        format!("Project {}", info.name),
        to_data(&info)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeCounters};
    use std::sync::Arc;

    #[test]
    fn open_requires_a_path() {
        let mut backend = FakeBackend::new(Arc::new(FakeCounters::default()));
        let ctx = HandlerContext::default();

        let err = open_project(&mut backend, &ctx, json!({"session_id": "s"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));

        let err = open_project(
            &mut backend,
            &ctx,
            json!({"session_id": "s", "project_path": "  "}),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[test]
    fn open_then_close_round_trip() {
        let mut backend = FakeBackend::new(Arc::new(FakeCounters::default()));
        let ctx = HandlerContext::default();

        let opened = open_project(
            &mut backend,
            &ctx,
            json!({"session_id": "s", "path": "/plant/Plant.ap18"}),
        )
        .unwrap();
        assert_eq!(opened.data["name"], "Plant");

        let closed = close_project(&mut backend, &ctx, json!({"session_id": "s", "save": false}))
            .unwrap();
        assert_eq!(closed.data, json!({"closed": "Plant", "saved": false}));
    }
}
