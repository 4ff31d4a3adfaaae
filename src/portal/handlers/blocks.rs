//! Block listing, export and import handlers.

use super::{parse, to_data, HandlerContext, HandlerOutput};
use crate::error::ToolError;
use crate::expand_path;
use crate::portal::PortalBackend;
use crate::server::requests::{ExportBlocksRequest, ImportBlocksRequest, ListBlocksRequest};
use serde_json::{json, Value};
use std::path::PathBuf;

pub fn list_blocks<R: PortalBackend>(
    backend: &mut R,
    _ctx: &HandlerContext,
    args: Value,
) -> Result<HandlerOutput, ToolError> {
    let req: ListBlocksRequest = parse(args)?;
    let mut blocks = backend.list_blocks()?;
    if let Some(kind) = req.block_type.as_deref().filter(|k| !k.trim().is_empty()) {
        blocks.retain(|b| b.block_type.eq_ignore_ascii_case(kind.trim()));
    }
    Ok(HandlerOutput::new(
        format!("Found {} blocks", blocks.len()),
        json!({ "count": blocks.len(), "blocks": to_data(&blocks)? }),
    ))
}

pub fn export_blocks<R: PortalBackend>(
    backend: &mut R,
    ctx: &HandlerContext,
    args: Value,
) -> Result<HandlerOutput, ToolError> {
    let req: ExportBlocksRequest = parse(args)?;
    let output = req
        .output_path
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(|| ctx.export_dir.clone());
    let report = backend.export_blocks(req.block_names.as_deref(), &output)?;
    Ok(HandlerOutput::new(
        format!(
            "Exported {} of {} blocks",
            report.summary.succeeded, report.summary.total
        ),
        to_data(&report)?,
    ))
}

pub fn import_blocks<R: PortalBackend>(
    backend: &mut R,
    _ctx: &HandlerContext,
    args: Value,
) -> Result<HandlerOutput, ToolError> {
    let req: ImportBlocksRequest = parse(args)?;
    if req.paths.is_empty() {
        return Err(ToolError::InvalidParams("paths is empty".to_string()));
    }
    let files: Vec<PathBuf> = req.paths.iter().map(|p| expand_path(p)).collect();
    let report = backend.import_blocks(&files, req.target_folder.as_deref())?;
    Ok(HandlerOutput::new(
        format!(
            "Imported {} of {} blocks",
            report.summary.succeeded, report.summary.total
        ),
        to_data(&report)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::LocalWorkspace;
    use std::fs;
    use tempfile::TempDir;

    fn opened_workspace() -> (TempDir, LocalWorkspace) {
        let store = TempDir::new().unwrap();
        let dir = store.path().join("Line");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Line.ap19"), b"").unwrap();
        fs::write(dir.join("FB_Pump.xml"), b"<fb/>").unwrap();
        fs::write(dir.join("FC_Scale.xml"), b"<fc/>").unwrap();
        fs::write(dir.join("Recipe.udt"), b"TYPE").unwrap();

        let mut ws = LocalWorkspace::new();
        ws.open_project(&dir, None).unwrap();
        (store, ws)
    }

    #[test]
    fn list_filters_by_type() {
        let (_store, mut ws) = opened_workspace();
        let ctx = HandlerContext::default();

        let all = list_blocks(&mut ws, &ctx, json!({"session_id": "s"})).unwrap();
        assert_eq!(all.data["count"], 3);

        let fbs = list_blocks(&mut ws, &ctx, json!({"session_id": "s", "type": "fb"})).unwrap();
        assert_eq!(fbs.data["count"], 1);
        assert_eq!(fbs.data["blocks"][0]["name"], "FB_Pump");
        assert_eq!(fbs.data["blocks"][0]["type"], "FB");
    }

    #[test]
    fn export_defaults_to_context_dir() {
        let (_store, mut ws) = opened_workspace();
        let out = TempDir::new().unwrap();
        let ctx = HandlerContext {
            export_dir: out.path().join("exports"),
        };

        let result = export_blocks(&mut ws, &ctx, json!({"session_id": "s"})).unwrap();
        assert_eq!(result.message, "Exported 3 of 3 blocks");
        assert!(out.path().join("exports").join("Recipe.udt").is_file());
    }

    #[test]
    fn import_needs_paths() {
        let (_store, mut ws) = opened_workspace();
        let err = import_blocks(
            &mut ws,
            &HandlerContext::default(),
            json!({"session_id": "s", "paths": []}),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
