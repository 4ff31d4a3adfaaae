//! Filesystem-backed project workspace.
//!
//! A project is a directory holding an `.ap*` project file and block
//! sources (`.xml`, `.scl`, `.udt`, `.db`), possibly in sub-folders. Saving
//! writes a small state file next to the project file.

use super::{
    BatchSummary, BlockInfo, ExportReport, ExportedBlock, ImportReport, ImportedBlock, ItemError,
    PortalBackend, ProjectInfo,
};
use crate::bridge::BridgeFactory;
use crate::error::ToolError;
use crate::session::SessionResource;
use chrono::Utc;
use serde_json::json;
use std::fs;
use std::marker::PhantomData;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BLOCK_EXTENSIONS: &[&str] = &["xml", "scl", "udt", "db"];
const STATE_FILE: &str = ".tia-mcp-state.json";

#[derive(Debug)]
struct OpenProject {
    name: String,
    store: PathBuf,
    dir: PathBuf,
    modified: bool,
}

/// Project workspace owned by one session worker.
///
/// `!Send`: the handle stands in for an apartment-bound engineering API
/// object and must stay on the thread that built it.
#[derive(Debug, Default)]
pub struct LocalWorkspace {
    project: Option<OpenProject>,
    _thread_bound: PhantomData<*const ()>,
}

impl LocalWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for session bridges; each worker builds its own workspace.
    pub fn factory() -> BridgeFactory<Self> {
        Arc::new(|| Ok(Self::new()))
    }

    fn current(&self) -> Result<&OpenProject, ToolError> {
        self.project.as_ref().ok_or(ToolError::NoProjectOpen)
    }

    fn current_mut(&mut self) -> Result<&mut OpenProject, ToolError> {
        self.project.as_mut().ok_or(ToolError::NoProjectOpen)
    }

    fn info_for(project: &OpenProject) -> Result<ProjectInfo, ToolError> {
        Ok(ProjectInfo {
            name: project.name.clone(),
            store_path: project.store.display().to_string(),
            path: project.dir.display().to_string(),
            is_modified: project.modified,
            block_count: collect_blocks(&project.dir)?.len(),
        })
    }
}

impl SessionResource for LocalWorkspace {
    fn release(&mut self) -> Result<(), ToolError> {
        if self.project.is_some() {
            self.close_project(true)?;
        }
        Ok(())
    }
}

impl PortalBackend for LocalWorkspace {
    fn open_project(&mut self, path: &Path, name: Option<&str>) -> Result<ProjectInfo, ToolError> {
        if let Some(open) = &self.project {
            return Err(ToolError::ProjectAlreadyOpen(open.name.clone()));
        }

        let (store, name) = resolve_project(path, name)?;
        let dir = store.join(&name);
        if !dir.is_dir() {
            return Err(ToolError::ProjectNotFound(dir.display().to_string()));
        }

        info!(project = %name, store = %store.display(), "Opening project");
        let project = OpenProject {
            name,
            store,
            dir,
            modified: false,
        };
        let info = Self::info_for(&project)?;
        self.project = Some(project);
        Ok(info)
    }

    fn save_project(&mut self) -> Result<ProjectInfo, ToolError> {
        let project = self.current_mut()?;
        let blocks = collect_blocks(&project.dir)?;
        let state = json!({
            "project": project.name,
            "saved_at": Utc::now().to_rfc3339(),
            "block_count": blocks.len(),
        });
        let body = serde_json::to_vec_pretty(&state).map_err(|e| ToolError::Io(e.to_string()))?;
        fs::write(project.dir.join(STATE_FILE), body)?;
        project.modified = false;
        debug!(project = %project.name, "Project saved");
        Self::info_for(project)
    }

    fn close_project(&mut self, save: bool) -> Result<String, ToolError> {
        let modified = self.current()?.modified;
        if save && modified {
            self.save_project()?;
        }
        let project = self.project.take().ok_or(ToolError::NoProjectOpen)?;
        info!(project = %project.name, discarded_changes = !save && modified, "Project closed");
        Ok(project.name)
    }

    fn project_info(&self) -> Result<ProjectInfo, ToolError> {
        Self::info_for(self.current()?)
    }

    fn list_blocks(&self) -> Result<Vec<BlockInfo>, ToolError> {
        let project = self.current()?;
        Ok(collect_blocks(&project.dir)?
            .into_iter()
            .map(|(block, _)| block)
            .collect())
    }

    fn export_blocks(
        &mut self,
        names: Option<&[String]>,
        output: &Path,
    ) -> Result<ExportReport, ToolError> {
        let project = self.current()?;
        let blocks = collect_blocks(&project.dir)?;
        fs::create_dir_all(output)?;

        let wanted: Vec<String> = match names {
            Some(names) if !names.is_empty() => names.to_vec(),
            _ => blocks.iter().map(|(b, _)| b.name.clone()).collect(),
        };

        let mut exported = Vec::new();
        let mut errors = Vec::new();
        for name in wanted {
            let Some((_, source)) = blocks.iter().find(|(b, _)| b.name == name) else {
                errors.push(ItemError {
                    item: name,
                    error: "Block not found".to_string(),
                });
                continue;
            };
            let Some(file_name) = source.file_name() else {
                continue;
            };
            let target = output.join(file_name);
            match fs::copy(source, &target) {
                Ok(_) => exported.push(ExportedBlock {
                    block_name: name,
                    file_path: target.display().to_string(),
                }),
                Err(e) => errors.push(ItemError {
                    item: name,
                    error: e.to_string(),
                }),
            }
        }

        let summary = BatchSummary::new(exported.len(), errors.len());
        Ok(ExportReport {
            output_path: output.display().to_string(),
            exported,
            errors,
            summary,
        })
    }

    fn import_blocks(
        &mut self,
        files: &[PathBuf],
        target_folder: Option<&str>,
    ) -> Result<ImportReport, ToolError> {
        let folder = match target_folder {
            Some(f) if !f.trim().is_empty() => Some(relative_folder(f)?),
            _ => None,
        };
        let project = self.current_mut()?;
        let dest_dir = match &folder {
            Some(f) => project.dir.join(f),
            None => project.dir.clone(),
        };

        let mut imported = Vec::new();
        let mut errors = Vec::new();
        for file in files {
            let item = file.display().to_string();
            if !file.is_file() {
                errors.push(ItemError {
                    item,
                    error: "File not found".to_string(),
                });
                continue;
            }
            let (Some(stem), Some(file_name)) = (block_stem(file), file.file_name()) else {
                errors.push(ItemError {
                    item,
                    error: format!("Unsupported block file, expected one of {:?}", BLOCK_EXTENSIONS),
                });
                continue;
            };
            let copied = fs::create_dir_all(&dest_dir)
                .and_then(|_| fs::copy(file, dest_dir.join(file_name)));
            match copied {
                Ok(_) => imported.push(ImportedBlock {
                    path: item,
                    block_name: stem,
                    folder: target_folder.map(str::to_string),
                }),
                Err(e) => errors.push(ItemError {
                    item,
                    error: e.to_string(),
                }),
            }
        }

        if !imported.is_empty() {
            project.modified = true;
        }
        let summary = BatchSummary::new(imported.len(), errors.len());
        Ok(ImportReport {
            imported,
            errors,
            summary,
        })
    }
}

/// Resolve `(store, project name)` from a user supplied path.
fn resolve_project(path: &Path, name: Option<&str>) -> Result<(PathBuf, String), ToolError> {
    if !path.exists() {
        return Err(ToolError::ProjectNotFound(path.display().to_string()));
    }

    if path.is_file() {
        if !is_project_file(path) {
            return Err(ToolError::InvalidPath(format!(
                "not a project file (.ap*): {}",
                path.display()
            )));
        }
        let dir = path
            .parent()
            .ok_or_else(|| ToolError::InvalidPath(path.display().to_string()))?;
        let store = dir.parent().unwrap_or(dir);
        let proj_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ToolError::InvalidPath(path.display().to_string()))?;
        return Ok((store.to_path_buf(), proj_name));
    }

    if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
        return Ok((path.to_path_buf(), name.to_string()));
    }

    let project_file = find_project_file(path)?.ok_or_else(|| {
        ToolError::ProjectNotFound(format!("no project file found in {}", path.display()))
    })?;
    let dir = project_file.parent().unwrap_or(path);
    if dir == path {
        // Project file sits directly in the given directory.
        let store = path.parent().unwrap_or(path);
        let proj_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ToolError::InvalidPath(path.display().to_string()))?;
        return Ok((store.to_path_buf(), proj_name));
    }
    let proj_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ToolError::InvalidPath(dir.display().to_string()))?;
    Ok((path.to_path_buf(), proj_name))
}

fn is_project_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.to_ascii_lowercase().starts_with("ap"))
}

/// First `.ap*` file below `dir`, depth first in name order.
fn find_project_file(dir: &Path) -> Result<Option<PathBuf>, ToolError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for entry in &entries {
        if entry.is_file() && is_project_file(entry) {
            return Ok(Some(entry.clone()));
        }
    }
    for entry in entries.iter().filter(|e| e.is_dir()) {
        if let Some(found) = find_project_file(entry)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn block_stem(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !BLOCK_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

fn block_type(stem: &str, path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "scl" => "SCL",
        "udt" => "UDT",
        "db" => "DB",
        _ => {
            let upper = stem.to_ascii_uppercase();
            ["UDT", "OB", "FB", "FC", "DB"]
                .into_iter()
                .find(|prefix| upper.starts_with(prefix))
                .unwrap_or("XML")
        }
    }
}

/// Every block file under `root`, sorted by folder then name.
fn collect_blocks(root: &Path) -> Result<Vec<(BlockInfo, PathBuf)>, ToolError> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if hidden {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let Some(stem) = block_stem(&path) else {
                continue;
            };
            let folder = path
                .parent()
                .and_then(|p| p.strip_prefix(root).ok())
                .map(|p| {
                    p.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/")
                })
                .unwrap_or_default();
            out.push((
                BlockInfo {
                    block_type: block_type(&stem, &path).to_string(),
                    name: stem,
                    path: folder,
                },
                path,
            ));
        }
    }
    out.sort_by(|(a, _), (b, _)| (&a.path, &a.name).cmp(&(&b.path, &b.name)));
    Ok(out)
}

/// Validate a folder name supplied by a caller: relative, no `..`.
fn relative_folder(folder: &str) -> Result<PathBuf, ToolError> {
    let path = Path::new(folder.trim());
    let clean = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !clean {
        return Err(ToolError::InvalidPath(format!(
            "target folder must be relative and stay inside the project: {folder}"
        )));
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// store/Plant/Plant.ap18 with a couple of blocks.
    fn plant() -> (TempDir, PathBuf) {
        let store = TempDir::new().unwrap();
        let dir = store.path().join("Plant");
        fs::create_dir_all(dir.join("Conveyors")).unwrap();
        fs::write(dir.join("Plant.ap18"), b"").unwrap();
        fs::write(dir.join("Main_OB1.xml"), b"<ob/>").unwrap();
        fs::write(dir.join("Conveyors").join("FB_Conveyor.xml"), b"<fb/>").unwrap();
        fs::write(dir.join("Conveyors").join("Motor.udt"), b"TYPE Motor").unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();
        (store, dir)
    }

    #[test]
    fn opens_from_project_file() {
        let (store, dir) = plant();
        let mut ws = LocalWorkspace::new();
        let info = ws.open_project(&dir.join("Plant.ap18"), None).unwrap();
        assert_eq!(info.name, "Plant");
        assert_eq!(info.store_path, store.path().display().to_string());
        assert_eq!(info.block_count, 3);
        assert!(!info.is_modified);
    }

    #[test]
    fn opens_from_directory() {
        let (store, _) = plant();

        let mut by_search = LocalWorkspace::new();
        assert_eq!(by_search.open_project(store.path(), None).unwrap().name, "Plant");

        let mut by_name = LocalWorkspace::new();
        assert_eq!(
            by_name.open_project(store.path(), Some("Plant")).unwrap().name,
            "Plant"
        );

        let mut missing = LocalWorkspace::new();
        assert!(matches!(
            missing.open_project(store.path(), Some("Other")),
            Err(ToolError::ProjectNotFound(_))
        ));
    }

    #[test]
    fn directory_without_project_file_is_rejected() {
        let empty = TempDir::new().unwrap();
        let mut ws = LocalWorkspace::new();
        assert!(matches!(
            ws.open_project(empty.path(), None),
            Err(ToolError::ProjectNotFound(msg)) if msg.contains("no project file")
        ));
        assert!(matches!(
            ws.open_project(&empty.path().join("nope"), None),
            Err(ToolError::ProjectNotFound(_))
        ));
    }

    #[test]
    fn one_project_at_a_time() {
        let (_store, dir) = plant();
        let mut ws = LocalWorkspace::new();
        ws.open_project(&dir, None).unwrap();
        assert!(matches!(
            ws.open_project(&dir, None),
            Err(ToolError::ProjectAlreadyOpen(name)) if name == "Plant"
        ));
        assert_eq!(ws.close_project(true).unwrap(), "Plant");
        assert!(matches!(ws.close_project(true), Err(ToolError::NoProjectOpen)));
    }

    #[test]
    fn lists_blocks_with_types_and_folders() {
        let (_store, dir) = plant();
        let mut ws = LocalWorkspace::new();
        ws.open_project(&dir, None).unwrap();

        let blocks = ws.list_blocks().unwrap();
        let summary: Vec<(&str, &str, &str)> = blocks
            .iter()
            .map(|b| (b.path.as_str(), b.name.as_str(), b.block_type.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("", "Main_OB1", "XML"),
                ("Conveyors", "FB_Conveyor", "FB"),
                ("Conveyors", "Motor", "UDT"),
            ]
        );
    }

    #[test]
    fn export_reports_missing_blocks() {
        let (_store, dir) = plant();
        let out = TempDir::new().unwrap();
        let mut ws = LocalWorkspace::new();
        ws.open_project(&dir, None).unwrap();

        let names = vec!["FB_Conveyor".to_string(), "Ghost".to_string()];
        let report = ws.export_blocks(Some(&names), out.path()).unwrap();
        assert_eq!(report.summary, BatchSummary::new(1, 1));
        assert_eq!(report.errors[0].item, "Ghost");
        assert!(out.path().join("FB_Conveyor.xml").is_file());

        let all = ws.export_blocks(None, &out.path().join("all")).unwrap();
        assert_eq!(all.summary.succeeded, 3);
    }

    #[test]
    fn import_marks_modified_and_save_clears_it() {
        let (_store, dir) = plant();
        let src = TempDir::new().unwrap();
        let file = src.path().join("FC_Calc.scl");
        fs::write(&file, b"FUNCTION FC_Calc").unwrap();

        let mut ws = LocalWorkspace::new();
        ws.open_project(&dir, None).unwrap();
        let report = ws
            .import_blocks(&[file, src.path().join("missing.xml")], Some("Imported"))
            .unwrap();
        assert_eq!(report.summary, BatchSummary::new(1, 1));
        assert!(dir.join("Imported").join("FC_Calc.scl").is_file());
        assert!(ws.project_info().unwrap().is_modified);

        let saved = ws.save_project().unwrap();
        assert!(!saved.is_modified);
        assert_eq!(saved.block_count, 4);
        assert!(dir.join(STATE_FILE).is_file());
    }

    #[test]
    fn import_rejects_escaping_folder() {
        let (_store, dir) = plant();
        let mut ws = LocalWorkspace::new();
        ws.open_project(&dir, None).unwrap();
        assert!(matches!(
            ws.import_blocks(&[], Some("../outside")),
            Err(ToolError::InvalidPath(_))
        ));
    }

    #[test]
    fn release_saves_pending_changes() {
        let (_store, dir) = plant();
        let src = TempDir::new().unwrap();
        let file = src.path().join("DB_Settings.db");
        fs::write(&file, b"DATA_BLOCK").unwrap();

        let mut ws = LocalWorkspace::new();
        ws.open_project(&dir, None).unwrap();
        ws.import_blocks(&[file], None).unwrap();
        ws.release().unwrap();

        assert!(dir.join(STATE_FILE).is_file());
        assert!(matches!(ws.project_info(), Err(ToolError::NoProjectOpen)));
        // Releasing an empty workspace is a no-op.
        ws.release().unwrap();
    }
}
