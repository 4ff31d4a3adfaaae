//! Test doubles shared by unit tests.

use crate::bridge::BridgeFactory;
use crate::error::ToolError;
use crate::portal::{
    BatchSummary, BlockInfo, ExportReport, ImportReport, PortalBackend, ProjectInfo,
};
use crate::session::SessionResource;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shared knobs and counters for [`FakeBackend`] instances.
#[derive(Debug, Default)]
pub(crate) struct FakeCounters {
    calls: AtomicUsize,
    releases: AtomicUsize,
    delay_ms: AtomicU64,
    panic_next: AtomicBool,
    fail_next: AtomicBool,
}

impl FakeCounters {
    /// Backend operations run, excluding `release`.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Every following operation sleeps this long on the worker.
    pub(crate) fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

/// In-memory backend. Holds an `Rc` so it cannot leave its worker.
#[derive(Debug)]
pub(crate) struct FakeBackend {
    counters: Arc<FakeCounters>,
    project: Option<String>,
    _not_send: Rc<()>,
}

impl FakeBackend {
    pub(crate) fn new(counters: Arc<FakeCounters>) -> Self {
        Self {
            counters,
            project: None,
            _not_send: Rc::new(()),
        }
    }

    fn enter(&self) -> Result<(), ToolError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.counters.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        if self.counters.panic_next.swap(false, Ordering::SeqCst) {
            panic!("fake backend crashed");
        }
        if self.counters.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ToolError::Backend("fake backend refused".to_string()));
        }
        Ok(())
    }

    fn info(&self) -> Result<ProjectInfo, ToolError> {
        let name = self.project.clone().ok_or(ToolError::NoProjectOpen)?;
        Ok(ProjectInfo {
            store_path: "/fake".to_string(),
            path: format!("/fake/{name}"),
            name,
            is_modified: false,
            block_count: 1,
        })
    }
}

impl SessionResource for FakeBackend {
    fn release(&mut self) -> Result<(), ToolError> {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        self.project = None;
        Ok(())
    }
}

impl PortalBackend for FakeBackend {
    fn open_project(&mut self, path: &Path, name: Option<&str>) -> Result<ProjectInfo, ToolError> {
        self.enter()?;
        if let Some(open) = &self.project {
            return Err(ToolError::ProjectAlreadyOpen(open.clone()));
        }
        let name = match name {
            Some(n) => n.to_string(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or_else(|| ToolError::ProjectNotFound(path.display().to_string()))?,
        };
        self.project = Some(name);
        self.info()
    }

    fn save_project(&mut self) -> Result<ProjectInfo, ToolError> {
        self.enter()?;
        self.info()
    }

    fn close_project(&mut self, _save: bool) -> Result<String, ToolError> {
        self.enter()?;
        self.project.take().ok_or(ToolError::NoProjectOpen)
    }

    fn project_info(&self) -> Result<ProjectInfo, ToolError> {
        self.enter()?;
        self.info()
    }

    fn list_blocks(&self) -> Result<Vec<BlockInfo>, ToolError> {
        self.enter()?;
        self.info()?;
        Ok(vec![BlockInfo {
            name: "Main".to_string(),
            block_type: "OB".to_string(),
            path: String::new(),
        }])
    }

    fn export_blocks(
        &mut self,
        _names: Option<&[String]>,
        output: &Path,
    ) -> Result<ExportReport, ToolError> {
        self.enter()?;
        Ok(ExportReport {
            output_path: output.display().to_string(),
            exported: Vec::new(),
            errors: Vec::new(),
            summary: BatchSummary::default(),
        })
    }

    fn import_blocks(
        &mut self,
        files: &[PathBuf],
        _target_folder: Option<&str>,
    ) -> Result<ImportReport, ToolError> {
        self.enter()?;
        Ok(ImportReport {
            imported: Vec::new(),
            errors: Vec::new(),
            summary: BatchSummary::new(0, files.len()),
        })
    }
}

pub(crate) fn fake_factory(counters: Arc<FakeCounters>) -> BridgeFactory<FakeBackend> {
    Arc::new(move || Ok(FakeBackend::new(counters.clone())))
}

pub(crate) fn failing_factory() -> BridgeFactory<FakeBackend> {
    Arc::new(|| Err(ToolError::Backend("engineering API unavailable".to_string())))
}
