use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ExplorerError, Result};
use crate::trace::logger::{ActionLog, write_json_atomic};
use crate::trace::trace::{ActionStep, FlowRecord};

pub const ACTION_LOG_FILE: &str = "click_actions.json";
pub const SUMMARY_FILE: &str = "flows.json";

static SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://").expect("valid regex"));
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9A-Za-z_]").expect("valid regex"));

/// Directory name for a URL: scheme dropped, every character outside ASCII
/// `[0-9A-Za-z_]` replaced by `_`.
pub fn sanitize_url(url: &str) -> String {
    let without_scheme = SCHEME.replace(url, "");
    NON_WORD.replace_all(&without_scheme, "_").into_owned()
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| ExplorerError::io(format!("creating {}", path.display()), e))
}

/// Root of the artifact tree (`screenshot_flows/` by default).
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_dir(&self, url: &str) -> Result<UrlDir> {
        let path = self.root.join(sanitize_url(url));
        ensure_dir(&path)?;
        Ok(UrlDir { path })
    }
}

/// Artifacts of every flow explored for one URL.
#[derive(Debug, Clone)]
pub struct UrlDir {
    path: PathBuf,
}

impl UrlDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flow_dir(&self, index: usize) -> Result<FlowDir> {
        let path = self.path.join(format!("flow_{}", index));
        ensure_dir(&path)?;
        Ok(FlowDir { path })
    }

    pub fn write_summary(&self, records: &[FlowRecord]) -> Result<PathBuf> {
        let path = self.path.join(SUMMARY_FILE);
        write_json_atomic(&path, records)?;
        Ok(path)
    }
}

/// Working directory of a single flow: screenshots, page markup, action log.
#[derive(Debug, Clone)]
pub struct FlowDir {
    path: PathBuf,
}

impl FlowDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn screenshot_path(&self, index: u32) -> PathBuf {
        self.path.join(format!("page_{}.png", index))
    }

    pub fn markup_path(&self, index: u32) -> PathBuf {
        self.path.join(format!("page_{}.html", index))
    }

    pub fn action_log_path(&self) -> PathBuf {
        self.path.join(ACTION_LOG_FILE)
    }

    pub fn write_markup(&self, index: u32, html: &str) -> Result<PathBuf> {
        let path = self.markup_path(index);
        std::fs::write(&path, html)
            .map_err(|e| ExplorerError::io(format!("writing {}", path.display()), e))?;
        Ok(path)
    }

    pub fn write_action_log(&self, log: &ActionLog) -> Result<PathBuf> {
        let path = self.action_log_path();
        log.persist(&path)?;
        Ok(path)
    }

    pub fn read_action_log(&self) -> Result<Vec<ActionStep>> {
        ActionLog::load(&self.action_log_path())
    }
}
