use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{ExplorerError, Result};
use crate::trace::trace::{ActionStep, ClickPoint};

/// Append-only step log for a single flow.
///
/// Step numbers are assigned here, so they start at 1 and never skip.
#[derive(Debug, Default)]
pub struct ActionLog {
    steps: Vec<ActionStep>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        click: ClickPoint,
        element_html: String,
        screenshot: &Path,
        url: &str,
    ) -> &ActionStep {
        let step = ActionStep {
            step: self.steps.len() as u32 + 1,
            click_position: click,
            element_html,
            screenshot: screenshot.display().to_string(),
            url: url.to_string(),
        };
        debug!(step = step.step, x = click.x, y = click.y, "recorded action step");
        self.steps.push(step);
        // just pushed
        &self.steps[self.steps.len() - 1]
    }

    /// Markup of the element clicked in the latest step.
    pub fn last_element(&self) -> Option<&str> {
        self.steps.last().map(|s| s.element_html.as_str())
    }

    pub fn steps(&self) -> &[ActionStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Write the steps as a pretty JSON array, replacing `path` atomically.
    pub fn persist(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.steps)
    }

    pub fn load(path: &Path) -> Result<Vec<ActionStep>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExplorerError::io(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&content).map_err(|e| ExplorerError::Json {
            context: format!("parsing {}", path.display()),
            source: e,
        })
    }
}

pub(crate) fn write_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let json = serde_json::to_string_pretty(value).map_err(|e| ExplorerError::Json {
        context: format!("serializing {}", path.display()),
        source: e,
    })?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| ExplorerError::io(format!("creating temp file in {}", dir.display()), e))?;
    tmp.write_all(json.as_bytes())
        .map_err(|e| ExplorerError::io(format!("writing {}", path.display()), e))?;
    tmp.persist(path)
        .map_err(|e| ExplorerError::io(format!("replacing {}", path.display()), e.error))?;
    Ok(())
}
