use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::artifacts::annotate::{Annotator, annotate_in_place};
use crate::artifacts::store::FlowDir;
use crate::browser::applier::{ActionApplier, Transition};
use crate::browser::session::{RenderingSession, Surface};
use crate::error::{ErrorKind, ExplorerError, Result};
use crate::oracle::protocol::OracleDecision;
use crate::oracle::{Oracle, OracleRequest};
use crate::trace::logger::ActionLog;
use crate::trace::trace::{ClickPoint, Termination};

pub const DEFAULT_MAX_CLICKS: u32 = 10;

/// Result of one interaction loop. The log holds every step accepted before
/// termination, whatever the reason.
#[derive(Debug)]
pub struct FlowOutcome {
    pub termination: Termination,
    pub log: ActionLog,
}

struct Capture {
    screenshot: PathBuf,
    url: String,
    request: OracleRequest,
}

/// Runs the capture / ask / apply loop of a single flow.
pub struct FlowRunner<'a> {
    pub applier: &'a ActionApplier,
    pub oracle: &'a dyn Oracle,
    pub annotator: &'a dyn Annotator,
    pub max_clicks: u32,
}

impl<'a> FlowRunner<'a> {
    /// `fixed` is how many leading selectables the flow's combination pinned.
    pub async fn run<S: RenderingSession>(
        &self,
        session: &S,
        surface: S::Surface,
        fixed: usize,
        dir: &FlowDir,
    ) -> FlowOutcome {
        let mut log = ActionLog::new();
        let termination = self.drive(session, surface, fixed, dir, &mut log).await;
        FlowOutcome { termination, log }
    }

    async fn drive<S: RenderingSession>(
        &self,
        session: &S,
        mut surface: S::Surface,
        fixed: usize,
        dir: &FlowDir,
        log: &mut ActionLog,
    ) -> Termination {
        let mut clicks = 0u32;
        let mut capture_index = 0u32;

        loop {
            if clicks >= self.max_clicks {
                return Termination::ClickLimit;
            }

            // ---- CAPTURE ----
            self.applier.prepare(&surface, fixed).await;
            capture_index += 1;
            let capture = match self.capture(&surface, dir, capture_index).await {
                Ok(c) => c,
                Err(e) => return Termination::Failed(e.to_string()),
            };

            // ---- ASK ----
            let decision = match self.oracle.ask(&capture.request).await {
                Ok(d) => d,
                Err(e) => return Termination::from(&e),
            };

            let (x, y) = match decision {
                OracleDecision::NoTarget => return Termination::NoTarget,
                OracleDecision::Malformed(raw) => {
                    return Termination::ProtocolError(format!("unrecognized oracle reply {:?}", raw));
                }
                OracleDecision::Click { x, y } => (x, y),
            };

            let element = match self.applier.resolve_element_at(&surface, x, y).await {
                Ok(Some(html)) => html,
                Ok(None) => {
                    info!(x, y, "no element at click point");
                    return Termination::StuckNoElement;
                }
                Err(e) => return Termination::Failed(e.to_string()),
            };
            if log.last_element() == Some(element.as_str()) {
                info!(x, y, "click point resolves to the previous element");
                return Termination::StuckSameElement;
            }

            let point = ClickPoint::new(x, y);
            log.record(point, element, &capture.screenshot, &capture.url);

            // ---- APPLY ----
            if let Err(e) = annotate_in_place(self.annotator, &capture.screenshot, point) {
                warn!(error = %e, "keeping unannotated screenshot");
            }
            if let Err(e) = self.applier.apply_click(&surface, x, y).await {
                return Termination::Failed(e.to_string());
            }

            let transition = self.applier.detect_transition(session, &surface).await;
            if let Transition::Opened(next) = transition {
                surface = next;
            }
            clicks += 1;
            debug!(clicks, "click applied");
        }
    }

    async fn capture<F: Surface>(&self, surface: &F, dir: &FlowDir, index: u32) -> Result<Capture> {
        let screenshot = dir.screenshot_path(index);
        surface.screenshot(&screenshot).await?;
        let url = surface.url().await?;

        let markup = if self.oracle.requires_markup() {
            let html = surface.content().await?;
            Some(dir.write_markup(index, &html)?)
        } else {
            None
        };

        debug!(path = %screenshot.display(), url = %url, "captured page state");
        Ok(Capture {
            request: OracleRequest {
                artifact: screenshot.clone(),
                markup,
            },
            screenshot,
            url,
        })
    }
}

impl From<&ExplorerError> for Termination {
    fn from(err: &ExplorerError) -> Self {
        match err.kind() {
            ErrorKind::Protocol => Termination::ProtocolError(err.to_string()),
            _ => Termination::Failed(err.to_string()),
        }
    }
}
