#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};

use login_flow_explorer::artifacts::annotate::Annotator;
use login_flow_explorer::browser::session::{
    RenderingSession, Selectable, SessionLauncher, Surface, TextInput,
};
use login_flow_explorer::error::{ExplorerError, Result};
use login_flow_explorer::oracle::protocol::OracleDecision;
use login_flow_explorer::oracle::{Oracle, OracleRequest};
use login_flow_explorer::trace::trace::ClickPoint;

// ============================================================================
// Page script
// ============================================================================

/// How a transition watch behaves, overriding what clicks and selects trigger.
#[derive(Debug, Clone, Copy, Default)]
pub enum WatchScript {
    /// Resolves only when a click or select on the page triggers it.
    #[default]
    Scripted,
    SucceedAfter(u64),
    FailAfter(u64),
}

/// How the fake page behaves.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub selectables: Vec<Selectable>,
    pub inputs: Vec<TextInput>,
    /// A click completes a navigation on the clicked surface.
    pub navigate_on_click: bool,
    /// A click opens a new surface at this URL.
    pub open_on_click: Option<String>,
    /// Points where nothing is rendered.
    pub empty_points: Vec<(i64, i64)>,
    /// Selecting the value reveals the selectable, once.
    pub reveals: Vec<(String, Selectable)>,
    /// Selecting the value navigates to a page with these selectables.
    pub navigate_on_select: Vec<(String, Vec<Selectable>)>,
    pub navigation_watch: WatchScript,
    pub opened_watch: WatchScript,
    /// Input handles whose typing never completes.
    pub hanging_inputs: Vec<usize>,
    /// Selectable handles whose selection never completes.
    pub hanging_selects: Vec<usize>,
    pub fail_launch: bool,
    pub fail_open: bool,
}

pub fn selectable(name: &str, values: &[&str]) -> Selectable {
    Selectable {
        handle: 0,
        name: Some(name.to_string()),
        values: values.iter().map(|v| v.to_string()).collect(),
        selected: 0,
    }
}

pub fn text_input(handle: usize, input_type: &str) -> TextInput {
    TextInput {
        handle,
        input_type: input_type.to_string(),
        visible: true,
        disabled: false,
        read_only: false,
    }
}

fn with_handles(mut selectables: Vec<Selectable>) -> Vec<Selectable> {
    for (i, s) in selectables.iter_mut().enumerate() {
        s.handle = i;
    }
    selectables
}

// ============================================================================
// Recorder
// ============================================================================

/// Everything the fakes were asked to do, across sessions.
#[derive(Debug, Default)]
pub struct Recorder {
    pub launches: usize,
    pub closes: usize,
    /// (session, selectable name, value)
    pub selections: Vec<(usize, String, String)>,
    /// (session, input handle, text)
    pub typed: Vec<(usize, usize, String)>,
    /// (session, surface url, x, y)
    pub clicks: Vec<(usize, String, f64, f64)>,
    pub moves: Vec<(f64, f64)>,
}

// ============================================================================
// Launcher / session / surface
// ============================================================================

#[derive(Clone)]
pub struct FakeLauncher {
    pub script: Arc<PageScript>,
    pub recorder: Arc<Mutex<Recorder>>,
}

impl FakeLauncher {
    pub fn new(script: PageScript) -> Self {
        Self {
            script: Arc::new(script),
            recorder: Arc::new(Mutex::new(Recorder::default())),
        }
    }

    pub fn recorder(&self) -> std::sync::MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap()
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    type Session = FakeSession;

    async fn launch(&self) -> Result<FakeSession> {
        if self.script.fail_launch {
            return Err(ExplorerError::browser("launch", "no browser available"));
        }
        let mut rec = self.recorder.lock().unwrap();
        let id = rec.launches;
        rec.launches += 1;
        Ok(FakeSession {
            id,
            script: self.script.clone(),
            recorder: self.recorder.clone(),
        })
    }
}

pub struct FakeSession {
    pub id: usize,
    script: Arc<PageScript>,
    recorder: Arc<Mutex<Recorder>>,
}

impl FakeSession {
    fn surface(&self, url: &str, selectables: Vec<Selectable>) -> FakeSurface {
        FakeSurface {
            session: self.id,
            url: url.to_string(),
            script: self.script.clone(),
            recorder: self.recorder.clone(),
            state: Mutex::new(SurfaceState {
                selectables: with_handles(selectables),
                revealed: HashSet::new(),
                navigation_pending: false,
            }),
            popup_pending: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RenderingSession for FakeSession {
    type Surface = FakeSurface;

    async fn open(&self, url: &str) -> Result<FakeSurface> {
        if self.script.fail_open {
            return Err(ExplorerError::browser("open", "page load timed out"));
        }
        Ok(self.surface(url, self.script.selectables.clone()))
    }

    async fn wait_for_opened(&self, opener: &FakeSurface) -> Result<FakeSurface> {
        match self.script.opened_watch {
            WatchScript::SucceedAfter(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                return Ok(self.surface(POPUP_URL, Vec::new()));
            }
            WatchScript::FailAfter(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                return Err(ExplorerError::browser("target listener", "browser closed"));
            }
            WatchScript::Scripted => {}
        }
        match &self.script.open_on_click {
            Some(url) if opener.popup_pending.swap(false, Ordering::SeqCst) => {
                Ok(self.surface(url, Vec::new()))
            }
            _ => futures::future::pending().await,
        }
    }

    async fn close(self) -> Result<()> {
        self.recorder.lock().unwrap().closes += 1;
        Ok(())
    }
}

struct SurfaceState {
    selectables: Vec<Selectable>,
    revealed: HashSet<String>,
    navigation_pending: bool,
}

pub struct FakeSurface {
    pub session: usize,
    pub url: String,
    script: Arc<PageScript>,
    recorder: Arc<Mutex<Recorder>>,
    state: Mutex<SurfaceState>,
    popup_pending: AtomicBool,
}

/// URL of surfaces opened through `opened_watch`.
pub const POPUP_URL: &str = "https://popup.bank.example/";

pub fn element_markup(x: i64, y: i64) -> String {
    format!("<button data-x=\"{}\" data-y=\"{}\">Sign in</button>", x, y)
}

pub fn write_blank_png(path: &Path) {
    RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 255]))
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}

#[async_trait]
impl Surface for FakeSurface {
    async fn url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        write_blank_png(path);
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        Ok(format!("<html><body data-url=\"{}\"></body></html>", self.url))
    }

    async fn element_at(&self, x: i64, y: i64) -> Result<Option<String>> {
        if self.script.empty_points.contains(&(x, y)) {
            return Ok(None);
        }
        Ok(Some(element_markup(x, y)))
    }

    async fn move_pointer(&self, x: f64, y: f64) -> Result<()> {
        self.recorder.lock().unwrap().moves.push((x, y));
        Ok(())
    }

    async fn click(&self, x: f64, y: f64) -> Result<()> {
        self.recorder
            .lock()
            .unwrap()
            .clicks
            .push((self.session, self.url.clone(), x, y));
        if self.script.navigate_on_click {
            self.state.lock().unwrap().navigation_pending = true;
        }
        if self.script.open_on_click.is_some() {
            self.popup_pending.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn selectables(&self) -> Result<Vec<Selectable>> {
        Ok(self.state.lock().unwrap().selectables.clone())
    }

    async fn select(&self, selectable: &Selectable, value: &str) -> Result<()> {
        if self.script.hanging_selects.contains(&selectable.handle) {
            futures::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        let Some(current) = state.selectables.get_mut(selectable.handle) else {
            return Err(ExplorerError::interaction("select", "no such control"));
        };
        let Some(index) = current.values.iter().position(|v| v == value) else {
            return Err(ExplorerError::interaction("select", format!("{} not offered", value)));
        };
        current.selected = index;
        let name = current.name.clone().unwrap_or_default();

        for (trigger, revealed) in &self.script.reveals {
            if trigger == value && state.revealed.insert(trigger.clone()) {
                let mut revealed = revealed.clone();
                revealed.handle = state.selectables.len();
                state.selectables.push(revealed);
            }
        }
        if let Some((_, next)) = self.script.navigate_on_select.iter().find(|(t, _)| t == value) {
            state.selectables = with_handles(next.clone());
            state.revealed.clear();
            state.navigation_pending = true;
        }
        drop(state);

        self.recorder
            .lock()
            .unwrap()
            .selections
            .push((self.session, name, value.to_string()));
        Ok(())
    }

    async fn text_inputs(&self) -> Result<Vec<TextInput>> {
        Ok(self.script.inputs.clone())
    }

    async fn type_text(&self, input: &TextInput, text: &str) -> Result<()> {
        if self.script.hanging_inputs.contains(&input.handle) {
            futures::future::pending::<()>().await;
        }
        self.recorder
            .lock()
            .unwrap()
            .typed
            .push((self.session, input.handle, text.to_string()));
        Ok(())
    }

    async fn wait_for_navigation(&self) -> Result<()> {
        match self.script.navigation_watch {
            WatchScript::SucceedAfter(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                return Ok(());
            }
            WatchScript::FailAfter(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                return Err(ExplorerError::browser("load listener", "target crashed"));
            }
            WatchScript::Scripted => {}
        }
        let pending = std::mem::take(&mut self.state.lock().unwrap().navigation_pending);
        if pending {
            return Ok(());
        }
        futures::future::pending().await
    }

    async fn bring_to_front(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Oracle
// ============================================================================

type Decide = dyn Fn(u32) -> Result<OracleDecision> + Send + Sync;

/// Decides from the capture index in the artifact name (`page_<n>.png`).
pub struct ScriptedOracle {
    decide: Box<Decide>,
    markup: bool,
    pub requests: Mutex<Vec<OracleRequest>>,
    pub closed: AtomicBool,
}

impl ScriptedOracle {
    pub fn new(decide: impl Fn(u32) -> Result<OracleDecision> + Send + Sync + 'static) -> Self {
        Self {
            decide: Box::new(decide),
            markup: false,
            requests: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Clicks a distinct point on each of the first `clicks` captures, then reports no target.
    pub fn clicks_then_done(clicks: u32) -> Self {
        Self::new(move |page| {
            if page <= clicks {
                Ok(OracleDecision::Click {
                    x: 10 * page as i64,
                    y: 10 * page as i64,
                })
            } else {
                Ok(OracleDecision::NoTarget)
            }
        })
    }

    pub fn with_markup(mut self) -> Self {
        self.markup = true;
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

pub fn page_index(artifact: &Path) -> u32 {
    artifact
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("page_"))
        .and_then(|n| n.parse().ok())
        .expect("artifact named page_<n>.png")
}

#[async_trait]
impl Oracle for ScriptedOracle {
    fn requires_markup(&self) -> bool {
        self.markup
    }

    async fn ask(&self, request: &OracleRequest) -> Result<OracleDecision> {
        self.requests.lock().unwrap().push(request.clone());
        (self.decide)(page_index(&request.artifact))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Annotators
// ============================================================================

/// Writes a truncated file to the destination, then fails.
pub struct FailingAnnotator;

impl Annotator for FailingAnnotator {
    fn annotate(&self, source: &Path, _point: ClickPoint, dest: &Path) -> Result<()> {
        std::fs::write(dest, b"\x89PNG partial").unwrap();
        Err(ExplorerError::Annotation {
            path: source.to_path_buf(),
            reason: "encoder crashed".into(),
        })
    }
}
