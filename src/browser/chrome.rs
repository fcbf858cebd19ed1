use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::EventLoadEventFired;
use chromiumoxide::cdp::browser_protocol::target::{EventTargetCreated, TargetId};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::layout::Point;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::browser::session::{RenderingSession, Selectable, SessionLauncher, Surface, TextInput};
use crate::error::{ExplorerError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: Option<String>,
    pub executable: Option<PathBuf>,
    pub load_timeout_ms: u64,
    pub sandbox: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 800,
            user_agent: None,
            executable: None,
            load_timeout_ms: 60_000,
            sandbox: false,
        }
    }
}

impl BrowserSettings {
    /// Emulated page size. Follows the window so screenshots and oracle click
    /// coordinates share one coordinate space.
    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.window_width,
            height: self.window_height,
            ..Viewport::default()
        }
    }
}

// ============================================================================
// Page scripts
// ============================================================================

const SELECTABLES_JS: &str = r#"
Array.from(document.querySelectorAll('select'))
  .map((s, i) => {
    const style = window.getComputedStyle(s);
    return {
      handle: i,
      name: s.name || s.id || null,
      values: Array.from(s.options).map(o => o.value),
      selected: Math.max(s.selectedIndex, 0),
      usable: !!style && style.visibility !== 'hidden' && style.display !== 'none' && !s.disabled,
    };
  })
  .filter(s => s.usable && s.values.length > 0)
"#;

const TEXT_INPUTS_JS: &str = r#"
Array.from(document.querySelectorAll('input')).map((el, i) => {
  const style = window.getComputedStyle(el);
  return {
    handle: i,
    type: (el.getAttribute('type') || 'text').toLowerCase(),
    visible: !!style && style.visibility !== 'hidden' && style.display !== 'none',
    disabled: el.disabled,
    readOnly: el.readOnly,
  };
})
"#;

fn element_at_js(x: i64, y: i64) -> String {
    format!(
        "(() => {{ const el = document.elementFromPoint({}, {}); return el ? el.outerHTML : ''; }})()",
        x, y
    )
}

fn select_js(handle: usize, value: &str) -> Result<String> {
    let literal = serde_json::to_string(value).map_err(|e| ExplorerError::Json {
        context: "select value".into(),
        source: e,
    })?;
    Ok(format!(
        r#"(() => {{
  const s = document.querySelectorAll('select')[{handle}];
  if (!s) return false;
  s.scrollIntoView();
  const idx = Array.from(s.options).findIndex(o => o.value === {literal});
  if (idx < 0) return false;
  s.selectedIndex = idx;
  s.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}})()"#
    ))
}

// ============================================================================
// Launcher / session
// ============================================================================

/// Launches one Chromium process per session.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let s = &self.settings;
        let mut builder = BrowserConfig::builder()
            .window_size(s.window_width, s.window_height)
            .viewport(s.viewport())
            .request_timeout(Duration::from_millis(s.load_timeout_ms))
            .arg("--disable-gpu");
        if !s.headless {
            builder = builder.with_head();
        }
        if !s.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(exe) = &s.executable {
            builder = builder.chrome_executable(exe);
        }
        builder.build().map_err(|e| ExplorerError::browser("browser config", e))
    }
}

/// New pages keyed by the target that opened them.
struct OpenedTargets {
    by_opener: Mutex<HashMap<TargetId, VecDeque<TargetId>>>,
    changed: watch::Sender<u64>,
}

impl OpenedTargets {
    fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            by_opener: Mutex::new(HashMap::new()),
            changed,
        }
    }

    async fn push(&self, opener: TargetId, target: TargetId) {
        self.by_opener.lock().await.entry(opener).or_default().push_back(target);
        self.changed.send_modify(|n| *n += 1);
    }

    async fn take(&self, opener: &TargetId) -> Option<TargetId> {
        self.by_opener.lock().await.get_mut(opener).and_then(VecDeque::pop_front)
    }

    async fn forget(&self, opener: &TargetId) {
        self.by_opener.lock().await.remove(opener);
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    type Session = ChromeSession;

    async fn launch(&self) -> Result<ChromeSession> {
        let (browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(|e| ExplorerError::browser("launch", e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });

        let mut created = browser
            .event_listener::<EventTargetCreated>()
            .await
            .map_err(|e| ExplorerError::browser("target listener", e))?;
        let opened = Arc::new(OpenedTargets::new());
        let sink = opened.clone();
        let target_task = tokio::spawn(async move {
            while let Some(event) = created.next().await {
                let info = &event.target_info;
                if info.r#type != "page" {
                    continue;
                }
                if let Some(opener) = info.opener_id.clone() {
                    debug!(target = ?info.target_id, ?opener, "page opened by another page");
                    sink.push(opener, info.target_id.clone()).await;
                }
            }
        });

        info!(headless = self.settings.headless, "launched chromium session");
        Ok(ChromeSession {
            browser: Mutex::new(browser),
            settings: self.settings.clone(),
            opened,
            tasks: vec![handler_task, target_task],
        })
    }
}

pub struct ChromeSession {
    browser: Mutex<Browser>,
    settings: BrowserSettings,
    opened: Arc<OpenedTargets>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromeSession {
    async fn attach(&self, page: Page) -> Result<ChromeSurface> {
        if let Some(agent) = &self.settings.user_agent {
            page.set_user_agent(SetUserAgentOverrideParams::new(agent.clone()))
                .await
                .map_err(|e| ExplorerError::browser("set user agent", e))?;
        }
        ChromeSurface::attach(page, self.opened.clone()).await
    }
}

#[async_trait]
impl RenderingSession for ChromeSession {
    type Surface = ChromeSurface;

    async fn open(&self, url: &str) -> Result<ChromeSurface> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| ExplorerError::browser("new page", e))?;
        let surface = self.attach(page).await?;

        let load_timeout = Duration::from_millis(self.settings.load_timeout_ms);
        timeout(load_timeout, async {
            surface.page.goto(url).await?;
            surface.page.wait_for_navigation().await.map(|_| ())
        })
        .await
        .map_err(|_| ExplorerError::browser(format!("loading {}", url), "timed out"))?
        .map_err(|e| ExplorerError::browser(format!("loading {}", url), e))?;

        surface.arm().await;
        info!(url, "opened page");
        Ok(surface)
    }

    async fn wait_for_opened(&self, opener: &ChromeSurface) -> Result<ChromeSurface> {
        let opener_id = opener.page.target_id().clone();
        let mut changes = self.opened.changed.subscribe();
        let target = loop {
            if let Some(id) = self.opened.take(&opener_id).await {
                break id;
            }
            changes
                .changed()
                .await
                .map_err(|e| ExplorerError::browser("target listener", e))?;
        };

        // the target event can arrive before the page is attached
        loop {
            let pages = self
                .browser
                .lock()
                .await
                .pages()
                .await
                .map_err(|e| ExplorerError::browser("list pages", e))?;
            if let Some(page) = pages.into_iter().find(|p| p.target_id() == &target) {
                return self.attach(page).await;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn close(self) -> Result<()> {
        let mut browser = self.browser.into_inner();
        let closed = browser.close().await.map(|_| ());
        let _ = browser.wait().await;
        for task in &self.tasks {
            task.abort();
        }
        closed.map_err(|e| ExplorerError::browser("close", e))
    }
}

// ============================================================================
// Surface
// ============================================================================

pub struct ChromeSurface {
    page: Page,
    /// Count of completed main-frame loads; the receiver tracks what was seen.
    loads: Mutex<watch::Receiver<u64>>,
    load_task: JoinHandle<()>,
    opened: Arc<OpenedTargets>,
}

impl ChromeSurface {
    async fn attach(page: Page, opened: Arc<OpenedTargets>) -> Result<Self> {
        let mut events = page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(|e| ExplorerError::browser("load listener", e))?;
        let (tx, rx) = watch::channel(0u64);
        let load_task = tokio::spawn(async move {
            while events.next().await.is_some() {
                tx.send_modify(|n| *n += 1);
            }
        });

        Ok(Self {
            page,
            loads: Mutex::new(rx),
            load_task,
            opened,
        })
    }

    /// Forget earlier loads and openings so the next transition race only sees
    /// effects of the upcoming action.
    async fn arm(&self) {
        self.loads.lock().await.borrow_and_update();
        self.opened.forget(self.page.target_id()).await;
    }
}

impl Drop for ChromeSurface {
    fn drop(&mut self) {
        self.load_task.abort();
    }
}

#[async_trait]
impl Surface for ChromeSurface {
    async fn url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| ExplorerError::browser("url", e))?;
        Ok(url.unwrap_or_default())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.page
            .save_screenshot(ScreenshotParams::builder().build(), path)
            .await
            .map_err(|e| ExplorerError::browser("screenshot", e))?;
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| ExplorerError::browser("content", e))
    }

    async fn element_at(&self, x: i64, y: i64) -> Result<Option<String>> {
        let html: String = self
            .page
            .evaluate(element_at_js(x, y))
            .await
            .map_err(|e| ExplorerError::browser("elementFromPoint", e))?
            .into_value()
            .map_err(|e| ExplorerError::browser("elementFromPoint", e))?;
        Ok(Some(html).filter(|h| !h.is_empty()))
    }

    async fn move_pointer(&self, x: f64, y: f64) -> Result<()> {
        self.page
            .move_mouse(Point::new(x, y))
            .await
            .map_err(|e| ExplorerError::browser("move pointer", e))?;
        Ok(())
    }

    async fn click(&self, x: f64, y: f64) -> Result<()> {
        self.arm().await;
        self.page
            .click(Point::new(x, y))
            .await
            .map_err(|e| ExplorerError::browser("click", e))?;
        Ok(())
    }

    async fn selectables(&self) -> Result<Vec<Selectable>> {
        self.page
            .evaluate(SELECTABLES_JS)
            .await
            .map_err(|e| ExplorerError::browser("discover selectables", e))?
            .into_value()
            .map_err(|e| ExplorerError::browser("discover selectables", e))
    }

    async fn select(&self, selectable: &Selectable, value: &str) -> Result<()> {
        self.arm().await;
        let applied: bool = self
            .page
            .evaluate(select_js(selectable.handle, value)?)
            .await
            .map_err(|e| ExplorerError::interaction("select", e))?
            .into_value()
            .map_err(|e| ExplorerError::interaction("select", e))?;
        if applied {
            Ok(())
        } else {
            Err(ExplorerError::interaction(
                "select",
                format!("select #{} does not offer {:?}", selectable.handle, value),
            ))
        }
    }

    async fn text_inputs(&self) -> Result<Vec<TextInput>> {
        self.page
            .evaluate(TEXT_INPUTS_JS)
            .await
            .map_err(|e| ExplorerError::browser("discover inputs", e))?
            .into_value()
            .map_err(|e| ExplorerError::browser("discover inputs", e))
    }

    async fn type_text(&self, input: &TextInput, text: &str) -> Result<()> {
        let inputs = self
            .page
            .find_elements("input")
            .await
            .map_err(|e| ExplorerError::interaction("fill input", e))?;
        let element = inputs.get(input.handle).ok_or_else(|| {
            ExplorerError::interaction("fill input", format!("input #{} is gone", input.handle))
        })?;
        element
            .scroll_into_view()
            .await
            .map_err(|e| ExplorerError::interaction("fill input", e))?;
        element
            .focus()
            .await
            .map_err(|e| ExplorerError::interaction("fill input", e))?;
        element
            .type_str(text)
            .await
            .map_err(|e| ExplorerError::interaction("fill input", e))?;
        Ok(())
    }

    async fn wait_for_navigation(&self) -> Result<()> {
        self.loads
            .lock()
            .await
            .changed()
            .await
            .map_err(|e| ExplorerError::browser("load listener", e))
    }

    async fn bring_to_front(&self) -> Result<()> {
        self.page
            .bring_to_front()
            .await
            .map_err(|e| ExplorerError::browser("bring to front", e))?;
        Ok(())
    }
}
