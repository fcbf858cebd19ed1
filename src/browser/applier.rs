use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::browser::session::{RenderingSession, Selectable, Surface};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionSettings {
    /// Typed into every fillable free-text input before each oracle round.
    pub filler_text: String,
    pub field_timeout_ms: u64,
    pub select_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    /// Max distance of the approach point from the click target, per axis.
    pub pointer_offset: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Pause after the page loads and after each pre-condition pass.
    pub settle_delay_ms: u64,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            filler_text: "aa".into(),
            field_timeout_ms: 3_000,
            select_timeout_ms: 3_000,
            navigation_timeout_ms: 5_000,
            pointer_offset: 5,
            min_delay_ms: 500,
            max_delay_ms: 1_500,
            settle_delay_ms: 1_000,
        }
    }
}

impl InteractionSettings {
    /// No waiting anywhere; for driving in-process fakes.
    pub fn immediate() -> Self {
        Self {
            navigation_timeout_ms: 50,
            min_delay_ms: 0,
            max_delay_ms: 0,
            settle_delay_ms: 0,
            ..Self::default()
        }
    }
}

/// Outcome of racing navigation against new-surface creation.
pub enum Transition<S> {
    /// The current surface finished a navigation.
    Navigated,
    /// A new surface opened by the current one won; it is now active.
    Opened(S),
    /// Neither happened before the deadline.
    Unchanged,
}

impl<S> Transition<S> {
    pub fn changed(&self) -> bool {
        !matches!(self, Transition::Unchanged)
    }
}

/// Applies oracle decisions and pre-conditions to a rendering surface.
#[derive(Debug, Clone, Default)]
pub struct ActionApplier {
    settings: InteractionSettings,
}

impl ActionApplier {
    pub fn new(settings: InteractionSettings) -> Self {
        Self { settings }
    }

    async fn human_delay(&self) {
        let (min, max) = (self.settings.min_delay_ms, self.settings.max_delay_ms);
        let ms = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }

    pub async fn settle(&self) {
        if self.settings.settle_delay_ms > 0 {
            sleep(Duration::from_millis(self.settings.settle_delay_ms)).await;
        }
    }

    // ------------------------------------------------------------------------
    // Pre-conditions
    // ------------------------------------------------------------------------

    /// Run before every oracle round so required-field validation and unset
    /// dropdowns do not hide click targets.
    ///
    /// Selectables at positions below `fixed` belong to the active combination
    /// and are left alone.
    pub async fn prepare<F: Surface>(&self, surface: &F, fixed: usize) {
        if let Err(e) = self.select_unfixed(surface, fixed).await {
            warn!(error = %e, "could not pre-select dropdowns");
        }
        if let Err(e) = self.fill_inputs(surface).await {
            warn!(error = %e, "could not pre-fill inputs");
        }
        self.settle().await;
    }

    /// Pick the preferred candidate of every selectable not fixed by the combination.
    /// Returns how many were changed.
    pub async fn select_unfixed<F: Surface>(&self, surface: &F, fixed: usize) -> Result<usize> {
        let limit = Duration::from_millis(self.settings.select_timeout_ms);
        let mut changed = 0;

        for selectable in usable_selectables(surface).await?.iter().skip(fixed) {
            let Some(value) = selectable.preferred_value() else {
                continue;
            };
            if selectable.selected_value() == Some(value) {
                continue;
            }
            match timeout(limit, surface.select(selectable, value)).await {
                Ok(Ok(())) => {
                    debug!(handle = selectable.handle, value, "pre-selected dropdown value");
                    changed += 1;
                }
                Ok(Err(e)) => debug!(handle = selectable.handle, error = %e, "skipping dropdown"),
                Err(_) => debug!(handle = selectable.handle, "skipping dropdown after timeout"),
            }
        }
        Ok(changed)
    }

    /// Type filler text into every visible, enabled, writable free-text input.
    /// Returns how many were filled.
    pub async fn fill_inputs<F: Surface>(&self, surface: &F) -> Result<usize> {
        let limit = Duration::from_millis(self.settings.field_timeout_ms);
        let mut filled = 0;

        for input in surface.text_inputs().await? {
            if !input.is_fillable() {
                continue;
            }
            match timeout(limit, surface.type_text(&input, &self.settings.filler_text)).await {
                Ok(Ok(())) => filled += 1,
                Ok(Err(e)) => debug!(handle = input.handle, error = %e, "skipping input"),
                Err(_) => debug!(handle = input.handle, "skipping input after timeout"),
            }
        }
        Ok(filled)
    }

    // ------------------------------------------------------------------------
    // Click
    // ------------------------------------------------------------------------

    pub async fn resolve_element_at<F: Surface>(&self, surface: &F, x: i64, y: i64) -> Result<Option<String>> {
        surface.element_at(x, y).await
    }

    /// Approach the target from a small random offset, pause, then click exactly on it.
    pub async fn apply_click<F: Surface>(&self, surface: &F, x: i64, y: i64) -> Result<()> {
        let offset = self.settings.pointer_offset as i64;
        let (dx, dy) = if offset > 0 {
            let mut rng = rand::thread_rng();
            (rng.gen_range(-offset..=offset), rng.gen_range(-offset..=offset))
        } else {
            (0, 0)
        };

        surface.move_pointer((x + dx) as f64, (y + dy) as f64).await?;
        self.human_delay().await;
        info!(x, y, "clicking");
        surface.click(x as f64, y as f64).await
    }

    // ------------------------------------------------------------------------
    // Transition race
    // ------------------------------------------------------------------------

    pub async fn detect_transition<S: RenderingSession>(
        &self,
        session: &S,
        surface: &S::Surface,
    ) -> Transition<S::Surface> {
        let limit = Duration::from_millis(self.settings.navigation_timeout_ms);
        detect_transition(session, surface, limit).await
    }
}

/// Selectables of the active document that have at least one candidate value.
/// Combination positions index into this list.
pub async fn usable_selectables<F: Surface>(surface: &F) -> Result<Vec<Selectable>> {
    let mut selectables = surface.selectables().await?;
    selectables.retain(|s| {
        if s.values.is_empty() {
            debug!(handle = s.handle, "ignoring selectable without values");
            return false;
        }
        true
    });
    Ok(selectables)
}

/// Race a navigation on `surface` against a new surface opened by it, under one
/// deadline. A branch that fails drops out; the other keeps running until the
/// deadline. Both futures are dropped when this returns.
pub async fn detect_transition<S: RenderingSession>(
    session: &S,
    surface: &S::Surface,
    limit: Duration,
) -> Transition<S::Surface> {
    let navigation = surface.wait_for_navigation();
    let opened = session.wait_for_opened(surface);
    let deadline = sleep(limit);
    tokio::pin!(navigation, opened, deadline);

    let (mut navigation_live, mut opened_live) = (true, true);
    loop {
        tokio::select! {
            result = &mut navigation, if navigation_live => match result {
                Ok(()) => {
                    debug!("navigation completed");
                    return Transition::Navigated;
                }
                Err(e) => {
                    debug!(error = %e, "navigation watch failed");
                    navigation_live = false;
                }
            },
            result = &mut opened, if opened_live => match result {
                Ok(new_surface) => {
                    if let Err(e) = new_surface.bring_to_front().await {
                        warn!(error = %e, "could not bring new surface to front");
                    }
                    info!("switched to newly opened surface");
                    return Transition::Opened(new_surface);
                }
                Err(e) => {
                    debug!(error = %e, "new-surface watch failed");
                    opened_live = false;
                }
            },
            _ = &mut deadline => {
                debug!(?limit, "no transition before deadline");
                return Transition::Unchanged;
            }
        }
    }
}

