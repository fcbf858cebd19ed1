use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::artifacts::annotate::Annotator;
use crate::artifacts::store::{FlowDir, UrlDir};
use crate::browser::applier::{ActionApplier, Transition, usable_selectables};
use crate::browser::session::{RenderingSession, Selectable, SessionLauncher, Surface};
use crate::error::Result;
use crate::oracle::Oracle;
use crate::trace::logger::ActionLog;
use crate::trace::trace::{FlowRecord, Termination};

use super::combinations::{Combination, enumerate_combinations};
use super::flow::{DEFAULT_MAX_CLICKS, FlowRunner};

/// How flows are derived from a page's selectables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Cartesian product of the selectables discovered once on the initial page.
    #[default]
    Fixed,
    /// Depth-first: re-discover after every applied value, so dependent
    /// selectables are picked up as they appear.
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExploreSettings {
    pub strategy: SelectionStrategy,
    /// Clicks per flow before the loop stops.
    pub max_clicks: u32,
    /// Flows run side by side, each in its own session. Fixed strategy only.
    pub flow_concurrency: usize,
    /// Cap on flows per URL; unbounded when absent.
    pub max_flows: Option<usize>,
    /// Incremental strategy: deepest selectable position that branches.
    pub max_depth: usize,
}

impl Default for ExploreSettings {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::Fixed,
            max_clicks: DEFAULT_MAX_CLICKS,
            flow_concurrency: 1,
            max_flows: None,
            max_depth: 8,
        }
    }
}

/// A prefix of selectable values waiting on the incremental worklist.
/// At most one entry, the top of the stack, holds a live session.
struct PartialCombination<S: RenderingSession> {
    depth: usize,
    prefix: Combination,
    live: Option<(S, S::Surface)>,
}

/// Drives every flow of a URL: one fresh session per combination, one
/// interaction loop per session.
pub struct Explorer<L: SessionLauncher> {
    launcher: L,
    oracle: Arc<dyn Oracle>,
    annotator: Arc<dyn Annotator>,
    applier: ActionApplier,
    settings: ExploreSettings,
}

impl<L: SessionLauncher> Explorer<L> {
    pub fn new(
        launcher: L,
        oracle: Arc<dyn Oracle>,
        annotator: Arc<dyn Annotator>,
        applier: ActionApplier,
        settings: ExploreSettings,
    ) -> Self {
        Self {
            launcher,
            oracle,
            annotator,
            applier,
            settings,
        }
    }

    fn runner(&self) -> FlowRunner<'_> {
        FlowRunner {
            applier: &self.applier,
            oracle: self.oracle.as_ref(),
            annotator: self.annotator.as_ref(),
            max_clicks: self.settings.max_clicks,
        }
    }

    /// Explore every flow of `url`, writing artifacts under `dir`.
    ///
    /// Per-flow failures end up in the returned records; only a failure to
    /// discover the page at all (or to write the summary) is an error.
    pub async fn explore(&self, url: &str, dir: &UrlDir) -> Result<Vec<FlowRecord>> {
        info!(url, strategy = ?self.settings.strategy, "exploring");

        let records = match self.settings.strategy {
            SelectionStrategy::Fixed => self.explore_fixed(url, dir).await?,
            SelectionStrategy::Incremental => self.explore_incremental(url, dir).await,
        };

        let summary = dir.write_summary(&records)?;
        let failed = records.iter().filter(|r| r.termination.is_error()).count();
        info!(
            url,
            flows = records.len(),
            failed,
            summary = %summary.display(),
            "exploration finished"
        );
        Ok(records)
    }

    // ========================================================================
    // Fixed strategy
    // ========================================================================

    async fn explore_fixed(&self, url: &str, dir: &UrlDir) -> Result<Vec<FlowRecord>> {
        let selectables = self.discover(url).await?;
        let mut combinations = enumerate_combinations(&selectables);
        info!(
            selectables = selectables.len(),
            combinations = combinations.len(),
            "enumerated combinations"
        );

        if let Some(max) = self.settings.max_flows {
            if combinations.len() > max {
                warn!(max, total = combinations.len(), "capping flows");
                combinations.truncate(max);
            }
        }

        let mut records: Vec<FlowRecord> = stream::iter(combinations.into_iter().enumerate())
            .map(|(index, combination)| self.run_fixed_flow(url, dir, index, combination))
            .buffer_unordered(self.settings.flow_concurrency.max(1))
            .collect()
            .await;
        records.sort_by_key(|r| r.flow);
        Ok(records)
    }

    /// Selectables of the freshly loaded page, from a session used only for that.
    async fn discover(&self, url: &str) -> Result<Vec<Selectable>> {
        let session = self.launcher.launch().await?;
        let discovered = async {
            let surface = session.open(url).await?;
            self.applier.settle().await;
            usable_selectables(&surface).await
        }
        .await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "could not close discovery session");
        }
        discovered
    }

    async fn run_fixed_flow(
        &self,
        url: &str,
        dir: &UrlDir,
        index: usize,
        combination: Combination,
    ) -> FlowRecord {
        info!(flow = index, %combination, "starting flow");
        let flow_dir = match dir.flow_dir(index) {
            Ok(d) => d,
            Err(e) => {
                error!(flow = index, error = %e, "no flow directory");
                return FlowRecord {
                    flow: index,
                    combination,
                    termination: Termination::Failed(e.to_string()),
                    steps: 0,
                };
            }
        };

        match self.replay(url, &combination, false).await {
            Ok((session, surface)) => {
                self.run_flow(session, surface, index, combination, &flow_dir)
                    .await
            }
            Err(e) => self.finish_flow(
                index,
                combination,
                Termination::from(&e),
                &ActionLog::new(),
                &flow_dir,
            ),
        }
    }

    // ========================================================================
    // Incremental strategy
    // ========================================================================

    /// Depth-first walk over selectable values with an explicit worklist.
    /// The first value of each selectable continues on the live session; its
    /// siblings replay their prefix on a fresh one when popped.
    async fn explore_incremental(&self, url: &str, dir: &UrlDir) -> Vec<FlowRecord> {
        let mut records = Vec::new();
        let mut stack: Vec<PartialCombination<L::Session>> = vec![PartialCombination {
            depth: 0,
            prefix: Combination::empty(),
            live: None,
        }];

        while let Some(entry) = stack.pop() {
            if self.settings.max_flows.is_some_and(|max| records.len() >= max) {
                warn!(flows = records.len(), "flow cap reached; abandoning remaining prefixes");
                close_live(entry.live).await;
                for rest in stack.drain(..) {
                    close_live(rest.live).await;
                }
                break;
            }

            let (session, surface) = match entry.live {
                Some(live) => live,
                None => match self.replay(url, &entry.prefix, true).await {
                    Ok(live) => live,
                    Err(e) => {
                        warn!(prefix = %entry.prefix, error = %e, "could not replay prefix");
                        let index = records.len();
                        records.push(match dir.flow_dir(index) {
                            Ok(flow_dir) => self.finish_flow(
                                index,
                                entry.prefix,
                                Termination::from(&e),
                                &ActionLog::new(),
                                &flow_dir,
                            ),
                            Err(io) => FlowRecord {
                                flow: index,
                                combination: entry.prefix,
                                termination: Termination::Failed(io.to_string()),
                                steps: 0,
                            },
                        });
                        continue;
                    }
                },
            };

            let selectables = match usable_selectables(&surface).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "could not list selectables; treating prefix as complete");
                    Vec::new()
                }
            };
            let branch = if entry.depth < self.settings.max_depth {
                selectables
                    .get(entry.depth)
                    .and_then(|s| s.values.first().map(|first| (s, first.clone())))
            } else {
                None
            };

            let Some((selectable, first)) = branch else {
                let index = records.len();
                debug!(flow = index, prefix = %entry.prefix, "prefix complete");
                let record = match dir.flow_dir(index) {
                    Ok(flow_dir) => {
                        info!(flow = index, combination = %entry.prefix, "starting flow");
                        self.run_flow(session, surface, index, entry.prefix, &flow_dir)
                            .await
                    }
                    Err(e) => {
                        close_session(session).await;
                        FlowRecord {
                            flow: index,
                            combination: entry.prefix,
                            termination: Termination::Failed(e.to_string()),
                            steps: 0,
                        }
                    }
                };
                records.push(record);
                continue;
            };

            // siblings go underneath so the first value's subtree is finished first
            for value in selectable.values.iter().skip(1).rev() {
                stack.push(PartialCombination {
                    depth: entry.depth + 1,
                    prefix: entry.prefix.with(value),
                    live: None,
                });
            }

            let (surface, _) = self.apply_value(&session, surface, selectable, &first).await;
            stack.push(PartialCombination {
                depth: entry.depth + 1,
                prefix: entry.prefix.with(&first),
                live: Some((session, surface)),
            });
        }

        records
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    /// Open `url` in a fresh session and apply `combination` position by
    /// position. Selectables are re-discovered after any transition, or after
    /// every value when `rediscover_each` is set.
    async fn replay(
        &self,
        url: &str,
        combination: &Combination,
        rediscover_each: bool,
    ) -> Result<(L::Session, <L::Session as RenderingSession>::Surface)> {
        let session = self.launcher.launch().await?;
        let surface = match session.open(url).await {
            Ok(s) => s,
            Err(e) => {
                close_session(session).await;
                return Err(e);
            }
        };
        self.applier.settle().await;

        let mut surface = surface;
        let mut selectables = match usable_selectables(&surface).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "could not list selectables");
                Vec::new()
            }
        };

        for (position, value) in combination.values().iter().enumerate() {
            let Some(selectable) = selectables.get(position).cloned() else {
                debug!(position, "selectable no longer present; skipping rest of combination");
                break;
            };
            let (next, changed) = self.apply_value(&session, surface, &selectable, value).await;
            surface = next;

            if changed || rediscover_each {
                selectables = match usable_selectables(&surface).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "could not re-discover selectables");
                        Vec::new()
                    }
                };
            }
        }

        Ok((session, surface))
    }

    /// Select one value and race for the transition it may cause. Returns the
    /// active surface and whether a transition happened.
    async fn apply_value<S: RenderingSession>(
        &self,
        session: &S,
        surface: S::Surface,
        selectable: &Selectable,
        value: &str,
    ) -> (S::Surface, bool) {
        if !selectable.offers(value) {
            debug!(handle = selectable.handle, value, "value not offered; skipping");
            return (surface, false);
        }
        if let Err(e) = surface.select(selectable, value).await {
            warn!(handle = selectable.handle, value, error = %e, "value not applied");
            return (surface, false);
        }
        debug!(handle = selectable.handle, value, "applied value");

        let transition = self.applier.detect_transition(session, &surface).await;
        let changed = transition.changed();
        let surface = match transition {
            Transition::Opened(next) => next,
            _ => surface,
        };
        if changed {
            self.applier.settle().await;
        }
        (surface, changed)
    }

    /// Run the interaction loop on a prepared session, then close it and
    /// persist the log.
    async fn run_flow(
        &self,
        session: L::Session,
        surface: <L::Session as RenderingSession>::Surface,
        index: usize,
        combination: Combination,
        flow_dir: &FlowDir,
    ) -> FlowRecord {
        let outcome = self
            .runner()
            .run(&session, surface, combination.len(), flow_dir)
            .await;
        close_session(session).await;
        self.finish_flow(index, combination, outcome.termination, &outcome.log, flow_dir)
    }

    fn finish_flow(
        &self,
        index: usize,
        combination: Combination,
        termination: Termination,
        log: &ActionLog,
        flow_dir: &FlowDir,
    ) -> FlowRecord {
        match flow_dir.write_action_log(log) {
            Ok(path) => debug!(flow = index, path = %path.display(), "action log written"),
            Err(e) => error!(flow = index, error = %e, "could not write action log"),
        }

        if termination.is_error() {
            warn!(flow = index, steps = log.len(), %termination, "flow ended");
        } else {
            info!(flow = index, steps = log.len(), %termination, "flow ended");
        }

        FlowRecord {
            flow: index,
            combination,
            termination,
            steps: log.len(),
        }
    }
}

async fn close_session<S: RenderingSession>(session: S) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "could not close session");
    }
}

async fn close_live<S: RenderingSession>(live: Option<(S, S::Surface)>) {
    if let Some((session, surface)) = live {
        drop(surface);
        close_session(session).await;
    }
}
