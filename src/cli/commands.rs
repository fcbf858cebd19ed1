use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use crate::artifacts::annotate::{Annotator, MarkerAnnotator};
use crate::artifacts::store::ArtifactStore;
use crate::browser::applier::ActionApplier;
use crate::browser::chrome::ChromeLauncher;
use crate::browser::session::SessionLauncher;
use crate::cli::config::AppConfig;
use crate::cli::url_list::load_url_list;
use crate::error::ErrorKind;
use crate::explorer::explorer::Explorer;
use crate::oracle;
use crate::trace::trace::FlowRecord;

/// Per-URL results of a crawl.
#[derive(Debug, Default)]
pub struct CrawlSummary {
    pub explored: Vec<(String, Vec<FlowRecord>)>,
    pub failed: Vec<(String, String)>,
}

impl CrawlSummary {
    /// True when there was work to do and none of it succeeded.
    pub fn all_failed(&self) -> bool {
        self.explored.is_empty() && !self.failed.is_empty()
    }

    pub fn flow_count(&self) -> usize {
        self.explored.iter().map(|(_, records)| records.len()).sum()
    }
}

// ============================================================================
// crawl subcommand
// ============================================================================

pub async fn cmd_crawl(urls_file: &Path, config: &AppConfig) -> anyhow::Result<CrawlSummary> {
    let urls = load_url_list(urls_file)
        .with_context(|| format!("loading URL list {}", urls_file.display()))?;
    info!(count = urls.len(), file = %urls_file.display(), "loaded URL list");

    let launcher = ChromeLauncher::new(config.browser.clone());
    let summary = crawl(&urls, config, &launcher, Arc::new(MarkerAnnotator::default())).await;
    report(&summary, &config.output.dir);
    Ok(summary)
}

// ============================================================================
// explore subcommand
// ============================================================================

pub async fn cmd_explore(url: &str, config: &AppConfig) -> anyhow::Result<CrawlSummary> {
    let Some(url) = crate::cli::url_list::normalize_url(url) else {
        anyhow::bail!("not a usable URL: {:?}", url);
    };

    let launcher = ChromeLauncher::new(config.browser.clone());
    let summary = crawl(&[url], config, &launcher, Arc::new(MarkerAnnotator::default())).await;
    report(&summary, &config.output.dir);
    Ok(summary)
}

// ============================================================================
// Per-URL loop
// ============================================================================

/// Explore each URL in turn with a fresh oracle connection. A failing URL is
/// recorded and skipped; the loop always runs to the end.
pub async fn crawl<L>(
    urls: &[String],
    config: &AppConfig,
    launcher: &L,
    annotator: Arc<dyn Annotator>,
) -> CrawlSummary
where
    L: SessionLauncher + Clone,
{
    let store = ArtifactStore::new(config.output.dir.clone());
    let mut summary = CrawlSummary::default();
    info!(urls = urls.len(), output = %store.root().display(), "crawling");

    for url in urls {
        info!(url = %url, "processing URL");
        match explore_url(url, config, &store, launcher.clone(), annotator.clone()).await {
            Ok(records) => summary.explored.push((url.clone(), records)),
            Err(e) => {
                error!(url = %url, error = %e, "URL failed");
                summary.failed.push((url.clone(), e.to_string()));
            }
        }
    }
    summary
}

async fn explore_url<L: SessionLauncher>(
    url: &str,
    config: &AppConfig,
    store: &ArtifactStore,
    launcher: L,
    annotator: Arc<dyn Annotator>,
) -> crate::error::Result<Vec<FlowRecord>> {
    let oracle = oracle::connect(&config.oracle).await.map_err(|e| {
        if e.kind() == ErrorKind::Connection {
            warn!(url, "oracle unreachable; skipping URL");
        }
        e
    })?;

    let dir = store.url_dir(url)?;
    let explorer = Explorer::new(
        launcher,
        oracle.clone(),
        annotator,
        ActionApplier::new(config.interaction.clone()),
        config.explore.clone(),
    );
    let result = explorer.explore(url, &dir).await;

    if let Err(e) = oracle.close().await {
        warn!(url, error = %e, "could not close oracle connection");
    }
    result
}

fn report(summary: &CrawlSummary, output_dir: &Path) {
    info!(
        urls = summary.explored.len() + summary.failed.len(),
        failed = summary.failed.len(),
        flows = summary.flow_count(),
        output = %output_dir.display(),
        "crawl finished"
    );
    for (url, reason) in &summary.failed {
        warn!(url = %url, reason = %reason, "not explored");
    }
}
