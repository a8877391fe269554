//! Application runner: seeds, fast phase, barrier, render phase, report.

use crate::controls::{ConfigError, HarvestControls};
use crate::fetch::{HttpFetcher, PageFetcher};
use crate::pipeline::fast::run_fast_phase;
use crate::pipeline::render::run_render_phase;
use crate::render::{ChromeRenderer, PageRenderer, RenderError};
use crate::router::{RouterError, WorkRouter};
use crate::stats::RunStats;
use crate::store::{DocumentStore, JsonlStore};
use crate::Cli;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Builder;
use tracing::{debug, error, info, warn};

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that stop a run.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Configuration was rejected before any work started.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The browser could not be started for the render phase.
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Collection documents were written to.
    pub collection: String,
    /// Counters after both phases, with `rendered_rate` computed.
    pub stats: RunStats,
    /// Counters as they stood at the barrier.
    pub fast_phase: RunStats,
    /// Whether `accepted + deferred == seen` held at the barrier.
    pub barrier_ok: bool,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Prints the summary block.
    pub fn print(&self) {
        self.stats.report(Duration::from_millis(self.elapsed_ms));
        println!("collection: {}", self.collection);
        if !self.barrier_ok {
            println!("barrier check: FAILED");
        }
    }
}

/// Runs both phases against the given collaborators.
///
/// The render phase never starts before every fast-path request has been
/// decided; deferred URLs are re-queued under `render:<url>` keys only after
/// the fast phase has drained.
pub async fn harvest(
    controls: &HarvestControls,
    fetcher: &dyn PageFetcher,
    renderer: &dyn PageRenderer,
    store: &dyn DocumentStore,
) -> Result<RunReport, HarvestError> {
    controls.validate()?;
    let started = Instant::now();
    let router = WorkRouter::new(controls.max_requests(), controls.max_requests());

    for seed in controls.seeds() {
        match router.enqueue(seed, 0).await {
            Ok(()) => {}
            Err(err) if err.is_duplicate() => debug!(%seed, "duplicate seed skipped"),
            Err(RouterError::BudgetExhausted(_)) => {
                warn!(
                    max_requests = controls.max_requests(),
                    "request budget smaller than seed list, remaining seeds skipped"
                );
                break;
            }
            Err(err) => warn!(%seed, error = %err, "seed not queued"),
        }
    }

    let fast = run_fast_phase(controls, &router, fetcher, store, RunStats::default()).await;
    let fast_phase = fast.stats;
    let barrier_ok = match fast_phase.check_barrier() {
        Ok(()) => true,
        Err(err) => {
            error!(error = %err, "fast phase counters inconsistent");
            false
        }
    };

    let mut stats = fast_phase;
    if !fast.fallback.is_empty() {
        router.reopen();
        for url in &fast.fallback {
            if let Err(err) = router.enqueue_fallback(url).await {
                warn!(%url, error = %err, "deferred url not queued for rendering");
                stats.fallback_dropped += 1;
            }
        }
        if router.frontier().pending() > 0 {
            renderer.launch().await?;
            stats = run_render_phase(controls, &router, renderer, store, stats).await;
        } else {
            info!("no deferred url could be queued, browser not started");
        }
    }

    let stats = stats.finalize();
    info!(
        accepted = stats.accepted,
        rendered = stats.rendered,
        rendered_rate = stats.rendered_rate,
        "harvest finished"
    );
    Ok(RunReport {
        collection: controls.collection().to_string(),
        stats,
        fast_phase,
        barrier_ok,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}

/// Runs a harvest from CLI arguments on a current-thread runtime.
pub fn run(cli: Cli) -> Result<RunReport, DynError> {
    let controls = cli.build_controls()?;
    controls.validate()?;
    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        let fetcher = HttpFetcher::new(controls.fetch_timeout())?;
        let store = JsonlStore::open(cli.out_dir.clone()).await?;
        let renderer = ChromeRenderer::new(cli.render_settings());
        info!(
            seeds = controls.seeds().len(),
            out = %store.collection_path(controls.collection()).display(),
            "harvest starting"
        );

        let report = harvest(&controls, &fetcher, &renderer, &store).await;
        renderer.shutdown().await;
        Ok::<_, DynError>(report?)
    })
}
