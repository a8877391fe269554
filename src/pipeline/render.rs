//! Render tier: politeness delay, navigation, consent, settle, extract, persist.

use crate::controls::HarvestControls;
use crate::document::{ContentDocument, RenderMode};
use crate::dom::{DomAccess, StaticDom};
use crate::extract::{extract_document, ExtractionInput};
use crate::frontier::{FrontierRequest, RequestMarker};
use crate::pipeline::persist;
use crate::render::PageRenderer;
use crate::router::WorkRouter;
use crate::stats::{PhaseCounters, RunStats};
use crate::store::DocumentStore;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

struct RenderPipeline<'a> {
    controls: &'a HarvestControls,
    renderer: &'a dyn PageRenderer,
    store: &'a dyn DocumentStore,
    counters: PhaseCounters,
}

impl RenderPipeline<'_> {
    async fn handle(&self, request: FrontierRequest) {
        if request.marker() != Some(RequestMarker::NeedsRender) {
            debug!(url = %request.url(), "render request without marker");
        }
        sleep(self.politeness_delay()).await;
        self.counters.record_rendered();

        let document = self.render(request.url()).await;
        persist(self.store, self.controls.collection(), &self.counters, document).await;
    }

    fn politeness_delay(&self) -> Duration {
        let millis = rand::thread_rng().gen_range(self.controls.politeness_ms());
        Duration::from_millis(millis)
    }

    async fn render(&self, url: &str) -> ContentDocument {
        let page = match self.renderer.open(url).await {
            Ok(page) => page,
            Err(err) => {
                warn!(%url, error = %err, "render failed, persisting partial record");
                let empty = StaticDom::parse("");
                return self.extract(&empty, url, 0, None).await;
            }
        };

        match page.dismiss_consent(self.controls.consent_timeout()).await {
            Ok(true) => debug!(%url, "consent overlay dismissed"),
            Ok(false) => {}
            Err(err) => debug!(%url, error = %err, "consent handling failed"),
        }
        if !page.wait_settled(self.controls.load_settle_timeout()).await {
            debug!(%url, "page did not settle in time, extracting anyway");
        }

        let document = self
            .extract(page.dom(), url, page.status(), page.content_type())
            .await;
        page.close().await;
        document
    }

    async fn extract(
        &self,
        dom: &dyn DomAccess,
        url: &str,
        status: u16,
        content_type: Option<String>,
    ) -> ContentDocument {
        extract_document(
            dom,
            &ExtractionInput {
                source: url,
                status,
                content_type,
                fetched_at: Utc::now(),
                render_mode: RenderMode::Rendered,
                field_selectors: self.controls.field_selectors(),
            },
        )
        .await
    }
}

/// Drains the re-queued fallback requests through the browser.
///
/// Every request yields a document regardless of completeness; a page that
/// cannot be opened still produces a partial record.
pub async fn run_render_phase(
    controls: &HarvestControls,
    router: &WorkRouter,
    renderer: &dyn PageRenderer,
    store: &dyn DocumentStore,
    stats: RunStats,
) -> RunStats {
    let pipeline = RenderPipeline {
        controls,
        renderer,
        store,
        counters: PhaseCounters::default(),
    };

    info!(
        pending = router.frontier().pending(),
        concurrency = controls.render_concurrency(),
        "render phase started"
    );
    router
        .drain(controls.render_concurrency(), |request| {
            let pipeline = &pipeline;
            async move { pipeline.handle(request).await }
        })
        .await;

    let stats = pipeline.counters.fold_into(stats);
    info!(rendered = stats.rendered, "render phase drained");
    stats
}
