//! Fast tier: static fetch, parse, extract, judge.

use crate::controls::HarvestControls;
use crate::document::{ContentDocument, RenderMode};
use crate::dom::StaticDom;
use crate::extract::{extract_document, ExtractionInput};
use crate::fetch::PageFetcher;
use crate::frontier::FrontierRequest;
use crate::judge::Verdict;
use crate::pipeline::persist;
use crate::router::{RouterError, WorkRouter};
use crate::stats::{PhaseCounters, RunStats};
use crate::store::DocumentStore;
use std::cell::{Cell, RefCell};
use tracing::{debug, info, warn};

/// Result of the fast phase, handed across the barrier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastOutcome {
    /// Counters after the fast phase, `rendered` untouched.
    pub stats: RunStats,
    /// Deferred URLs in the order they were deferred.
    pub fallback: Vec<String>,
}

/// Why a URL was handed to the render tier.
#[derive(Debug)]
enum DeferReason {
    Fetch(String),
    Status(u16),
    ContentType(Option<String>),
    Incomplete(Vec<String>),
}

struct FastPipeline<'a> {
    controls: &'a HarvestControls,
    router: &'a WorkRouter,
    fetcher: &'a dyn PageFetcher,
    store: &'a dyn DocumentStore,
    counters: PhaseCounters,
    fallback: RefCell<Vec<String>>,
    fallback_dropped: Cell<u64>,
}

impl FastPipeline<'_> {
    async fn handle(&self, request: FrontierRequest) {
        self.counters.record_seen();
        let url = request.url();

        match self.attempt(&request).await {
            Ok(document) => {
                self.counters.record_accepted();
                persist(self.store, self.controls.collection(), &self.counters, document).await;
            }
            Err(reason) => {
                debug!(%url, ?reason, "deferring to render tier");
                self.counters.record_deferred();
                self.defer(url);
            }
        }
    }

    async fn attempt(&self, request: &FrontierRequest) -> Result<ContentDocument, DeferReason> {
        let url = request.url();
        let page = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|err| DeferReason::Fetch(err.to_string()))?;
        if !page.is_success() {
            return Err(DeferReason::Status(page.status));
        }
        if !page.is_html() {
            return Err(DeferReason::ContentType(page.content_type.clone()));
        }

        let (markup, lossy) = page.decode_body();
        if lossy {
            debug!(%url, "body was not valid utf-8, decoded lossily");
        }
        let dom = StaticDom::parse(&markup);
        let document = extract_document(
            &dom,
            &ExtractionInput {
                source: url,
                status: page.status,
                content_type: page.content_type.clone(),
                fetched_at: page.fetched_at,
                render_mode: RenderMode::Fast,
                field_selectors: self.controls.field_selectors(),
            },
        )
        .await;

        self.follow_links(request, &document.links.internal).await;

        match self.controls.completeness().evaluate(&document) {
            Verdict::Accept => Ok(document),
            Verdict::Defer { missing } => Err(DeferReason::Incomplete(missing)),
        }
    }

    async fn follow_links(&self, request: &FrontierRequest, links: &[String]) {
        if request.depth() >= self.controls.max_depth() {
            return;
        }
        let depth = request.depth() + 1;
        for link in links {
            match self.router.enqueue(link, depth).await {
                Ok(()) => {}
                Err(err) if err.is_duplicate() => {}
                Err(RouterError::BudgetExhausted(_)) => {
                    debug!(url = %request.url(), "request budget exhausted, not following links");
                    return;
                }
                Err(err) => debug!(%link, error = %err, "link not queued"),
            }
        }
    }

    fn defer(&self, url: &str) {
        let mut fallback = self.fallback.borrow_mut();
        if fallback.len() < self.controls.fallback_capacity() {
            fallback.push(url.to_string());
        } else {
            warn!(%url, "fallback list full, url will not be rendered");
            self.fallback_dropped.set(self.fallback_dropped.get() + 1);
        }
    }
}

/// Drains every queued request through the fast tier.
///
/// Returns once the frontier is empty and no request is in flight; the
/// counters in the outcome therefore reflect every fast-path decision.
pub async fn run_fast_phase(
    controls: &HarvestControls,
    router: &WorkRouter,
    fetcher: &dyn PageFetcher,
    store: &dyn DocumentStore,
    stats: RunStats,
) -> FastOutcome {
    let pipeline = FastPipeline {
        controls,
        router,
        fetcher,
        store,
        counters: PhaseCounters::default(),
        fallback: RefCell::new(Vec::new()),
        fallback_dropped: Cell::new(0),
    };

    info!(
        pending = router.frontier().pending(),
        concurrency = controls.fast_concurrency(),
        "fast phase started"
    );
    router
        .drain(controls.fast_concurrency(), |request| {
            let pipeline = &pipeline;
            async move { pipeline.handle(request).await }
        })
        .await;

    let mut stats = pipeline.counters.fold_into(stats);
    stats.fallback_dropped += pipeline.fallback_dropped.get();
    let fallback = pipeline.fallback.into_inner();
    info!(
        seen = stats.seen,
        accepted = stats.accepted,
        deferred = stats.deferred,
        "fast phase drained"
    );
    FastOutcome { stats, fallback }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, FetchedPage};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;

    struct PagesFetcher(HashMap<&'static str, (u16, &'static str, String)>);

    #[async_trait(?Send)]
    impl PageFetcher for PagesFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            let (status, content_type, body) = self.0.get(url).ok_or_else(|| FetchError::Other {
                url: url.to_string(),
                message: "connection refused".into(),
            })?;
            Ok(FetchedPage {
                final_url: url.to_string(),
                status: *status,
                content_type: Some(content_type.to_string()),
                fetched_at: Utc::now(),
                body: body.clone().into_bytes(),
            })
        }
    }

    fn article(title: &str, links: &str) -> String {
        format!(
            "<html><head><title>{title}</title></head><body><article><p>{}</p>{links}</article></body></html>",
            "Plenty of readable words about the topic at hand. ".repeat(8)
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn accepts_complete_pages_and_defers_the_rest() {
        let fetcher = PagesFetcher(HashMap::from([
            ("https://a.test/", (200, "text/html", article("A", ""))),
            ("https://b.test/", (200, "text/html", "<html><body></body></html>".to_string())),
            ("https://c.test/", (404, "text/html", article("C", ""))),
            ("https://d.test/", (200, "application/pdf", String::new())),
        ]));
        let controls = HarvestControls::new(Vec::<String>::new());
        let router = WorkRouter::new(100, 16);
        for url in ["https://a.test/", "https://b.test/", "https://c.test/", "https://d.test/", "https://e.test/"] {
            router.enqueue(url, 0).await.unwrap();
        }
        let store = MemoryStore::new();

        let outcome = run_fast_phase(&controls, &router, &fetcher, &store, RunStats::default()).await;

        assert_eq!(outcome.stats.seen, 5);
        assert_eq!(outcome.stats.accepted, 1);
        assert_eq!(outcome.stats.deferred, 4);
        assert!(outcome.stats.check_barrier().is_ok());
        let mut deferred = outcome.fallback.clone();
        deferred.sort();
        assert_eq!(
            deferred,
            vec!["https://b.test/", "https://c.test/", "https://d.test/", "https://e.test/"]
        );

        let docs = store.documents("documents");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].url, "https://a.test/");
        assert_eq!(docs[0].render_mode, RenderMode::Fast);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn follows_internal_links_up_to_max_depth() {
        let fetcher = PagesFetcher(HashMap::from([
            ("https://a.test/", (200, "text/html", article("A", r#"<a href="/one">1</a>"#))),
            ("https://a.test/one", (200, "text/html", article("One", r#"<a href="/two">2</a>"#))),
            ("https://a.test/two", (200, "text/html", article("Two", ""))),
        ]));
        let controls = HarvestControls::new(Vec::<String>::new()).with_max_depth(1);
        let router = WorkRouter::new(100, 16);
        router.enqueue("https://a.test/", 0).await.unwrap();
        let store = MemoryStore::new();

        let outcome = run_fast_phase(&controls, &router, &fetcher, &store, RunStats::default()).await;

        assert_eq!(outcome.stats.seen, 2);
        assert_eq!(outcome.stats.accepted, 2);
        assert!(outcome.fallback.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_fallback_list_counts_drops() {
        let fetcher = PagesFetcher(HashMap::new());
        let controls = HarvestControls::new(Vec::<String>::new()).with_fallback_capacity(1);
        let router = WorkRouter::new(100, 16);
        router.enqueue("https://x.test/", 0).await.unwrap();
        router.enqueue("https://y.test/", 0).await.unwrap();
        let store = MemoryStore::new();

        let outcome = run_fast_phase(&controls, &router, &fetcher, &store, RunStats::default()).await;

        assert_eq!(outcome.stats.deferred, 2);
        assert_eq!(outcome.fallback.len(), 1);
        assert_eq!(outcome.stats.fallback_dropped, 1);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invalid_document_is_dropped_without_stalling_the_phase() {
        let fetcher = PagesFetcher(HashMap::from([
            ("ftp://x.test/", (200, "text/html", article("Mirror", ""))),
            ("https://a.test/", (200, "text/html", article("A", ""))),
        ]));
        let controls = HarvestControls::new(Vec::<String>::new());
        let router = WorkRouter::new(100, 16);
        router.enqueue("ftp://x.test/", 0).await.unwrap();
        router.enqueue("https://a.test/", 0).await.unwrap();
        let store = MemoryStore::new();

        let outcome = run_fast_phase(&controls, &router, &fetcher, &store, RunStats::default()).await;

        assert_eq!(outcome.stats.seen, 2);
        assert_eq!(outcome.stats.accepted, 2);
        assert_eq!(outcome.stats.rejected, 1);
        assert_eq!(outcome.stats.persisted, 1);
        assert!(outcome.stats.check_barrier().is_ok());
        assert!(outcome.fallback.is_empty());

        let docs = store.documents("documents");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].url, "https://a.test/");
    }
}
