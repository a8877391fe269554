use async_trait::async_trait;
use chrono::Utc;
use fastharvest::{
    extract_document, harvest, CompletenessSpec, ConfigError, DomAccess, ExtractionInput,
    FetchError, FetchedPage, FieldSelector, HarvestControls, HarvestError, MemoryStore,
    PageFetcher, PageRenderer, RenderError, RenderMode, RenderedPage, StaticDom,
};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

type EventLog = Rc<RefCell<Vec<String>>>;

struct ScriptedFetcher {
    pages: HashMap<String, String>,
    log: EventLog,
}

#[async_trait(?Send)]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        tokio::task::yield_now().await;
        self.log.borrow_mut().push(format!("fetch {url}"));
        let body = self.pages.get(url).ok_or_else(|| FetchError::Other {
            url: url.to_string(),
            message: "not scripted".into(),
        })?;
        Ok(FetchedPage {
            final_url: url.to_string(),
            status: 200,
            content_type: Some("text/html; charset=utf-8".into()),
            fetched_at: Utc::now(),
            body: body.clone().into_bytes(),
        })
    }
}

struct ScriptedPage(StaticDom);

#[async_trait(?Send)]
impl RenderedPage for ScriptedPage {
    fn dom(&self) -> &dyn DomAccess {
        &self.0
    }

    fn status(&self) -> u16 {
        200
    }

    fn content_type(&self) -> Option<String> {
        Some("text/html".into())
    }

    async fn dismiss_consent(&self, _deadline: Duration) -> Result<bool, RenderError> {
        Ok(false)
    }

    async fn wait_settled(&self, _deadline: Duration) -> bool {
        true
    }

    async fn close(&self) {}
}

struct ScriptedRenderer {
    pages: HashMap<String, String>,
    log: EventLog,
}

#[async_trait(?Send)]
impl PageRenderer for ScriptedRenderer {
    async fn open(&self, url: &str) -> Result<Box<dyn RenderedPage>, RenderError> {
        self.log.borrow_mut().push(format!("render {url}"));
        let markup = self.pages.get(url).cloned().unwrap_or_default();
        Ok(Box::new(ScriptedPage(StaticDom::parse(&markup))))
    }
}

struct Harness {
    fetcher: ScriptedFetcher,
    renderer: ScriptedRenderer,
    store: MemoryStore,
    log: EventLog,
}

impl Harness {
    fn new(static_pages: &[(&str, String)], rendered_pages: &[(&str, String)]) -> Self {
        let log = EventLog::default();
        let owned = |pages: &[(&str, String)]| {
            pages
                .iter()
                .map(|(url, body)| (url.to_string(), body.clone()))
                .collect::<HashMap<_, _>>()
        };
        Self {
            fetcher: ScriptedFetcher {
                pages: owned(static_pages),
                log: Rc::clone(&log),
            },
            renderer: ScriptedRenderer {
                pages: owned(rendered_pages),
                log: Rc::clone(&log),
            },
            store: MemoryStore::new(),
            log,
        }
    }

    async fn run(&self, controls: &HarvestControls) -> fastharvest::RunReport {
        harvest(controls, &self.fetcher, &self.renderer, &self.store)
            .await
            .expect("harvest runs")
    }

    fn events(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

fn controls<const N: usize>(seeds: [&str; N]) -> HarvestControls {
    HarvestControls::new(seeds)
        .with_politeness_ms(0..=0)
        .with_concurrency(3, 2)
}

fn acme_page() -> String {
    let sentence = "Acme builds precision anvils for discerning coyotes everywhere. ";
    let body = sentence.repeat(2_000 / sentence.len() + 1);
    format!(
        "<html><head><title>Acme</title></head><body><article><p>{}</p></article></body></html>",
        &body[..2_000]
    )
}

fn article_page(title: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head><body><main><p>{}</p></main></body></html>",
        "A paragraph with enough words to be considered readable content. ".repeat(5)
    )
}

const EMPTY_SHELL: &str = "<html><head></head><body><div id=\"root\"></div></body></html>";

#[tokio::test(flavor = "current_thread")]
async fn complete_static_page_is_accepted_on_the_fast_path() {
    let harness = Harness::new(&[("https://acme.test/", acme_page())], &[]);
    let report = harness.run(&controls(["https://acme.test/"])).await;

    assert_eq!(report.stats.seen, 1);
    assert_eq!(report.stats.accepted, 1);
    assert_eq!(report.stats.deferred, 0);
    assert_eq!(report.stats.rendered, 0);
    assert_eq!(report.stats.rendered_rate, 0);

    let docs = harness.store.documents("documents");
    assert_eq!(docs.len(), 1);
    let doc = &docs[0];
    assert_eq!(doc.title.as_deref(), Some("Acme"));
    assert!(!doc.main_text.is_empty());
    assert!(doc.schema_types.is_empty());
    assert_eq!(doc.render_mode, RenderMode::Fast);
    assert!(harness.events().iter().all(|event| event.starts_with("fetch")));
}

#[tokio::test(flavor = "current_thread")]
async fn client_side_page_is_rendered_after_the_barrier() {
    let harness = Harness::new(
        &[("https://spa.test/", EMPTY_SHELL.to_string())],
        &[("https://spa.test/", EMPTY_SHELL.to_string())],
    );
    let report = harness.run(&controls(["https://spa.test/"])).await;

    assert_eq!(report.fast_phase.seen, 1);
    assert_eq!(report.fast_phase.deferred, 1);
    assert!(report.barrier_ok);
    assert_eq!(report.stats.rendered, 1);
    assert_eq!(report.stats.rendered_rate, 100);

    let docs = harness.store.documents("documents");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].url, "https://spa.test/");
    // Rendered records are emitted even when still incomplete.
    assert_eq!(docs[0].render_mode, RenderMode::Rendered);
    assert_eq!(docs[0].title, None);
    assert_eq!(
        harness.events(),
        vec!["fetch https://spa.test/", "render https://spa.test/"]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn no_render_starts_before_every_fetch_finished() {
    let seeds = [
        "https://a.test/",
        "https://b.test/",
        "https://c.test/",
        "https://d.test/",
        "https://e.test/",
        "https://f.test/",
    ];
    let harness = Harness::new(
        &[
            ("https://a.test/", article_page("A")),
            ("https://b.test/", EMPTY_SHELL.to_string()),
            ("https://c.test/", article_page("C")),
            ("https://d.test/", EMPTY_SHELL.to_string()),
            ("https://e.test/", article_page("E")),
        ],
        &[
            ("https://b.test/", article_page("B rendered")),
            ("https://d.test/", article_page("D rendered")),
        ],
    );
    let report = harness.run(&controls(seeds)).await;

    let events = harness.events();
    let last_fetch = events.iter().rposition(|e| e.starts_with("fetch")).unwrap();
    let first_render = events.iter().position(|e| e.starts_with("render")).unwrap();
    assert!(last_fetch < first_render, "render raced the fast phase: {events:?}");
    assert_eq!(events.iter().filter(|e| e.starts_with("fetch")).count(), 6);

    assert_eq!(report.fast_phase.seen, 6);
    assert_eq!(report.fast_phase.accepted, 3);
    assert_eq!(report.fast_phase.deferred, 3);
    assert_eq!(
        report.fast_phase.accepted + report.fast_phase.deferred,
        report.fast_phase.seen
    );
    assert_eq!(report.stats.rendered, 3);
    assert_eq!(report.stats.rendered_rate, 50);
    assert_eq!(report.stats.persisted, 6);

    for doc in harness.store.documents("documents") {
        let expected = if ["https://a.test/", "https://c.test/", "https://e.test/"].contains(&doc.url.as_str()) {
            RenderMode::Fast
        } else {
            RenderMode::Rendered
        };
        assert_eq!(doc.render_mode, expected, "{}", doc.url);
    }
}

#[tokio::test(flavor = "current_thread")]
async fn rendered_rate_rounds_over_mixed_runs() {
    let harness = Harness::new(
        &[
            ("https://1.test/", article_page("1")),
            ("https://2.test/", article_page("2")),
            ("https://3.test/", article_page("3")),
            ("https://4.test/", EMPTY_SHELL.to_string()),
        ],
        &[],
    );
    let report = harness
        .run(&controls([
            "https://1.test/",
            "https://2.test/",
            "https://3.test/",
            "https://4.test/",
        ]))
        .await;
    assert_eq!(report.stats.accepted, 3);
    assert_eq!(report.stats.rendered, 1);
    assert_eq!(report.stats.rendered_rate, 25);
}

#[tokio::test(flavor = "current_thread")]
async fn link_lists_stay_capped_on_emitted_documents() {
    let mut anchors = String::new();
    for i in 0..300 {
        anchors.push_str(&format!(r#"<a href="/p/{i}">p{i}</a> <a href="https://other.test/{i}">o{i}</a> "#));
    }
    let page = format!(
        "<html><head><title>Links</title></head><body><main><p>{}</p><nav>{anchors}</nav></main></body></html>",
        "Readable words fill this paragraph to pass the threshold easily. ".repeat(5)
    );
    let harness = Harness::new(&[("https://links.test/", page)], &[]);
    harness.run(&controls(["https://links.test/"])).await;

    let docs = harness.store.documents("documents");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].links.internal.len(), 200);
    assert_eq!(docs[0].links.external.len(), 200);
    assert_eq!(docs[0].links.internal[0], "https://links.test/p/0");
}

#[tokio::test(flavor = "current_thread")]
async fn deferred_links_are_followed_and_decided_before_rendering() {
    let root = r#"<html><body><div id="root"></div><a href="/child">child</a></body></html>"#.to_string();
    let harness = Harness::new(
        &[
            ("https://site.test/", root),
            ("https://site.test/child", article_page("Child")),
        ],
        &[],
    );
    let report = harness
        .run(&controls(["https://site.test/"]).with_max_depth(1))
        .await;

    assert_eq!(report.fast_phase.seen, 2);
    assert_eq!(report.fast_phase.accepted, 1);
    assert_eq!(report.fast_phase.deferred, 1);
    assert_eq!(report.stats.rendered, 1);
    assert_eq!(
        harness.events(),
        vec![
            "fetch https://site.test/",
            "fetch https://site.test/child",
            "render https://site.test/"
        ]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn probe_preset_uses_custom_field_selectors() {
    let page = r#"<html><head><title>Deep clean</title></head><body>
        <h1 class="service">Deep clean</h1>
        <span class="provider">Sparkle Co</span>
        <span class="price">$89 per visit</span>
    </body></html>"#
        .to_string();
    let harness = Harness::new(&[("https://svc.test/", page)], &[]);
    let controls = controls(["https://svc.test/"])
        .with_completeness(CompletenessSpec::probe())
        .with_field_selectors(vec![
            FieldSelector::new("serviceTitle", "h1.service"),
            FieldSelector::new("provider", ".provider"),
            FieldSelector::new("priceText", ".price"),
        ]);
    let report = harness.run(&controls).await;

    assert_eq!(report.stats.accepted, 1);
    let doc = &harness.store.documents("documents")[0];
    assert_eq!(doc.fields.get("priceText").map(String::as_str), Some("$89 per visit"));
}

#[tokio::test(flavor = "current_thread")]
async fn empty_seed_list_fails_before_any_work() {
    let harness = Harness::new(&[], &[]);
    let result = harvest(
        &HarvestControls::new(Vec::<String>::new()),
        &harness.fetcher,
        &harness.renderer,
        &harness.store,
    )
    .await;
    assert!(matches!(result, Err(HarvestError::Config(ConfigError::NoSeeds))));
    assert!(harness.events().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn extraction_is_idempotent_on_identical_markup() {
    let markup = format!(
        r#"<html><head><title>Org</title>
        <script type="application/ld+json">{{ not json</script>
        <script type="application/ld+json">{{"@type":"Organization","name":"Acme"}}</script>
        </head><body><a href="/about">About</a><a href="https://other.example/x">X</a>{}</body></html>"#,
        acme_page()
    );
    let input = ExtractionInput {
        source: "https://example.com/",
        status: 200,
        content_type: None,
        fetched_at: Utc::now(),
        render_mode: RenderMode::Fast,
        field_selectors: &[],
    };
    let first = extract_document(&StaticDom::parse(&markup), &input).await;
    let second = extract_document(&StaticDom::parse(&markup), &input).await;

    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first, second);
    assert_eq!(first.jsonld.len(), 1);
    assert_eq!(first.schema_types, vec!["Organization"]);
    assert_eq!(first.links.internal, vec!["https://example.com/about"]);
    assert_eq!(first.links.external, vec!["https://other.example/x"]);
}
