//! Headless browser tier: page lifecycle, resource blocking, consent handling.
//!
//! [`ChromeRenderer`] launches Chromium lazily on the first render request, so
//! runs where the fast tier accepts everything never start a browser.

use crate::dom::{DomAccess, DomError, ElementHandle};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, ErrorReason, EventResponseReceived, ResourceType,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Resource types aborted before they hit the network.
pub const BLOCKED_RESOURCES: [ResourceType; 4] = [
    ResourceType::Image,
    ResourceType::Font,
    ResourceType::Media,
    ResourceType::Stylesheet,
];

/// Accept buttons of common consent managers, probed in order.
pub const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll",
    "#didomi-notice-agree-button",
    ".fc-cta-consent",
    ".cc-allow",
    "button[data-testid='cookie-accept']",
    "button[aria-label*='Accept']",
    ".cookie-accept",
];

/// Injected once probing ends to hide overlays that never offered a button.
pub const CONSENT_HIDE_CSS: &str = "#onetrust-consent-sdk, #onetrust-banner-sdk, \
#CybotCookiebotDialog, #didomi-host, .fc-consent-root, .cc-window, \
[id*='cookie-banner'], [class*='cookie-banner'] { display: none !important; } \
html, body { overflow: auto !important; }";

const PROBE_INTERVAL: Duration = Duration::from_millis(100);
const MAX_INNER_HTML_CHARS: usize = 150_000;

/// Failures of the browser tier.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The browser configuration was rejected.
    #[error("invalid browser config: {0}")]
    Config(String),
    /// Chromium could not be launched.
    #[error("failed to launch browser: {0}")]
    Launch(#[source] CdpError),
    /// A tab could not be opened or prepared.
    #[error("failed to open page for {url}: {source}")]
    Page {
        /// Target URL.
        url: String,
        /// Underlying protocol error.
        #[source]
        source: CdpError,
    },
    /// A script evaluation failed.
    #[error("page evaluation failed: {0}")]
    Evaluation(String),
}

/// A navigated page whose DOM can be queried.
#[async_trait(?Send)]
pub trait RenderedPage {
    /// Query surface over the live document.
    fn dom(&self) -> &dyn DomAccess;

    /// Status of the main document response, `0` when unknown.
    fn status(&self) -> u16;

    /// Content type of the main document response.
    fn content_type(&self) -> Option<String>;

    /// Clicks the first visible consent button before `deadline`, then hides
    /// known overlays. Returns whether a button was clicked.
    async fn dismiss_consent(&self, deadline: Duration) -> Result<bool, RenderError>;

    /// Waits until the page reports it finished loading. Returns false on timeout.
    async fn wait_settled(&self, deadline: Duration) -> bool;

    /// Releases the tab.
    async fn close(&self);
}

/// Opens pages in a browser.
#[async_trait(?Send)]
pub trait PageRenderer {
    /// Starts the browser if it is not running yet.
    async fn launch(&self) -> Result<(), RenderError> {
        Ok(())
    }

    /// Opens a tab and navigates it to `url`. Navigation failures are logged and
    /// the tab is still returned; only failing to obtain a tab is an error.
    async fn open(&self, url: &str) -> Result<Box<dyn RenderedPage>, RenderError>;

    /// Stops the browser.
    async fn shutdown(&self) {}
}

/// Browser launch and navigation settings.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Chromium binary; auto-detected when absent.
    pub chrome_path: Option<PathBuf>,
    /// Pass `--no-sandbox` (containers).
    pub no_sandbox: bool,
    /// Bound on the initial navigation.
    pub navigation_timeout: Duration,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            no_sandbox: false,
            navigation_timeout: Duration::from_secs(15),
        }
    }
}

struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// [`PageRenderer`] driving headless Chromium over CDP.
pub struct ChromeRenderer {
    settings: RenderSettings,
    session: Mutex<Option<BrowserSession>>,
}

impl ChromeRenderer {
    /// Renderer that launches on first use.
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            session: Mutex::new(None),
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig, RenderError> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(self.settings.navigation_timeout)
            .window_size(1366, 900)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--mute-audio");
        if let Some(path) = &self.settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        if self.settings.no_sandbox {
            builder = builder.no_sandbox();
        }
        builder.build().map_err(RenderError::Config)
    }

    async fn start(&self) -> Result<BrowserSession, RenderError> {
        let (browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(RenderError::Launch)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler stopped");
                    break;
                }
            }
        });
        info!("headless browser launched");
        Ok(BrowserSession { browser, handler })
    }

    async fn prepare(&self, page: &Page, url: &str) -> Result<PageWatchers, RenderError> {
        let page_error = |source| RenderError::Page {
            url: url.to_string(),
            source,
        };

        let patterns = BLOCKED_RESOURCES
            .iter()
            .map(|kind| {
                RequestPattern::builder()
                    .resource_type(kind.clone())
                    .request_stage(RequestStage::Request)
                    .build()
            })
            .collect::<Vec<_>>();
        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(page_error)?;
        page.execute(fetch::EnableParams::builder().patterns(patterns).build())
            .await
            .map_err(page_error)?;

        let blocker_page = page.clone();
        let blocker = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let outcome = if BLOCKED_RESOURCES.contains(&event.resource_type) {
                    blocker_page
                        .execute(FailRequestParams::new(
                            event.request_id.clone(),
                            ErrorReason::BlockedByClient,
                        ))
                        .await
                        .map(|_| ())
                } else {
                    blocker_page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if outcome.is_err() {
                    break;
                }
            }
        });

        let document = Arc::new(OnceLock::new());
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(page_error)?;
        page.execute(network::EnableParams::default())
            .await
            .map_err(page_error)?;
        let captured = Arc::clone(&document);
        let status = tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                if event.r#type == ResourceType::Document {
                    let status = u16::try_from(event.response.status).unwrap_or(0);
                    let mime = Some(event.response.mime_type.clone()).filter(|m| !m.is_empty());
                    let _ = captured.set((status, mime));
                    break;
                }
            }
        });

        Ok(PageWatchers {
            document,
            tasks: vec![blocker, status],
        })
    }
}

#[async_trait(?Send)]
impl PageRenderer for ChromeRenderer {
    async fn launch(&self) -> Result<(), RenderError> {
        let mut session = self.session.lock().await;
        if session.is_none() {
            *session = Some(self.start().await?);
        }
        Ok(())
    }

    async fn open(&self, url: &str) -> Result<Box<dyn RenderedPage>, RenderError> {
        let opened = {
            let mut session = self.session.lock().await;
            let active = match session.take() {
                Some(active) => active,
                None => self.start().await?,
            };
            let opened = active.browser.new_page("about:blank").await;
            *session = Some(active);
            opened
        };
        let page = opened.map_err(|source| RenderError::Page {
            url: url.to_string(),
            source,
        })?;

        let watchers = match self.prepare(&page, url).await {
            Ok(watchers) => watchers,
            Err(err) => {
                let _ = page.close().await;
                return Err(err);
            }
        };

        match timeout(self.settings.navigation_timeout, page.goto(url)).await {
            Ok(Ok(_)) => debug!(%url, "navigation finished"),
            Ok(Err(err)) => warn!(%url, error = %err, "navigation failed"),
            Err(_) => warn!(%url, "navigation timed out"),
        }

        Ok(Box::new(ChromePage {
            dom: RenderedDom::new(page),
            watchers,
        }))
    }

    async fn shutdown(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };
        if let Err(err) = session.browser.close().await {
            warn!(error = %err, "browser close failed");
        }
        let _ = session.browser.wait().await;
        session.handler.abort();
        info!("headless browser stopped");
    }
}

struct PageWatchers {
    document: Arc<OnceLock<(u16, Option<String>)>>,
    tasks: Vec<JoinHandle<()>>,
}

struct ChromePage {
    dom: RenderedDom,
    watchers: PageWatchers,
}

#[async_trait(?Send)]
impl RenderedPage for ChromePage {
    fn dom(&self) -> &dyn DomAccess {
        &self.dom
    }

    fn status(&self) -> u16 {
        self.watchers
            .document
            .get()
            .map(|(status, _)| *status)
            .unwrap_or(0)
    }

    fn content_type(&self) -> Option<String> {
        self.watchers
            .document
            .get()
            .and_then(|(_, mime)| mime.clone())
    }

    async fn dismiss_consent(&self, deadline: Duration) -> Result<bool, RenderError> {
        let selectors = serde_json::to_string(CONSENT_SELECTORS)
            .map_err(|err| RenderError::Evaluation(err.to_string()))?;
        let probe = format!(
            r#"(() => {{
                const candidates = {selectors};
                for (const selector of candidates) {{
                    const el = document.querySelector(selector);
                    if (!el) continue;
                    const rect = el.getBoundingClientRect();
                    const style = window.getComputedStyle(el);
                    if (rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none') {{
                        el.click();
                        return selector;
                    }}
                }}
                return null;
            }})()"#
        );

        let started = Instant::now();
        let mut clicked = None;
        while started.elapsed() < deadline {
            let found: Option<String> = self.dom.evaluate(&probe).await?;
            if found.is_some() {
                clicked = found;
                break;
            }
            sleep(PROBE_INTERVAL).await;
        }

        let css = serde_json::to_string(CONSENT_HIDE_CSS)
            .map_err(|err| RenderError::Evaluation(err.to_string()))?;
        let inject = format!(
            r#"(() => {{
                const style = document.createElement('style');
                style.textContent = {css};
                (document.head || document.documentElement).appendChild(style);
                return true;
            }})()"#
        );
        let _: bool = self.dom.evaluate(&inject).await?;

        if let Some(selector) = &clicked {
            debug!(%selector, "consent overlay dismissed");
        }
        Ok(clicked.is_some())
    }

    async fn wait_settled(&self, deadline: Duration) -> bool {
        let settled = timeout(deadline, async {
            loop {
                match self
                    .dom
                    .evaluate::<String>("document.readyState")
                    .await
                    .as_deref()
                {
                    Ok("complete") => return,
                    Ok(_) => {}
                    Err(err) => debug!(error = %err, "readyState probe failed"),
                }
                sleep(PROBE_INTERVAL).await;
            }
        })
        .await;
        settled.is_ok()
    }

    async fn close(&self) {
        for task in &self.watchers.tasks {
            task.abort();
        }
        if let Err(err) = self.dom.page.clone().close().await {
            debug!(error = %err, "page close failed");
        }
    }
}

/// [`DomAccess`] over a live page; each query is one script evaluation.
#[derive(Clone)]
pub struct RenderedDom {
    page: Page,
}

#[derive(Deserialize)]
struct QueryResult {
    error: Option<String>,
    #[serde(default)]
    elements: Vec<RawElement>,
}

#[derive(Deserialize)]
struct RawElement {
    tag: String,
    text: String,
    html: String,
    attrs: BTreeMap<String, String>,
}

impl RenderedDom {
    /// Wraps an already navigated page.
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T, RenderError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|err| RenderError::Evaluation(err.to_string()))?
            .into_value()
            .map_err(|err| RenderError::Evaluation(err.to_string()))
    }

    async fn evaluate_dom<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T, DomError> {
        self.evaluate(script)
            .await
            .map_err(|err| DomError::Evaluation(err.to_string()))
    }
}

#[async_trait(?Send)]
impl DomAccess for RenderedDom {
    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>, DomError> {
        let script = query_script(selector)?;
        let result: QueryResult = self.evaluate_dom(&script).await?;
        if let Some(message) = result.error {
            return Err(DomError::Selector {
                selector: selector.to_string(),
                message,
            });
        }
        Ok(result
            .elements
            .into_iter()
            .map(|raw| ElementHandle::new(raw.tag, Some(raw.text.as_str()), raw.html, raw.attrs))
            .collect())
    }

    async fn title(&self) -> Result<String, DomError> {
        self.evaluate_dom("document.title || ''").await
    }

    async fn body_markup(&self) -> Result<String, DomError> {
        self.evaluate_dom("document.body ? document.body.innerHTML : ''")
            .await
    }

    async fn scripts_by_type(&self, script_type: &str) -> Result<Vec<String>, DomError> {
        self.evaluate_dom(&script_text_script(script_type)?).await
    }
}

fn quote_js(value: &str) -> Result<String, DomError> {
    serde_json::to_string(value).map_err(|err| DomError::Evaluation(err.to_string()))
}

/// Element snapshots for `selector`; markup is capped except inside `<script>`.
fn query_script(selector: &str) -> Result<String, DomError> {
    let quoted = quote_js(selector)?;
    Ok(format!(
        r#"(() => {{
            let nodes;
            try {{
                nodes = document.querySelectorAll({quoted});
            }} catch (err) {{
                return {{ error: String(err && err.message || err), elements: [] }};
            }}
            return {{
                error: null,
                elements: Array.from(nodes).map((el) => ({{
                    tag: el.tagName.toLowerCase(),
                    text: el.textContent || '',
                    html: el.tagName === 'SCRIPT' ? el.innerHTML : el.innerHTML.slice(0, {MAX_INNER_HTML_CHARS}),
                    attrs: Object.fromEntries(Array.from(el.attributes).map((a) => [a.name, a.value])),
                }})),
            }};
        }})()"#
    ))
}

/// Full text of every `<script type=...>` block. JSON-LD size is capped after parsing.
fn script_text_script(script_type: &str) -> Result<String, DomError> {
    let quoted = quote_js(script_type)?;
    Ok(format!(
        r#"Array.from(document.getElementsByTagName('script'))
            .filter((el) => el.getAttribute('type') === {quoted})
            .map((el) => el.textContent || '')"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consent_css_is_a_single_valid_js_string() {
        let encoded = serde_json::to_string(CONSENT_HIDE_CSS).unwrap();
        assert!(encoded.starts_with('"') && encoded.ends_with('"'));
        assert!(CONSENT_HIDE_CSS.contains("display: none !important"));
    }

    #[test]
    fn blocks_heavy_resource_types_only() {
        assert!(BLOCKED_RESOURCES.contains(&ResourceType::Image));
        assert!(BLOCKED_RESOURCES.contains(&ResourceType::Stylesheet));
        assert!(!BLOCKED_RESOURCES.contains(&ResourceType::Document));
        assert!(!BLOCKED_RESOURCES.contains(&ResourceType::Script));
    }

    #[test]
    fn default_settings_are_sandboxed() {
        let settings = RenderSettings::default();
        assert!(!settings.no_sandbox);
        assert!(settings.chrome_path.is_none());
    }

    #[test]
    fn script_bodies_are_read_in_full() {
        let scripts = script_text_script("application/ld+json").unwrap();
        assert!(scripts.contains(r#""application/ld+json""#));
        assert!(!scripts.contains("slice("));

        let query = query_script("script[type=\"application/ld+json\"]").unwrap();
        assert!(query.contains("el.tagName === 'SCRIPT' ? el.innerHTML"));
        assert!(query.contains(&format!("slice(0, {MAX_INNER_HTML_CHARS})")));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn shutdown_without_launch_is_a_no_op() {
        let renderer = ChromeRenderer::new(RenderSettings::default());
        renderer.shutdown().await;
        assert!(renderer.session.lock().await.is_none());
    }
}
