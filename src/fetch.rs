//! Static page fetching for the fast tier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE};
use reqwest::Client;
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

/// User agent sent by the static fetcher.
pub const USER_AGENT: &str = "fastharvest/0.1";
/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 5;

const HTML_CONTENT_TYPES: [&str; 2] = ["text/html", "application/xhtml+xml"];

/// Raw response captured by a [`PageFetcher`].
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: String,
    /// HTTP response status code.
    pub status: u16,
    /// `Content-Type` header, trimmed.
    pub content_type: Option<String>,
    /// When the response body finished downloading.
    pub fetched_at: DateTime<Utc>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl FetchedPage {
    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// HTML or XHTML content type. A missing header is treated as HTML.
    pub fn is_html(&self) -> bool {
        match &self.content_type {
            None => true,
            Some(value) => {
                let mime = value
                    .split(';')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase();
                HTML_CONTENT_TYPES.contains(&mime.as_str())
            }
        }
    }

    /// Body as text and whether lossy decoding was needed.
    pub fn decode_body(&self) -> (Cow<'_, str>, bool) {
        match std::str::from_utf8(&self.body) {
            Ok(text) => (Cow::Borrowed(text), false),
            Err(_) => (String::from_utf8_lossy(&self.body), true),
        }
    }
}

/// Failures while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    /// The request failed before a body was read.
    #[error("request to {url} failed: {source}")]
    Request {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// Anything else a custom fetcher wants to report.
    #[error("fetch of {url} failed: {message}")]
    Other {
        /// Requested URL.
        url: String,
        /// Description.
        message: String,
    },
}

/// Retrieves raw HTML for the fast tier.
#[async_trait(?Send)]
pub trait PageFetcher {
    /// Fetches `url`. Non-2xx responses are returned, not raised.
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// `reqwest`-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a client with the harvester's user agent and a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait(?Send)]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(request_error)?;
        let final_url = response.url().to_string();
        let status = response.status().as_u16();
        let content_type = header_to_string(response.headers(), CONTENT_TYPE);
        let body = response.bytes().await.map_err(request_error)?.to_vec();

        Ok(FetchedPage {
            final_url,
            status,
            content_type,
            fetched_at: Utc::now(),
            body,
        })
    }
}

fn header_to_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
