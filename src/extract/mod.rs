//! Stateless field extractors and the assembler that runs them all.
//!
//! Every extractor takes a [`DomAccess`] plus page context and degrades to an
//! empty facet on failure, so one broken selector never aborts a page.

pub mod body;
pub mod contacts;
pub mod evidence;
pub mod links;
pub mod metadata;
pub mod structured;
pub mod text;

use crate::document::{ContentDocument, RenderMode};
use crate::dom::{DomAccess, DomError};
use body::BodySnapshot;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Named CSS selector whose first match fills [`ContentDocument::fields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    name: String,
    selector: String,
}

impl FieldSelector {
    /// Pairs a field name with the selector that extracts it.
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
        }
    }

    /// Output field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// CSS selector.
    pub fn selector(&self) -> &str {
        &self.selector
    }
}

/// Error for malformed `name=selector` pairs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field selector `{0}` must look like name=css-selector")]
pub struct FieldSelectorParseError(pub String);

impl FromStr for FieldSelector {
    type Err = FieldSelectorParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.split_once('=') {
            Some((name, selector)) if !name.trim().is_empty() && !selector.trim().is_empty() => {
                Ok(Self::new(name.trim(), selector.trim()))
            }
            _ => Err(FieldSelectorParseError(raw.to_string())),
        }
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.selector)
    }
}

/// Page context the assembler needs beyond the DOM itself.
#[derive(Debug, Clone)]
pub struct ExtractionInput<'a> {
    /// URL the request was issued for.
    pub source: &'a str,
    /// Observed HTTP status (`0` when unknown).
    pub status: u16,
    /// Observed content type.
    pub content_type: Option<String>,
    /// Fetch or render completion time.
    pub fetched_at: DateTime<Utc>,
    /// Producing tier.
    pub render_mode: RenderMode,
    /// Custom field selectors.
    pub field_selectors: &'a [FieldSelector],
}

/// Runs every extractor and assembles a [`ContentDocument`].
pub async fn extract_document(dom: &dyn DomAccess, input: &ExtractionInput<'_>) -> ContentDocument {
    let markup = or_empty("body", dom.body_markup().await);
    let body = BodySnapshot::new(markup);
    let visible_text = body.visible_text();

    let metadata = metadata::extract_metadata(dom, input.source).await;
    let headings = metadata::extract_headings(dom).await;
    let jsonld = structured::extract_jsonld(dom).await;
    let schema_types = structured::schema_types(&jsonld);
    let links = links::extract_links(dom, input.source).await;
    let main = text::extract_main_text(dom, &body).await;
    let contacts = contacts::extract_contacts(dom, &main.main_text).await;
    let evidence = evidence::collect_evidence(&main.main_text, &visible_text);
    let fields = extract_custom_fields(dom, input.field_selectors).await;

    ContentDocument {
        url: input.source.to_string(),
        fetched_at: input.fetched_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        status: input.status,
        content_type: input.content_type.clone(),
        canonical_url: metadata.canonical_url,
        language: metadata.language,
        title: metadata.title,
        description: metadata.description,
        open_graph: metadata.open_graph,
        meta: metadata.meta,
        main_text: main.main_text,
        text_blocks: main.blocks,
        headings,
        jsonld,
        schema_types,
        links,
        contacts,
        evidence,
        dom_stats: body.dom_stats(),
        fingerprint: body.fingerprint(),
        render_mode: input.render_mode,
        fields,
    }
}

async fn extract_custom_fields(
    dom: &dyn DomAccess,
    selectors: &[FieldSelector],
) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for field in selectors {
        let matches = or_empty(field.name(), dom.query_all(field.selector()).await);
        if let Some(text) = matches.iter().find_map(|el| el.text()) {
            fields.insert(field.name().to_string(), text.to_string());
        }
    }
    fields
}

/// Unwraps a facet result, logging and substituting the empty value on failure.
pub(crate) fn or_empty<T: Default>(facet: &str, result: Result<T, DomError>) -> T {
    result.unwrap_or_else(|err| {
        debug!(facet, error = %err, "extractor degraded to empty value");
        T::default()
    })
}

/// Keeps the first occurrence of each value, preserving order.
pub(crate) fn dedupe<I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

/// Truncates to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(input: &str, max: usize) -> String {
    match input.char_indices().nth(max) {
        Some((idx, _)) => input[..idx].to_string(),
        None => input.to_string(),
    }
}
