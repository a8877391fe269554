//! Title, description, language, canonical URL, Open Graph and meta tags; headings.

use crate::document::{Headings, MAX_META_ENTRIES};
use crate::dom::DomAccess;
use crate::extract::{dedupe, or_empty};
use std::collections::BTreeMap;
use url::Url;

/// Meta keys copied into [`crate::document::ContentDocument::meta`].
pub const META_ALLOW_LIST: &[&str] = &[
    "description",
    "keywords",
    "author",
    "robots",
    "viewport",
    "generator",
    "theme-color",
    "application-name",
    "twitter:card",
    "twitter:title",
    "twitter:description",
    "twitter:image",
    "twitter:site",
    "twitter:creator",
    "article:published_time",
    "article:modified_time",
    "article:author",
    "article:section",
    "og:site_name",
    "format-detection",
];

/// Document-level metadata facet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Title, falling back to `og:title`.
    pub title: Option<String>,
    /// Description, falling back to `og:description`.
    pub description: Option<String>,
    /// `html[lang]`.
    pub language: Option<String>,
    /// Canonical link target.
    pub canonical_url: Option<String>,
    /// All `og:*` properties.
    pub open_graph: BTreeMap<String, String>,
    /// Allow-listed meta tags.
    pub meta: BTreeMap<String, String>,
}

/// Extracts the metadata facet.
pub async fn extract_metadata(dom: &dyn DomAccess, source: &str) -> Metadata {
    let mut open_graph = BTreeMap::new();
    let mut meta = BTreeMap::new();
    let mut description = None;

    for tag in or_empty("meta", dom.query_all("meta[content]").await) {
        let Some(key) = tag.attribute("property").or_else(|| tag.attribute("name")) else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let content = tag.attribute("content").unwrap_or_default().trim().to_string();
        if content.is_empty() {
            continue;
        }

        if key == "description" && description.is_none() {
            description = Some(content.clone());
        }
        if key.starts_with("og:") {
            open_graph.entry(key.clone()).or_insert_with(|| content.clone());
        }
        if META_ALLOW_LIST.contains(&key.as_str())
            && meta.len() < MAX_META_ENTRIES
            && !meta.contains_key(&key)
        {
            meta.insert(key, content);
        }
    }

    let title = Some(or_empty("title", dom.title().await))
        .filter(|title| !title.is_empty())
        .or_else(|| open_graph.get("og:title").cloned());
    let description = description.or_else(|| open_graph.get("og:description").cloned());

    let language = or_empty("language", dom.query_all("html[lang]").await)
        .into_iter()
        .find_map(|html| html.attribute("lang").map(|lang| lang.trim().to_string()))
        .filter(|lang| !lang.is_empty());

    let canonical_url = or_empty("canonical", dom.query_all("link[rel][href]").await)
        .into_iter()
        .find(|link| {
            link.attribute("rel").is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("canonical"))
            })
        })
        .and_then(|link| link.attribute("href").map(|href| resolve(source, href.trim())));

    Metadata {
        title,
        description,
        language,
        canonical_url,
        open_graph,
        meta,
    }
}

fn resolve(source: &str, href: &str) -> String {
    Url::parse(source)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

/// Extracts deduplicated `h1`-`h3` texts in first-occurrence order.
pub async fn extract_headings(dom: &dyn DomAccess) -> Headings {
    let mut levels = Vec::with_capacity(3);
    for selector in ["h1", "h2", "h3"] {
        let texts = or_empty(selector, dom.query_all(selector).await)
            .into_iter()
            .filter_map(|heading| heading.text().map(str::to_string));
        levels.push(dedupe(texts));
    }
    let h3 = levels.pop().unwrap_or_default();
    let h2 = levels.pop().unwrap_or_default();
    let h1 = levels.pop().unwrap_or_default();
    Headings { h1, h2, h3 }
}
