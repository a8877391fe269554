//! Anchor resolution and internal/external classification.

use crate::document::{Links, MAX_LINKS};
use crate::dom::DomAccess;
use crate::extract::or_empty;
use std::collections::HashSet;
use url::Url;

/// Resolves every `a[href]` against the page base and splits by host.
pub async fn extract_links(dom: &dyn DomAccess, source: &str) -> Links {
    let anchors = or_empty("links", dom.query_all("a[href]").await);
    let hrefs = anchors
        .iter()
        .filter_map(|anchor| anchor.attribute("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty());

    let Ok(source_url) = Url::parse(source) else {
        // Without a base only absolute hrefs survive, and none can be called internal.
        let mut links = Links::default();
        let mut seen = HashSet::new();
        for url in hrefs.filter_map(|href| Url::parse(href).ok()) {
            if let Some(cleaned) = clean(url) {
                push_capped(&mut links.external, &mut seen, String::from(cleaned));
            }
        }
        return links;
    };

    let base = document_base(dom, &source_url).await;
    let source_host = source_url.host_str().map(str::to_ascii_lowercase);

    let mut links = Links {
        normalized: true,
        ..Links::default()
    };
    let mut seen_internal = HashSet::new();
    let mut seen_external = HashSet::new();
    for href in hrefs {
        let Some(url) = base.join(href).ok().and_then(clean) else {
            continue;
        };
        let internal = source_host.is_some() && url.host_str().map(str::to_ascii_lowercase) == source_host;
        let serialized = String::from(url);
        if internal {
            push_capped(&mut links.internal, &mut seen_internal, serialized);
        } else {
            push_capped(&mut links.external, &mut seen_external, serialized);
        }
        if links.internal.len() >= MAX_LINKS && links.external.len() >= MAX_LINKS {
            break;
        }
    }
    links
}

async fn document_base(dom: &dyn DomAccess, source: &Url) -> Url {
    or_empty("base", dom.query_all("base[href]").await)
        .first()
        .and_then(|base| base.attribute("href"))
        .and_then(|href| source.join(href.trim()).ok())
        .unwrap_or_else(|| source.clone())
}

fn clean(mut url: Url) -> Option<Url> {
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn push_capped(list: &mut Vec<String>, seen: &mut HashSet<String>, value: String) {
    if list.len() < MAX_LINKS && seen.insert(value.clone()) {
        list.push(value);
    }
}
