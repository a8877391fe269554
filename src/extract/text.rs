//! Main text selection: readable-text pass first, largest-block heuristic second.

use crate::document::{MAX_BLOCK_CHARS, MAX_MAIN_TEXT_CHARS, MAX_TEXT_BLOCKS};
use crate::dom::DomAccess;
use crate::extract::body::BodySnapshot;
use crate::extract::{dedupe, or_empty, truncate_chars};

/// Minimum characters for a `p`/`div` block to qualify in the fallback.
pub const MIN_FALLBACK_BLOCK_CHARS: usize = 80;

const CONTAINER_SELECTOR: &str = "main, article, [role=main]";
const BLOCK_SELECTOR: &str = "p, div";

/// Main text plus auxiliary blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainText {
    /// Primary readable text.
    pub main_text: String,
    /// Auxiliary blocks, at most [`MAX_TEXT_BLOCKS`].
    pub blocks: Vec<String>,
}

/// Picks the main text for a page.
pub async fn extract_main_text(dom: &dyn DomAccess, body: &BodySnapshot) -> MainText {
    if let Some(readable) = body.readable_text() {
        return MainText {
            main_text: readable.text,
            blocks: readable.blocks,
        };
    }
    largest_blocks(dom).await
}

async fn largest_blocks(dom: &dyn DomAccess) -> MainText {
    let containers = dedupe(
        or_empty("main", dom.query_all(CONTAINER_SELECTOR).await)
            .iter()
            .filter_map(|el| el.text().map(str::to_string)),
    );
    let mut candidates = outermost(containers);

    if candidates.is_empty() {
        candidates = or_empty("blocks", dom.query_all(BLOCK_SELECTOR).await)
            .iter()
            .filter_map(|el| el.text())
            .filter(|text| text.chars().count() >= MIN_FALLBACK_BLOCK_CHARS)
            .map(str::to_string)
            .collect();
    }

    // Stable sort keeps document order among equal lengths.
    candidates.sort_by_key(|text| std::cmp::Reverse(text.chars().count()));
    let blocks: Vec<String> = candidates
        .iter()
        .take(MAX_TEXT_BLOCKS)
        .map(|text| truncate_chars(text, MAX_BLOCK_CHARS))
        .collect();

    MainText {
        main_text: blocks
            .first()
            .map(|block| truncate_chars(block, MAX_MAIN_TEXT_CHARS))
            .unwrap_or_default(),
        blocks,
    }
}

/// Drops container texts already contained in another container, so nested
/// `main > article` markup is counted once.
fn outermost(texts: Vec<String>) -> Vec<String> {
    texts
        .iter()
        .enumerate()
        .filter(|(idx, text)| {
            !texts
                .iter()
                .enumerate()
                .any(|(other, outer)| other != *idx && outer.len() > text.len() && outer.contains(text.as_str()))
        })
        .map(|(_, text)| text.clone())
        .collect()
}
