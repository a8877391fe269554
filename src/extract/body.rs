//! Body markup snapshot: readable-text pass, visible-text statistics and fingerprint.

use crate::document::{DomStats, MAX_BLOCK_CHARS, MAX_MAIN_TEXT_CHARS, MAX_TEXT_BLOCKS};
use crate::dom::collapse_whitespace;
use crate::extract::truncate_chars;
use scraper::{ElementRef, Html, Node, Selector};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Minimum characters the readable-text pass must produce to count as success.
pub const MIN_READABLE_CHARS: usize = 200;

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];
const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "nav", "header", "footer", "aside", "form",
    "iframe",
];
const BLOCK_TAGS: &[&str] = &[
    "p", "li", "blockquote", "pre", "h1", "h2", "h3", "h4", "h5", "h6", "dd", "td",
];
const MAX_LINK_DENSITY: f32 = 0.5;

static ROOT_CANDIDATES: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["article", "main", "[role=main]"]
        .iter()
        .map(|css| Selector::parse(css).expect("root selector"))
        .collect()
});
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").expect("body selector"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("anchor selector"));

/// Readable text recovered by the boilerplate-removal pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadableText {
    /// Blocks joined with blank lines, truncated to the main-text cap.
    pub text: String,
    /// Leading blocks in document order.
    pub blocks: Vec<String>,
}

/// Parsed copy of the body markup a tier extracted from.
pub struct BodySnapshot {
    markup: String,
    document: Html,
}

impl BodySnapshot {
    /// Parses `markup` (the inner HTML of `body`).
    pub fn new(markup: String) -> Self {
        let document = Html::parse_document(&format!("<html><body>{markup}</body></html>"));
        Self { markup, document }
    }

    /// Raw markup as captured.
    pub fn markup(&self) -> &str {
        &self.markup
    }

    fn body(&self) -> ElementRef<'_> {
        self.document
            .select(&BODY)
            .next()
            .unwrap_or_else(|| self.document.root_element())
    }

    /// Lowercase SHA-256 hex digest over the whitespace-normalized markup.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.markup)
    }

    /// Visible body text with script, style, noscript and template removed.
    pub fn visible_text(&self) -> String {
        text_excluding(self.body(), HIDDEN_TAGS)
    }

    /// Word, character and element counts over the body.
    pub fn dom_stats(&self) -> DomStats {
        let body = self.body();
        let visible = self.visible_text();
        DomStats {
            word_count: visible.split_whitespace().count(),
            char_count: visible.chars().count(),
            node_count: body.descendent_elements().count().saturating_sub(1),
        }
    }

    /// Boilerplate-removal pass. Returns `None` when the recovered text is
    /// shorter than [`MIN_READABLE_CHARS`].
    pub fn readable_text(&self) -> Option<ReadableText> {
        let root = self.pick_root();
        let mut collector = BlockCollector::new(root);
        collector.walk();
        let mut blocks = collector.finish();

        if blocks.is_empty() {
            let whole = text_excluding(root, BOILERPLATE_TAGS);
            if !whole.is_empty() {
                blocks.push(whole);
            }
        }

        let joined = blocks.join("\n\n");
        if joined.chars().count() < MIN_READABLE_CHARS {
            return None;
        }

        Some(ReadableText {
            text: truncate_chars(&joined, MAX_MAIN_TEXT_CHARS),
            blocks: blocks
                .iter()
                .take(MAX_TEXT_BLOCKS)
                .map(|block| truncate_chars(block, MAX_BLOCK_CHARS))
                .collect(),
        })
    }

    fn pick_root(&self) -> ElementRef<'_> {
        ROOT_CANDIDATES
            .iter()
            .find_map(|selector| self.document.select(selector).next())
            .unwrap_or_else(|| self.body())
    }
}

/// Lowercase SHA-256 hex digest over whitespace-normalized markup.
pub fn fingerprint(markup: &str) -> String {
    let normalized = collapse_whitespace(markup);
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

struct BlockCollector<'a> {
    root: ElementRef<'a>,
    blocks: Vec<String>,
}

impl<'a> BlockCollector<'a> {
    fn new(root: ElementRef<'a>) -> Self {
        Self {
            root,
            blocks: Vec::new(),
        }
    }

    fn walk(&mut self) {
        for element in self.root.descendent_elements() {
            self.maybe_record(element);
        }
    }

    fn maybe_record(&mut self, element: ElementRef<'a>) {
        let tag = element.value().name();
        if !BLOCK_TAGS.contains(&tag) {
            return;
        }
        // Skip blocks under boilerplate and blocks nested in an already recorded block.
        let shadowed = within(element, self.root, |name| {
            BOILERPLATE_TAGS.contains(&name) || BLOCK_TAGS.contains(&name)
        });
        if shadowed {
            return;
        }

        let text = text_excluding(element, HIDDEN_TAGS);
        if text.is_empty() {
            return;
        }

        let link_chars: usize = element
            .select(&ANCHOR)
            .map(|anchor| collapse_whitespace(&anchor.text().collect::<String>()).chars().count())
            .sum();
        let total = text.chars().count().max(1);
        if link_chars as f32 / total as f32 > MAX_LINK_DENSITY {
            return;
        }

        self.blocks.push(text);
    }

    fn finish(self) -> Vec<String> {
        self.blocks
    }
}

fn within(element: ElementRef<'_>, root: ElementRef<'_>, matches: impl Fn(&str) -> bool) -> bool {
    element
        .ancestors()
        .take_while(|ancestor| ancestor.id() != root.id())
        .filter_map(|ancestor| ancestor.value().as_element().map(|el| el.name()))
        .any(matches)
}

fn text_excluding(root: ElementRef<'_>, excluded: &[&str]) -> String {
    let mut raw = String::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .take_while(|ancestor| ancestor.id() != root.id())
            .filter_map(|ancestor| ancestor.value().as_element().map(|el| el.name()))
            .any(|name| excluded.contains(&name));
        if !hidden {
            raw.push_str(text);
        }
    }
    collapse_whitespace(&raw)
}
