//! Short supporting snippets: first price, leading summary, first terms/policy mention.

use crate::document::{Evidence, EvidenceKind, MAX_EVIDENCE};
use crate::extract::truncate_chars;
use regex::Regex;
use std::sync::LazyLock;

/// Characters of main text kept in the summary snippet.
pub const SUMMARY_CHARS: usize = 400;
/// Context kept on each side of a terms keyword.
pub const TERMS_WINDOW: usize = 120;

static PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        (?:
            [$€£¥₹]\s?\d[\d,]*(?:\.\d{1,2})?
          | \d[\d,]*(?:\.\d{1,2})?\s?(?:USD|EUR|GBP|CHF|CAD|AUD|€|£)
        )
        (?:\s?(?:/|per\s)\s?(?:month|mo|year|yr|hour|hr|day|week|user|seat|person))?",
    )
    .expect("price regex")
});

static TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:terms|privacy|refund|cancellation|policy)\b").expect("terms regex")
});

/// Builds at most one snippet per [`EvidenceKind`], first match wins.
pub fn collect_evidence(main_text: &str, page_text: &str) -> Vec<Evidence> {
    let mut evidence = Vec::with_capacity(3);

    if let Some(price) = PRICE
        .find(main_text)
        .or_else(|| PRICE.find(page_text))
        .map(|m| m.as_str().trim().to_string())
    {
        evidence.push(Evidence {
            kind: EvidenceKind::Price,
            text: price,
        });
    }

    let summary = truncate_chars(main_text.trim(), SUMMARY_CHARS);
    if !summary.is_empty() {
        evidence.push(Evidence {
            kind: EvidenceKind::Summary,
            text: summary,
        });
    }

    if let Some(hit) = TERMS.find(page_text) {
        evidence.push(Evidence {
            kind: EvidenceKind::Terms,
            text: window(page_text, hit.start(), hit.end(), TERMS_WINDOW),
        });
    }

    evidence.truncate(MAX_EVIDENCE);
    evidence
}

fn window(text: &str, start: usize, end: usize, radius: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .nth(radius.saturating_sub(1))
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let to = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(idx, _)| end + idx)
        .unwrap_or(text.len());
    text[from..to].trim().to_string()
}
