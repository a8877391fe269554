//! Canonical output record shared by the fast and rendered extraction tiers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Maximum characters kept in [`ContentDocument::main_text`].
pub const MAX_MAIN_TEXT_CHARS: usize = 20_000;
/// Maximum number of auxiliary text blocks.
pub const MAX_TEXT_BLOCKS: usize = 5;
/// Maximum characters per auxiliary text block.
pub const MAX_BLOCK_CHARS: usize = 2_000;
/// Maximum links stored per internal/external list.
pub const MAX_LINKS: usize = 200;
/// Maximum allow-listed meta entries.
pub const MAX_META_ENTRIES: usize = 20;
/// Maximum phone numbers stored per document.
pub const MAX_PHONES: usize = 20;
/// Longest plausible email address; longer matches are discarded.
pub const MAX_EMAIL_CHARS: usize = 99;
/// Maximum evidence snippets.
pub const MAX_EVIDENCE: usize = 5;
/// Serialized size cap for a single JSON-LD object.
pub const MAX_JSONLD_CHARS: usize = 150_000;

/// Which pipeline produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Static HTML, no script execution.
    Fast,
    /// Browser-rendered page.
    Rendered,
}

impl RenderMode {
    /// Stable lowercase label used in logs and serialized records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Rendered => "rendered",
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level 1-3 headings, deduplicated in first-occurrence order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headings {
    /// `h1` texts.
    pub h1: Vec<String>,
    /// `h2` texts.
    pub h2: Vec<String>,
    /// `h3` texts.
    pub h3: Vec<String>,
}

/// Outgoing anchors split by host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    /// Links sharing the source URL's host.
    pub internal: Vec<String>,
    /// Links pointing elsewhere.
    pub external: Vec<String>,
    /// False when the source URL could not serve as a resolution base.
    pub normalized: bool,
}

/// Contact details scraped from footer and main text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contacts {
    /// Lowercased, deduplicated email addresses.
    pub emails: Vec<String>,
    /// Deduplicated phone-like strings.
    pub phones: Vec<String>,
}

impl Contacts {
    /// True when neither emails nor phones were found.
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.phones.is_empty()
    }
}

/// Category of an evidence snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    /// First price-like substring.
    Price,
    /// Leading slice of the main text.
    Summary,
    /// Terms or policy keyword with surrounding context.
    Terms,
}

/// Short text excerpt supporting downstream review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Snippet category.
    pub kind: EvidenceKind,
    /// Excerpt text.
    pub text: String,
}

/// Size statistics over the visible body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomStats {
    /// Whitespace-separated words of visible text.
    pub word_count: usize,
    /// Characters of visible text.
    pub char_count: usize,
    /// Element nodes under `body`.
    pub node_count: usize,
}

/// Normalized record emitted once per URL by whichever tier accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDocument {
    /// URL the harvest was requested for.
    pub url: String,
    /// RFC 3339 timestamp of the fetch or render.
    pub fetched_at: String,
    /// HTTP status, `0` when the tier could not observe one.
    pub status: u16,
    /// Response content type.
    pub content_type: Option<String>,
    /// `link[rel=canonical]` target.
    pub canonical_url: Option<String>,
    /// `html[lang]`.
    pub language: Option<String>,
    /// Document title, falling back to `og:title`.
    pub title: Option<String>,
    /// Meta description, falling back to `og:description`.
    pub description: Option<String>,
    /// Every `og:*` property.
    pub open_graph: BTreeMap<String, String>,
    /// Allow-listed meta tags.
    pub meta: BTreeMap<String, String>,
    /// Primary readable text.
    pub main_text: String,
    /// Auxiliary text blocks.
    pub text_blocks: Vec<String>,
    /// Heading sets.
    pub headings: Headings,
    /// Parsed JSON-LD objects.
    pub jsonld: Vec<Value>,
    /// Sorted `@type` names found in [`Self::jsonld`].
    pub schema_types: Vec<String>,
    /// Anchors split by host.
    pub links: Links,
    /// Emails and phones, absent when none were found.
    pub contacts: Option<Contacts>,
    /// Evidence snippets.
    pub evidence: Vec<Evidence>,
    /// Visible-body statistics.
    pub dom_stats: DomStats,
    /// SHA-256 hex digest of the body markup this tier extracted from.
    pub fingerprint: String,
    /// Producing tier.
    pub render_mode: RenderMode,
    /// Values of configured custom field selectors.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

/// Reasons a document is refused before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The source URL is not an absolute http(s) URL.
    #[error("source url `{0}` is not an absolute http(s) url")]
    SourceUrl(String),
    /// The timestamp is not RFC 3339.
    #[error("fetched_at `{0}` is not an RFC 3339 timestamp")]
    Timestamp(String),
    /// A bounded collection exceeded its cap.
    #[error("{field} holds {len} entries, limit is {limit}")]
    TooMany {
        /// Offending field.
        field: &'static str,
        /// Observed length.
        len: usize,
        /// Allowed maximum.
        limit: usize,
    },
    /// A bounded string exceeded its cap.
    #[error("{field} is {len} characters, limit is {limit}")]
    TooLong {
        /// Offending field.
        field: &'static str,
        /// Observed character count.
        len: usize,
        /// Allowed maximum.
        limit: usize,
    },
    /// A set-valued field contains duplicates.
    #[error("{0} contains duplicate entries")]
    Duplicates(&'static str),
    /// The fingerprint is not a SHA-256 hex digest.
    #[error("fingerprint `{0}` is not a 64 character hex digest")]
    Fingerprint(String),
}

impl ContentDocument {
    /// Checks the record against the published schema constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(ValidationError::SourceUrl(self.url.clone())),
        }
        if chrono::DateTime::parse_from_rfc3339(&self.fetched_at).is_err() {
            return Err(ValidationError::Timestamp(self.fetched_at.clone()));
        }

        check_chars("main_text", &self.main_text, MAX_MAIN_TEXT_CHARS)?;
        check_len("text_blocks", self.text_blocks.len(), MAX_TEXT_BLOCKS)?;
        for block in &self.text_blocks {
            check_chars("text_blocks", block, MAX_BLOCK_CHARS)?;
        }
        check_len("meta", self.meta.len(), MAX_META_ENTRIES)?;
        check_len("links.internal", self.links.internal.len(), MAX_LINKS)?;
        check_len("links.external", self.links.external.len(), MAX_LINKS)?;
        check_unique("links.internal", &self.links.internal)?;
        check_unique("links.external", &self.links.external)?;
        check_unique("headings.h1", &self.headings.h1)?;
        check_unique("headings.h2", &self.headings.h2)?;
        check_unique("headings.h3", &self.headings.h3)?;
        check_unique("schema_types", &self.schema_types)?;
        check_len("evidence", self.evidence.len(), MAX_EVIDENCE)?;

        for value in &self.jsonld {
            let size = value.to_string().chars().count();
            check_chars_len("jsonld", size, MAX_JSONLD_CHARS)?;
        }

        if let Some(contacts) = &self.contacts {
            check_unique("contacts.emails", &contacts.emails)?;
            check_unique("contacts.phones", &contacts.phones)?;
            check_len("contacts.phones", contacts.phones.len(), MAX_PHONES)?;
            for email in &contacts.emails {
                check_chars("contacts.emails", email, MAX_EMAIL_CHARS)?;
            }
        }

        let hex_digest = self.fingerprint.len() == 64
            && self
                .fingerprint
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !hex_digest {
            return Err(ValidationError::Fingerprint(self.fingerprint.clone()));
        }

        Ok(())
    }
}

fn check_len(field: &'static str, len: usize, limit: usize) -> Result<(), ValidationError> {
    if len > limit {
        return Err(ValidationError::TooMany { field, len, limit });
    }
    Ok(())
}

fn check_chars(field: &'static str, value: &str, limit: usize) -> Result<(), ValidationError> {
    check_chars_len(field, value.chars().count(), limit)
}

fn check_chars_len(field: &'static str, len: usize, limit: usize) -> Result<(), ValidationError> {
    if len > limit {
        return Err(ValidationError::TooLong { field, len, limit });
    }
    Ok(())
}

fn check_unique(field: &'static str, values: &[String]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(values.len());
    if values.iter().all(|value| seen.insert(value.as_str())) {
        Ok(())
    } else {
        Err(ValidationError::Duplicates(field))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_document() -> ContentDocument {
        ContentDocument {
            url: "https://example.com/".to_string(),
            fetched_at: "2024-05-01T12:00:00Z".to_string(),
            status: 200,
            content_type: Some("text/html".to_string()),
            canonical_url: None,
            language: Some("en".to_string()),
            title: Some("Acme".to_string()),
            description: None,
            open_graph: BTreeMap::new(),
            meta: BTreeMap::new(),
            main_text: "Acme builds anvils.".to_string(),
            text_blocks: vec!["Acme builds anvils.".to_string()],
            headings: Headings::default(),
            jsonld: Vec::new(),
            schema_types: Vec::new(),
            links: Links {
                normalized: true,
                ..Links::default()
            },
            contacts: None,
            evidence: Vec::new(),
            dom_stats: DomStats::default(),
            fingerprint: "a".repeat(64),
            render_mode: RenderMode::Fast,
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn sample_passes_validation() {
        sample_document().validate().expect("valid");
    }

    #[test]
    fn rejects_link_overflow() {
        let mut doc = sample_document();
        doc.links.external = (0..=MAX_LINKS)
            .map(|i| format!("https://other.test/{i}"))
            .collect();
        assert_eq!(
            doc.validate(),
            Err(ValidationError::TooMany {
                field: "links.external",
                len: MAX_LINKS + 1,
                limit: MAX_LINKS,
            })
        );
    }

    #[test]
    fn rejects_duplicate_headings() {
        let mut doc = sample_document();
        doc.headings.h2 = vec!["Pricing".into(), "Pricing".into()];
        assert_eq!(
            doc.validate(),
            Err(ValidationError::Duplicates("headings.h2"))
        );
    }

    #[test]
    fn rejects_relative_source_and_bad_fingerprint() {
        let mut doc = sample_document();
        doc.url = "/relative".into();
        assert!(matches!(doc.validate(), Err(ValidationError::SourceUrl(_))));

        let mut doc = sample_document();
        doc.fingerprint = "ABC".into();
        assert!(matches!(
            doc.validate(),
            Err(ValidationError::Fingerprint(_))
        ));
    }

    #[test]
    fn render_mode_serializes_lowercase() {
        let json = serde_json::to_value(RenderMode::Rendered).expect("serialize");
        assert_eq!(json, Value::String("rendered".into()));
    }
}
