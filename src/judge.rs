//! Completeness judge deciding whether the fast tier's extraction suffices.

use crate::document::ContentDocument;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Outcome of judging a partial document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every required field is present and non-empty.
    Accept,
    /// Some required fields are missing; the URL needs the render tier.
    Defer {
        /// Required fields that were absent or empty, in declaration order.
        missing: Vec<String>,
    },
}

impl Verdict {
    /// True for [`Verdict::Accept`].
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Named set of required fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletenessSpec {
    name: String,
    required: Vec<String>,
}

/// Error for unknown completeness presets or empty field lists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletenessParseError {
    /// No preset has this name.
    #[error("unknown completeness preset `{0}` (expected `general` or `probe`)")]
    UnknownPreset(String),
    /// A custom field list was empty.
    #[error("completeness spec needs at least one required field")]
    NoFields,
}

impl CompletenessSpec {
    /// Builds a spec from a name and required field paths.
    pub fn new<I, S>(name: impl Into<String>, required: I) -> Result<Self, CompletenessParseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let required: Vec<String> = required
            .into_iter()
            .map(Into::into)
            .map(|field| field.trim().to_string())
            .filter(|field| !field.is_empty())
            .collect();
        if required.is_empty() {
            return Err(CompletenessParseError::NoFields);
        }
        Ok(Self {
            name: name.into(),
            required,
        })
    }

    /// General harvesting: title and main text.
    pub fn general() -> Self {
        Self {
            name: "general".to_string(),
            required: vec!["title".to_string(), "main_text".to_string()],
        }
    }

    /// Service probe: custom fields extracted by configured selectors.
    pub fn probe() -> Self {
        Self {
            name: "probe".to_string(),
            required: vec![
                "serviceTitle".to_string(),
                "provider".to_string(),
                "priceText".to_string(),
            ],
        }
    }

    /// Preset or custom name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Required field paths.
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Judges a serialized document. Pure and deterministic.
    pub fn judge(&self, document: &Value) -> Verdict {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|field| !lookup(document, field).is_some_and(is_present))
            .cloned()
            .collect();
        if missing.is_empty() {
            Verdict::Accept
        } else {
            Verdict::Defer { missing }
        }
    }

    /// Judges a typed document.
    pub fn evaluate(&self, document: &ContentDocument) -> Verdict {
        match serde_json::to_value(document) {
            Ok(value) => self.judge(&value),
            Err(_) => Verdict::Defer {
                missing: self.required.clone(),
            },
        }
    }
}

impl Default for CompletenessSpec {
    fn default() -> Self {
        Self::general()
    }
}

impl FromStr for CompletenessSpec {
    type Err = CompletenessParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "general" => Ok(Self::general()),
            "probe" => Ok(Self::probe()),
            other => Err(CompletenessParseError::UnknownPreset(other.to_string())),
        }
    }
}

impl fmt::Display for CompletenessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.required.join(","))
    }
}

/// Resolves a dotted path at the top level, then under `fields`.
fn lookup<'a>(document: &'a Value, field: &str) -> Option<&'a Value> {
    walk(document, field).or_else(|| document.get("fields").and_then(|fields| fields.get(field)))
}

fn walk<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |node, segment| node.get(segment))
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}
