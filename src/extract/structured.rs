//! Embedded JSON-LD parsing and `@type` collection.

use crate::document::MAX_JSONLD_CHARS;
use crate::dom::{DomAccess, JSON_LD_TYPE};
use crate::extract::or_empty;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Nesting depth past which the `@type` walk stops descending.
pub const MAX_TYPE_DEPTH: usize = 64;

/// Parses every JSON-LD script, skipping malformed and oversized payloads.
pub async fn extract_jsonld(dom: &dyn DomAccess) -> Vec<Value> {
    or_empty("jsonld", dom.scripts_by_type(JSON_LD_TYPE).await)
        .iter()
        .filter_map(|raw| parse_script(raw))
        .collect()
}

fn parse_script(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("<!--").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("-->").unwrap_or(trimmed).trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let size = value.to_string().chars().count();
    if size > MAX_JSONLD_CHARS {
        debug!(size, "dropping oversized json-ld object");
        return None;
    }
    Some(value)
}

/// Collects every `@type` string in `values`, sorted and deduplicated.
pub fn schema_types(values: &[Value]) -> Vec<String> {
    let mut types = BTreeSet::new();
    let mut stack: Vec<(&Value, usize)> = values.iter().map(|value| (value, 0)).collect();

    while let Some((value, depth)) = stack.pop() {
        if depth > MAX_TYPE_DEPTH {
            continue;
        }
        match value {
            Value::Object(map) => {
                match map.get("@type") {
                    Some(Value::String(name)) => {
                        types.insert(name.trim().to_string());
                    }
                    Some(Value::Array(names)) => {
                        types.extend(
                            names
                                .iter()
                                .filter_map(Value::as_str)
                                .map(|name| name.trim().to_string()),
                        );
                    }
                    _ => {}
                }
                stack.extend(map.values().map(|child| (child, depth + 1)));
            }
            Value::Array(items) => {
                stack.extend(items.iter().map(|child| (child, depth + 1)));
            }
            _ => {}
        }
    }

    types.remove("");
    types.into_iter().collect()
}
