//! Path-addressed redaction of structured log data.
//!
//! A redaction path is a dotted list of object keys, for example
//! `request.body.variables.password`. Walking rules:
//!
//! - A `headers` segment (any case) followed by a name masks every header
//!   whose name matches case-insensitively. Multi-valued headers have each
//!   value masked.
//! - Arrays apply the remaining path to every element.
//! - A string met before the path is exhausted is parsed as JSON. When the
//!   path matches inside it, the string is re-encoded with the substitution.
//!   Strings that are not JSON are left alone.
//! - Paths that do not match anything are ignored.
//!
//! [`redact`] never touches its input; it works on a deep copy.

use axum::http::HeaderMap;
use serde_json::{Map, Value};

/// Replacement written over every redacted value.
pub const REDACTED: &str = "*REDACTED*";

const HEADERS: &str = "headers";

/// Paths to redact from the request and response halves of a log record.
///
/// Request paths are resolved against the record's `request` subtree and
/// response paths against its `response` subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedactionRules {
    pub request_paths: Vec<String>,
    pub response_paths: Vec<String>,
}

impl RedactionRules {
    pub fn new(request_paths: Vec<String>, response_paths: Vec<String>) -> Self {
        Self {
            request_paths,
            response_paths,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.request_paths.is_empty() && self.response_paths.is_empty()
    }

    /// Return a redacted copy of a log record.
    pub fn apply(&self, record: &Value) -> Value {
        let mut out = record.clone();
        if let Value::Object(map) = &mut out {
            if let Some(request) = map.get_mut("request") {
                redact_in_place(request, &self.request_paths);
            }
            if let Some(response) = map.get_mut("response") {
                redact_in_place(response, &self.response_paths);
            }
        }
        out
    }
}

/// Return a copy of `tree` with every value addressed by `paths` masked.
pub fn redact<S: AsRef<str>>(tree: &Value, paths: &[S]) -> Value {
    let mut out = tree.clone();
    redact_in_place(&mut out, paths);
    out
}

/// Mask every value addressed by `paths` in place.
///
/// Returns whether anything was replaced.
pub fn redact_in_place<S: AsRef<str>>(tree: &mut Value, paths: &[S]) -> bool {
    let mut changed = false;
    for path in paths {
        let segments: Vec<&str> = path.as_ref().split('.').collect();
        changed |= redact_path(tree, &segments);
    }
    changed
}

fn redact_path(node: &mut Value, segments: &[&str]) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        return false;
    };

    match node {
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| redact_path(item, segments) | changed),
        Value::Object(map) => {
            if head.eq_ignore_ascii_case(HEADERS)
                && let Some(name) = rest.first()
                && let Some(Value::Object(headers)) = map
                    .iter_mut()
                    .find(|(key, _)| key.eq_ignore_ascii_case(HEADERS))
                    .map(|(_, value)| value)
            {
                return redact_headers(headers, name);
            }

            let Some(value) = map.get_mut(*head) else {
                return false;
            };
            if rest.is_empty() {
                *value = Value::String(REDACTED.to_string());
                return true;
            }
            match value {
                Value::String(encoded) => redact_encoded(encoded, rest),
                other => redact_path(other, rest),
            }
        }
        _ => false,
    }
}

fn redact_headers(headers: &mut Map<String, Value>, name: &str) -> bool {
    let mut changed = false;
    for (key, value) in headers.iter_mut() {
        if !key.eq_ignore_ascii_case(name) {
            continue;
        }
        match value {
            Value::Array(values) => {
                for v in values.iter_mut() {
                    *v = Value::String(REDACTED.to_string());
                    changed = true;
                }
            }
            other => {
                *other = Value::String(REDACTED.to_string());
                changed = true;
            }
        }
    }
    changed
}

// Re-encode only on change so unmatched paths leave the original text intact.
fn redact_encoded(encoded: &mut String, rest: &[&str]) -> bool {
    let Ok(mut parsed) = serde_json::from_str::<Value>(encoded) else {
        return false;
    };
    if !redact_path(&mut parsed, rest) {
        return false;
    }
    match serde_json::to_string(&parsed) {
        Ok(reencoded) => {
            *encoded = reencoded;
            true
        }
        Err(_) => false,
    }
}

/// Convert a header multimap into `{ name: [values...] }`.
///
/// Non UTF-8 values are converted lossily.
pub fn headers_to_value(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for name in headers.keys() {
        let values = headers
            .get_all(name)
            .iter()
            .map(|v| Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        map.insert(name.as_str().to_string(), Value::Array(values));
    }
    Value::Object(map)
}
