//! Request payload validation.
//!
//! Validation failures are collected field by field into a
//! [`ValidationError`]. The client-facing message is derived from the first
//! failing field, so rules should be declared in the order the client is
//! expected to fix them.
//!
//! ```rust,ignore
//! Validator::new()
//!     .required("email", &body.email)
//!     .email("email", &body.email)
//!     .min_len("password", &body.password, 8)
//!     .finish()?;
//! ```

use std::fmt;

use axum::body::{Body, to_bytes};
use serde::de::DeserializeOwned;

use crate::error::{PipelineError, sanitize_serde_error};

/// Message used when no field-specific message is available.
pub const GENERIC_VALIDATION_MESSAGE: &str = "Please check your inputs and try again";

/// The rule a field failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Required,
    Email,
    Alphanum,
    /// Minimum length, in characters.
    Min(usize),
    /// Maximum length, in characters.
    Max(usize),
    /// Application-defined rule; always rendered with the generic message.
    Custom(String),
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => f.write_str("required"),
            Rule::Email => f.write_str("email"),
            Rule::Alphanum => f.write_str("alphanum"),
            Rule::Min(n) => write!(f, "min={n}"),
            Rule::Max(n) => write!(f, "max={n}"),
            Rule::Custom(name) => f.write_str(name),
        }
    }
}

/// A single failing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub rule: Rule,
}

impl FieldError {
    pub fn new(field: impl Into<String>, rule: Rule) -> Self {
        Self {
            field: field.into(),
            rule,
        }
    }

    /// Human-readable message for this failure.
    pub fn message(&self) -> String {
        let field = &self.field;
        match &self.rule {
            Rule::Required => format!("{field} is required"),
            Rule::Email => "Invalid email".to_string(),
            Rule::Alphanum => format!("{field} should only contain letters and numbers"),
            Rule::Min(n) => format!("{field} should at least have {n} characters"),
            Rule::Max(n) => format!("{field} should at most have {n} characters"),
            Rule::Custom(_) => GENERIC_VALIDATION_MESSAGE.to_string(),
        }
    }
}

/// Structural or field validation failure, rendered as `422`.
///
/// An error with no fields represents a payload that could not be validated
/// at all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
    fields: Vec<FieldError>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return f.write_str("validation failed");
        }
        f.write_str("validation failed: ")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "field '{}' failed on '{}'", field.field, field.rule)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn new(fields: Vec<FieldError>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.fields
    }

    /// Client-facing message, derived from the first failing field.
    pub fn message(&self) -> String {
        self.fields
            .first()
            .map(FieldError::message)
            .unwrap_or_else(|| GENERIC_VALIDATION_MESSAGE.to_string())
    }
}

/// Types that can check their own invariants after deserialization.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Accumulating field validator.
#[derive(Debug, Default)]
#[must_use = "call finish() to obtain the validation result"]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(mut self, ok: bool, field: &str, rule: Rule) -> Self {
        if !ok {
            self.errors.push(FieldError::new(field, rule));
        }
        self
    }

    pub fn required(self, field: &str, value: &str) -> Self {
        self.check(!value.trim().is_empty(), field, Rule::Required)
    }

    /// Loose structural email check: one `@`, non-empty local part, dotted domain.
    ///
    /// Empty values pass; combine with [`required`](Self::required).
    pub fn email(self, field: &str, value: &str) -> Self {
        let ok = value.is_empty() || is_email(value);
        self.check(ok, field, Rule::Email)
    }

    pub fn alphanum(self, field: &str, value: &str) -> Self {
        let ok = value.chars().all(|c| c.is_ascii_alphanumeric());
        self.check(ok, field, Rule::Alphanum)
    }

    pub fn min_len(self, field: &str, value: &str, min: usize) -> Self {
        self.check(value.chars().count() >= min, field, Rule::Min(min))
    }

    pub fn max_len(self, field: &str, value: &str, max: usize) -> Self {
        self.check(value.chars().count() <= max, field, Rule::Max(max))
    }

    /// Record an application-defined rule.
    pub fn rule(self, field: &str, ok: bool, name: &str) -> Self {
        self.check(ok, field, Rule::Custom(name.to_string()))
    }

    pub fn finish(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(self.errors))
        }
    }
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.contains(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// Read a JSON body into `T`.
///
/// Malformed payloads become a `400` application error with a sanitized
/// message.
pub async fn json_body<T: DeserializeOwned>(body: Body, limit: usize) -> Result<T, PipelineError> {
    let bytes = to_bytes(body, limit)
        .await
        .map_err(|e| PipelineError::application(400, format!("Unable to read request body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PipelineError::application(400, sanitize_serde_error(&e)))
}

/// Read a JSON body into `T` and run its [`Validate`] rules.
pub async fn validated_json_body<T>(body: Body, limit: usize) -> Result<T, PipelineError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = json_body(body, limit).await?;
    value.validate()?;
    Ok(value)
}
