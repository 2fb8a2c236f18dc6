//! Structured, leveled logging collaborator.
//!
//! Layers never reach for a process-wide logger: every layer that logs is
//! handed a [`SharedLogger`] when it is constructed. The default
//! implementation, [`TracingLogger`], forwards to `tracing`; [`MemoryLogger`]
//! keeps entries in memory for assertions.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::ContextSnapshot;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    /// Logged at error severity and flagged `fatal`. Never terminates the process.
    Fatal,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        })
    }
}

/// Contextual key/value fields attached to a log entry.
///
/// Fields from several sources can be merged; on key collision the value
/// merged last wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Map<String, Value>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Values that fail to serialize are recorded as their error text.
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or_else(|e| Value::String(e.to_string()));
        self.0.insert(key.into(), value);
        self
    }

    /// Add an `error` field holding the error's display text.
    pub fn with_error(self, error: &dyn std::error::Error) -> Self {
        self.with("error", error.to_string())
    }

    /// Merge another set of fields into this one.
    pub fn merge(mut self, other: Fields) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Fields {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Leveled logger taking the request context and contextual fields.
pub trait Logger: Send + Sync + 'static {
    fn log(&self, level: Level, ctx: Option<&ContextSnapshot>, message: &str, fields: Fields);

    fn debug(&self, ctx: Option<&ContextSnapshot>, message: &str, fields: Fields) {
        self.log(Level::Debug, ctx, message, fields);
    }

    fn info(&self, ctx: Option<&ContextSnapshot>, message: &str, fields: Fields) {
        self.log(Level::Info, ctx, message, fields);
    }

    fn warn(&self, ctx: Option<&ContextSnapshot>, message: &str, fields: Fields) {
        self.log(Level::Warn, ctx, message, fields);
    }

    fn error(&self, ctx: Option<&ContextSnapshot>, message: &str, fields: Fields) {
        self.log(Level::Error, ctx, message, fields);
    }

    fn fatal(&self, ctx: Option<&ContextSnapshot>, message: &str, fields: Fields) {
        self.log(Level::Fatal, ctx, message, fields);
    }
}

/// Logger handle shared by every layer of a pipeline.
pub type SharedLogger = Arc<dyn Logger>;

/// Default logger: emits `tracing` events under the `request_pipeline` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn shared() -> SharedLogger {
        Arc::new(Self)
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, ctx: Option<&ContextSnapshot>, message: &str, fields: Fields) {
        let request_id = ctx.map(|c| c.request_id.as_str()).unwrap_or_default();
        let context = ctx
            .and_then(|c| serde_json::to_string(c).ok())
            .unwrap_or_default();
        let fields = fields.into_value();

        match level {
            Level::Debug => {
                tracing::debug!(request_id, context = %context, fields = %fields, "{message}")
            }
            Level::Info => {
                tracing::info!(request_id, context = %context, fields = %fields, "{message}")
            }
            Level::Warn => {
                tracing::warn!(request_id, context = %context, fields = %fields, "{message}")
            }
            Level::Error => {
                tracing::error!(request_id, context = %context, fields = %fields, "{message}")
            }
            Level::Fatal => tracing::error!(
                fatal = true,
                request_id,
                context = %context,
                fields = %fields,
                "{message}"
            ),
        }
    }
}

/// A captured log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: Level,
    pub context: Option<ContextSnapshot>,
    pub message: String,
    pub fields: Fields,
}

/// Logger that keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all entries logged so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries whose message starts with `prefix`.
    pub fn find(&self, prefix: &str) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.message.starts_with(prefix))
            .collect()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: Level, ctx: Option<&ContextSnapshot>, message: &str, fields: Fields) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogEntry {
                level,
                context: ctx.cloned(),
                message: message.to_string(),
                fields,
            });
    }
}
