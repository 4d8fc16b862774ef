//! The per-run log artifact.
//!
//! A block accumulates an append-only sequence of records across its stages
//! and flushes the rendered text to the store as a file annotation when the
//! lifecycle ends, whatever the outcome. Records are mirrored to `tracing`
//! as they are appended so live output and the stored artifact agree.

use chain_kit_common::{DateTime, Utc};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Append-only log buffer scoped to one block or chain run
#[derive(Debug, Clone)]
pub struct LogBuffer {
    scope: String,
    records: Vec<LogRecord>,
}

impl LogBuffer {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            records: Vec::new(),
        }
    }

    pub fn append(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(scope = %self.scope, "{message}");
        self.records.push(LogRecord {
            at: Utc::now(),
            level: LogLevel::Info,
            message,
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(scope = %self.scope, "{message}");
        self.records.push(LogRecord {
            at: Utc::now(),
            level: LogLevel::Warn,
            message,
        });
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render the buffer as the text artifact attached to the store
    pub fn render(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            let level = match record.level {
                LogLevel::Info => "INFO",
                LogLevel::Warn => "WARN",
            };
            out.push_str(&format!(
                "{} {} [{}] {}\n",
                record.at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                level,
                self.scope,
                record.message
            ));
        }
        out
    }
}
