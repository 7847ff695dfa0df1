//! Log records carried on per-worker `log.<name>` services.
//!
//! Workers publish structured [`LogRecord`]s so that any part of the process
//! can subscribe to a single worker's log channel or to the whole `log`
//! group. Records are additionally forwarded to `tracing` at the matching
//! level, so a plain subscriber-less setup still gets observable logs.

use serde::{Deserialize, Serialize};

/// Log severity, ordered from chattiest to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    /// Unrecoverable conditions; the worker keeps running but needs attention.
    Severe,
}

impl Severity {
    /// Stable lowercase label, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Severe => "severe",
        }
    }
}

/// One entry on a worker's log service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// How urgent the entry is.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
}

impl LogRecord {
    /// Creates a record.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Mirrors a record onto the `tracing` subscriber at the matching level.
pub(crate) fn forward_to_tracing(worker: &str, record: &LogRecord) {
    match record.severity {
        Severity::Debug => tracing::debug!(worker, "{}", record.message),
        Severity::Info => tracing::info!(worker, "{}", record.message),
        Severity::Warning => tracing::warn!(worker, "{}", record.message),
        Severity::Error | Severity::Severe => tracing::error!(worker, "{}", record.message),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_from_debug_to_severe() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Severe);
    }

    #[test]
    fn severity_serializes_as_lowercase_label() {
        for severity in [
            Severity::Debug,
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Severe,
        ] {
            let json = serde_json::to_string(&severity).unwrap();
            assert_eq!(json, format!("\"{}\"", severity.as_str()));
        }
    }

    #[test]
    fn record_roundtrips_through_serde() {
        let record = LogRecord::new(Severity::Warning, "queue backlog above threshold");
        let json = serde_json::to_string(&record).unwrap();
        let back: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
