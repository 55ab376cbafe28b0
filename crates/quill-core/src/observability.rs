//! Error reporting sink.
//!
//! Call sites hand over the error plus tags; payloads must never carry
//! plaintext, ciphertext or key material.

use std::{
    collections::BTreeMap,
    error::Error as StdError,
    sync::{Arc, Mutex},
};

use tracing::error;

/// Tags and extra fields attached to a captured error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportContext {
    pub tags: BTreeMap<String, String>,
    pub extra: BTreeMap<String, String>,
}

impl ReportContext {
    /// Context tagged with the failing operation name.
    pub fn operation(name: &str) -> Self {
        Self::default().tag("operation", name)
    }

    pub fn tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn extra(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Sink for failures that should reach an external error tracker.
pub trait ErrorReporter: Send + Sync {
    fn capture_exception(&self, error: &(dyn StdError + 'static), context: &ReportContext);
}

/// Reporter that forwards to `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn capture_exception(&self, err: &(dyn StdError + 'static), context: &ReportContext) {
        error!(
            error = %err,
            tags = ?context.tags,
            extra = ?context.extra,
            "captured exception"
        );
    }
}

/// Captured report, as seen by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedReport {
    pub message: String,
    pub context: ReportContext,
}

/// Keeps reports in memory so tests can assert on what was captured.
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Vec<CapturedReport>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<CapturedReport> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl ErrorReporter for RecordingReporter {
    fn capture_exception(&self, err: &(dyn StdError + 'static), context: &ReportContext) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(CapturedReport {
                message: err.to_string(),
                context: context.clone(),
            });
        }
    }
}
