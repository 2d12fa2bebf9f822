//! Process-wide fault sink.
//!
//! Failures on background and fire-and-forget paths (drain loop, workflow
//! finalize) are reported here instead of being raised to callers. The sink
//! always logs; a consumer can additionally attach a channel to forward
//! reports to an external reporter.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::error;

/// A failure captured on a background path.
#[derive(Debug, Clone)]
pub struct FaultReport {
    /// Where the failure happened
    pub context: String,
    /// Rendered error
    pub error: String,
    /// When the failure was reported
    pub occurred_at: DateTime<Utc>,
}

/// Cloneable handle for reporting faults. Never blocks, never panics.
#[derive(Debug, Clone)]
pub struct FaultSink {
    tx: mpsc::UnboundedSender<FaultReport>,
}

impl FaultSink {
    /// Create a sink together with its consumer side.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FaultReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Sink with no consumer attached; reports are only logged.
    #[must_use]
    pub fn detached() -> Self {
        let (sink, _rx) = Self::new();
        sink
    }

    /// Report a failure.
    pub fn report(&self, context: impl Into<String>, err: impl std::fmt::Display) {
        let report = FaultReport {
            context: context.into(),
            error: err.to_string(),
            occurred_at: Utc::now(),
        };
        error!(context = %report.context, error = %report.error, "background fault");
        // A closed receiver just means nobody is listening.
        let _ = self.tx.send(report);
    }
}
