//! Operator alert boundary.
//!
//! Alert delivery (webhook, email) lives outside this system; components
//! that must raise operator-visible conditions do so through this trait.

use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    /// Halts new order submission until acknowledged by an operator
    Fatal,
}

/// Sink for operator alerts.
pub trait AlertSink: Send + Sync {
    fn alert(&self, severity: AlertSeverity, message: &str);
}

/// Default sink: alerts land in the log stream.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, severity: AlertSeverity, message: &str) {
        match severity {
            AlertSeverity::Warning => warn!(target: "alerts", "{message}"),
            AlertSeverity::Fatal => error!(target: "alerts", "FATAL: {message}"),
        }
    }
}
