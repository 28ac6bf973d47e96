//! Logging setup and the operator alert boundary.

mod logging;
mod alert;

pub use logging::setup_logging;
pub use alert::{AlertSeverity, AlertSink, LogAlertSink};
