//! Logging setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Setup logging with the given level, optionally writing to a file as
/// well as stderr.
pub fn setup_logging(level: &str, json: bool, file: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let file_layer = file.map(|path| {
            let appender = tracing_appender::rolling::daily(".", path);
            fmt::layer().with_ansi(false).with_writer(appender)
        });
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .with(file_layer)
            .init();
    } else {
        let file_layer = file.map(|path| {
            let appender = tracing_appender::rolling::daily(".", path);
            fmt::layer().with_ansi(false).with_writer(appender)
        });
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .with(file_layer)
            .init();
    }
}
