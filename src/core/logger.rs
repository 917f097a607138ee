// Structured Logging for Institutional Flow
// tracing + tracing-subscriber, initialised once per process

use tracing::Level;
use tracing_subscriber::EnvFilter;
use std::sync::Once;

static INIT: Once = Once::new();

fn parse_level(log_level: &str) -> Level {
    match log_level.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Setup structured logging for the entire application.
/// Later calls are no-ops.
pub fn setup_logging(log_level: Option<&str>, json_format: Option<bool>) {
    let log_level_str = log_level.unwrap_or("INFO");
    let json_format = json_format.unwrap_or(true);
    let level = parse_level(log_level_str);

    INIT.call_once(|| {
        let filter = EnvFilter::from_default_env().add_directive(level.into());

        // try_init: a test harness may already have installed a subscriber
        let result = if json_format {
            tracing_subscriber::fmt()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_env_filter(filter)
                .try_init()
        } else {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .try_init()
        };

        if result.is_ok() {
            tracing::info!(log_level = %log_level_str, json = json_format, "Logging initialized");
        }
    });
}
