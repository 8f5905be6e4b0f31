//! Logging Infrastructure
//!
//! `RUST_LOG` wins when set; otherwise `LOG_LEVEL` applies to this crate
//! and tower-http. Output goes to stdout, or to a daily rolling file when
//! `LOG_DIR` points at an existing directory.

use std::path::Path;
use tracing_subscriber::EnvFilter;

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vps_server={level},tower_http={level}")))
}

/// Initialize the logger with optional JSON formatting and file output
pub fn init_logger(log_level: &str, json: bool, log_dir: Option<&str>) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(default_filter(log_level))
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(true);

    let file_dir = log_dir
        .map(Path::new)
        .filter(|p| p.is_dir())
        .and_then(|p| p.to_str());

    match (file_dir, json) {
        (Some(dir), true) => {
            let appender = tracing_appender::rolling::daily(dir, "vps-server");
            builder.json().with_writer(appender).init();
        }
        (Some(dir), false) => {
            let appender = tracing_appender::rolling::daily(dir, "vps-server");
            builder.with_ansi(false).with_writer(appender).init();
        }
        (None, true) => builder.json().init(),
        (None, false) => builder.init(),
    }

    if log_dir.is_some() && file_dir.is_none() {
        tracing::warn!(log_dir = ?log_dir, "LOG_DIR does not exist, logging to stdout");
    }
}
