//! Structured logging setup.
//!
//! The core only emits [`tracing`] events carrying `job_id`/`job_name`
//! fields (spec §6); shipping them anywhere is the embedder's concern.

use tracing_subscriber::EnvFilter;

/// Install a `tracing-subscriber` layer. Text output by default; set
/// `TASKRELAY_LOG_FORMAT=json` for structured JSON output.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TASKRELAY_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}
