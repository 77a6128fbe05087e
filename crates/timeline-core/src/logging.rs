//! Tracing subscriber bootstrap, shared by the API server and the worker.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes structured logging. JSON output in non-development
/// environments, human-readable otherwise — matches the teacher's
/// `APP_ENV`-gated `tracing_subscriber` setup.
pub fn init(app_env: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if app_env == "development" {
        let _ = fmt().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).json().try_init();
    }
}
