//! Tracing initialisation for the changegate binary and tests.
//!
//! Filter precedence: `CHANGEGATE_LOG`, then `RUST_LOG`, then the supplied
//! level applied to changegate's own crates only (dependencies stay at
//! `warn`).
//!
//! Safe to call more than once; later calls are ignored.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_ENV: &str = "CHANGEGATE_LOG";

/// Directives used when neither `CHANGEGATE_LOG` nor `RUST_LOG` is set.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!("warn,changegate={level},changegate_core={level},changegate_state={level}")
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines, with span context.
/// * `level`: verbosity for changegate crates when no env filter is set.
pub fn init_tracing(json: bool, level: Level) {
    let filter = env_filter(level);
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().with_target(false).json().with_current_span(true))
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(false)).try_init().ok();
    }
}
