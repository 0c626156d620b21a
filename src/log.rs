//! Structured logging for conductor.
//!
//! Log levels:
//! - ERROR: Failures surfaced to callers (exhausted retries, failed workflows)
//! - WARN: No-op branches and recoverable conditions (duplicate registration, agent failure)
//! - INFO: Lifecycle notifications (start/stop, registration, task completion)
//! - DEBUG: Scheduling decisions and state transitions
//! - TRACE: Per-tick health sampling
//!
//! `RUST_LOG` is honoured. Debug mode can also be forced with `CONDUCTOR_DEBUG=1`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable that forces debug logging.
pub const DEBUG_ENV: &str = "CONDUCTOR_DEBUG";

/// Initialize logging with the default filter.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_debug(debug: bool) {
    let filter = build_filter(debug || env_debug());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn build_filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("conductor=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conductor=info,warn"))
    }
}
