//! Logging bootstrap shared by the daemon binary and tests.
//!
//! Output always goes to stderr: the daemon's stdout carries the control
//! protocol and must stay clean.

use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_filter` (e.g. `"conductor_daemon=info"`).
/// With `log_json` every event is one JSON object per line. Returns `false`
/// when a global subscriber was already installed.
pub fn init_tracing(default_filter: &str, log_json: bool) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json = log_json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let plain = (!log_json).then(|| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init()
        .is_ok()
}
