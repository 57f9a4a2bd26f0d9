//! Tracing initialisation for buildfleet binaries.
//!
//! Call [`init_tracing`] once at program start. Subsequent calls are
//! silently ignored, since the global subscriber can only be installed
//! once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `level` is the default verbosity when `RUST_LOG` is not set; the env
/// var always wins for fine-grained filtering. With `json`, log lines are
/// newline-delimited JSON for aggregation pipelines; cron-driven pollers
/// usually want this, interactive use does not.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
