//! Structured logging and tracing for the tessera client.
//!
//! Provides structured, span-based, filterable logging via the `tracing` ecosystem.
//! Supports console output with uptime timestamps and module paths, plus JSON file
//! logging in debug builds for post-mortem analysis. The log level comes from the
//! configuration unless `RUST_LOG` overrides it.
//!
//! [`init_logging`] installs the subscriber process-wide. [`build_dispatch`]
//! returns the same subscriber as a [`Dispatch`] so a caller can scope it to
//! one component, or one test, with [`tracing::dispatcher::with_default`].

use std::path::Path;

use tessera_config::Config;
use tracing::Dispatch;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

/// Initialize the global tracing subscriber.
///
/// Sets up structured logging with:
/// - Console output with uptime, module paths, and severity levels
/// - JSON file logging to `log_dir/tessera.log` in debug builds
/// - Environment-based filtering (respects RUST_LOG)
/// - Integration with the config `debug.log_level` setting
///
/// Returns `false` if a global subscriber was already installed.
///
/// # Examples
///
/// ```no_run
/// use tessera_log::init_logging;
/// use tessera_config::Config;
///
/// // Basic initialization
/// init_logging(None, false, None);
///
/// // With file logging in debug mode
/// let log_dir = std::path::Path::new("./logs");
/// init_logging(Some(log_dir), true, Some(&Config::default()));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) -> bool {
    build_subscriber(log_dir, debug_build, config)
        .try_init()
        .is_ok()
}

/// Build the subscriber [`init_logging`] would install, without installing it.
pub fn build_dispatch(
    log_dir: Option<&Path>,
    debug_build: bool,
    config: Option<&Config>,
) -> Dispatch {
    Dispatch::new(build_subscriber(log_dir, debug_build, config))
}

/// Create an `EnvFilter` with the default filter string.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

fn filter_string(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.is_empty() => config.debug.log_level.clone(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

fn build_subscriber(
    log_dir: Option<&Path>,
    debug_build: bool,
    config: Option<&Config>,
) -> Box<dyn tracing::Subscriber + Send + Sync> {
    // Base filter from config, overridable via RUST_LOG env var
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_string(config)));

    // Console layer: human-readable format with timestamps
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true) // The dispatch loop runs on runtime worker threads
        .with_level(true)
        .with_timer(fmt::time::uptime());

    // In debug builds, also log to a file for post-mortem analysis
    let file_layer = if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join("tessera.log"))
    {
        Some(
            fmt::layer()
                .with_writer(log_file)
                .with_ansi(false)
                .with_target(true)
                .with_timer(fmt::time::uptime())
                .json(),
        )
    } else {
        None
    };

    Box::new(
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer),
    )
}
