//! Logging for the job sync client.
//!
//! The `log_*!` macros format eagerly and hand the line to [`emit`], which
//! forwards it to `tracing` under the `jobsync` target. Embedders install
//! their own subscriber; the `jobsync-watch` binary uses [`init`].

pub use tracing::Level;
use tracing_subscriber::EnvFilter;

#[doc(hidden)]
pub fn emit(level: Level, msg: &str) {
    if level == Level::ERROR {
        tracing::error!(target: "jobsync", "{}", msg);
    } else if level == Level::WARN {
        tracing::warn!(target: "jobsync", "{}", msg);
    } else if level == Level::INFO {
        tracing::info!(target: "jobsync", "{}", msg);
    } else {
        tracing::debug!(target: "jobsync", "{}", msg);
    }
}

/// Install a formatting subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when that is unset or invalid.
///
/// A subscriber that is already installed wins.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::INFO, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::ERROR, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::WARN, &format!($($arg)*))
    };
}

/// Debug-level; the `jobsync` target must be enabled to see these.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::DEBUG, &format!($($arg)*))
    };
}
