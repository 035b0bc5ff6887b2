//! File logging bootstrap for applications embedding the store.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming the log file.
pub const LOG_ENV: &str = "MINISTORE_LOG";

const DEFAULT_FILTER: &str = "info";

/// Initialize tracing when `MINISTORE_LOG` names a file path.
///
/// Returns whether a subscriber was installed.
pub fn init_tracing() -> bool {
    match std::env::var(LOG_ENV) {
        Ok(base) => init_file_logging(&base),
        Err(_) => false,
    }
}

/// Log to a fresh file derived from `base`, filtered by `RUST_LOG`
/// (default `info`).
///
/// A global subscriber that is already set is left alone.
pub fn init_file_logging(base: &str) -> bool {
    let path = unique_log_path(base, SystemTime::now(), std::process::id());
    let file = match File::create(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("ministore: cannot create log file {}: {e}", path.display());
            return false;
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .is_ok()
}

/// `{base}.{unix seconds}.{pid}`, so concurrent processes never share a file.
fn unique_log_path(base: &str, at: SystemTime, pid: u32) -> PathBuf {
    let secs = at.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    PathBuf::from(format!("{base}.{secs}.{pid}"))
}
