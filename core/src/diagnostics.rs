//! Logging setup for the `modernize` binary and for tests.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _, fmt};

/// Name of the log file written into the output directory.
pub const LOG_FILE_NAME: &str = "modernize.log";

/// Installs the global tracing subscriber.
///
/// Console output is filtered by `filter` (an `EnvFilter` directive such as `info` or
/// `llm_translation=debug`). If `log_file` is given, the same events are also appended to that
/// file without ANSI colouring. Calling this again after a subscriber is installed does nothing.
pub fn init_logging(filter: &str, log_file: Option<&Path>) -> io::Result<()> {
    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(EnvFilter::new(filter));
    let file_layer = match log_file {
        None => None,
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::options().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(EnvFilter::new(filter)),
            )
        }
    };
    // try_init fails only when a global subscriber already exists.
    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::tempdir;

    #[test]
    fn repeated_init_is_harmless() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("logs").join(LOG_FILE_NAME);
        init_logging("info", Some(&log)).unwrap();
        init_logging("debug", None).unwrap();
        assert!(log.exists());
    }
}
