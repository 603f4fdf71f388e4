/*!
 * Logging setup
 *
 * Human-readable lines go to stdout. With `--log <FILE>` the same events
 * are written as JSON instead, and each file's `upload` span is closed
 * with its timing, so one record per file carries key, size and duration.
 */

use std::fs::File;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::UploadConfig;
use crate::error::{Result, UploadError};

/// Resolve the effective log level; `verbose` forces debug
pub fn effective_level(config: &UploadConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

/// `RUST_LOG` if set, otherwise this crate at `level`
fn filter_for(level: Level) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("s3push={}", level)))
        .map_err(|e| UploadError::Config(format!("invalid log filter: {}", e)))
}

/// Install the global subscriber for the CLI
pub fn init_logging(config: &UploadConfig) -> Result<()> {
    let filter = filter_for(effective_level(config))?;

    let json_layer = match config.log_file {
        Some(ref path) => {
            let file = File::create(path).map_err(|e| {
                UploadError::Config(format!("cannot create log file {}: {}", path.display(), e))
            })?;
            Some(
                fmt::layer()
                    .json()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
        }
        None => None,
    };

    let stdout_layer = json_layer
        .is_none()
        .then(|| fmt::layer().compact().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| UploadError::Config(format!("logging already initialized: {}", e)))
}

/// Route test output through the test harness; safe to call from every test
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("s3push=debug")))
        .with(fmt::layer().with_test_writer().compact())
        .try_init();
}
