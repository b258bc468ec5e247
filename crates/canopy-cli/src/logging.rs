//! Log setup for the `canopy` binary
//!
//! `RUST_LOG` takes precedence over the `[logging]` table:
//! ```bash
//! RUST_LOG=canopy_watcher=debug canopy watch .
//! ```

use anyhow::{Context, Result};
use canopy_core::{LogTarget, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

fn filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let mut directives = config.filter_directives();
    if verbose {
        directives.push_str(",canopy_watcher=debug");
    }
    EnvFilter::new(directives)
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process so buffered file output gets flushed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<Option<WorkerGuard>> {
    let filter = filter(config, verbose);

    match &config.target {
        LogTarget::Disable => Ok(None),
        LogTarget::Stderr => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_timer(CompactTime)
                .with_writer(std::io::stderr)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).init();
            Ok(None)
        }
        LogTarget::Stdout => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_timer(CompactTime)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).init();
            Ok(None)
        }
        LogTarget::File(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log target {} has no file name", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_timer(CompactTime)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).init();
            Ok(Some(guard))
        }
    }
}
