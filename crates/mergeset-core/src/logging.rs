use std::path::{Path, PathBuf};
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE: &str = "mergeset.log";

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE)
}

/// Log to stdout and to `<log_dir>/mergeset.log`.
///
/// `RUST_LOG` overrides the `info` default. Keep the returned guard alive
/// until the run ends or buffered file output is lost.
pub fn init_logging(
    log_dir: &Path,
) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (file_writer, guard) = tracing_appender::non_blocking(rolling::never(log_dir, LOG_FILE));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .try_init()?;

    Ok(guard)
}
