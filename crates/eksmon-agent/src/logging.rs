use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Console plus append-only file logging. `RUST_LOG` still applies; the
/// configured level is added for the `eksmon` crates.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(level: &str, log_file: &Path) -> Result<WorkerGuard> {
    let file_name = log_file
        .file_name()
        .ok_or_else(|| anyhow!("log file {} has no file name", log_file.display()))?;
    let directory = match log_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory)
        .with_context(|| format!("creating log directory {}", directory.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("eksmon={}", level.to_lowercase()).parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}
