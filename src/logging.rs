use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogConfig;

const DEFAULT_FILTER: &str = "v1backlog=info";

/// Install the global subscriber: stderr always, plus a log file if configured.
///
/// `RUST_LOG` overrides the default filter. Keep the returned guard alive
/// for the life of the process so buffered file output gets flushed.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
  let stderr = fmt::layer().with_writer(std::io::stderr);

  let Some(path) = &config.file else {
    tracing_subscriber::registry()
      .with(filter)
      .with(stderr)
      .try_init()?;
    return Ok(None);
  };

  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("log.file has no file name: {}", path.display()))?;
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
  tracing_subscriber::registry()
    .with(filter)
    .with(stderr)
    .with(fmt::layer().with_ansi(false).with_writer(writer))
    .try_init()?;

  Ok(Some(guard))
}
