//! Tracing subscriber setup for the CLI.
//!
//! Log lines go to stderr, or to a file through `tracing-appender` when a
//! log file is given. `RUST_LOG` directives take precedence over the level
//! picked by `--debug`.

use std::path::{Path, PathBuf};

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{Error, Result};

/// Logging flags from the command line.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub debug: bool,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl LogOptions {
    /// Level used when `RUST_LOG` does not say otherwise.
    pub fn level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held
/// until the program exits.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::builder()
        .with_default_directive(options.level().into())
        .from_env_lossy();

    let (writer, guard) = match &options.file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if options.json {
        registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(options.file.is_none())
                    .with_target(false)
                    .with_writer(writer),
            )
            .try_init()
    };
    installed.map_err(|e| Error::Config(format!("Failed to set logger: {}", e)))?;
    Ok(guard)
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("log file has no file name: {}", path.display())))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(name)))
}
