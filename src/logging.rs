use std::path::Path;
use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Target used by every log line emitted from the capture pipeline.
pub const LOG_TARGET: &str = "recorder";

/// Guards that must be kept alive to ensure logs are flushed
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    Directory(#[from] std::io::Error),
    #[error("A global tracing subscriber is already installed")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Routes pipeline events to `recorder.log` and everything else to `host.log`.
struct TargetWriter {
    recorder_writer: NonBlocking,
    host_writer: NonBlocking,
}

impl<'a> MakeWriter<'a> for TargetWriter {
    type Writer = Box<dyn std::io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        Box::new(self.host_writer.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        let target = meta.target();
        if target == LOG_TARGET || target.starts_with("glrecorder_lib") {
            return Box::new(self.recorder_writer.clone());
        }
        Box::new(self.host_writer.clone())
    }
}

/// Installs a global subscriber writing daily-rotated logs into `log_dir`.
///
/// Optional for hosts that already configure `tracing` themselves. The level
/// comes from `RUST_LOG` and defaults to `info`.
pub fn init_logging(log_dir: &Path) -> Result<LoggingGuards, LoggingError> {
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    let recorder_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "recorder.log");
    let (recorder_writer, recorder_guard) = tracing_appender::non_blocking(recorder_appender);

    let host_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "host.log");
    let (host_writer, host_guard) = tracing_appender::non_blocking(host_appender);

    let writer = TargetWriter {
        recorder_writer,
        host_writer,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true),
    );

    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!(target: LOG_TARGET, "Logging initialized at {:?}", log_dir);

    Ok(LoggingGuards {
        _guards: vec![recorder_guard, host_guard],
    })
}
