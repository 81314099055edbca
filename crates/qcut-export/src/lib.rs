//! QCut Export Library
//!
//! Turns an edited timeline (video/image clips, audio, text, stickers and
//! effects) into a single encoded video file using an external FFmpeg.
//!
//! The entry point is [`export_timeline`]; [`run_export`] accepts any
//! [`EncoderInvoker`] for hosts that supervise the encoder themselves.

pub mod core;

use std::path::Path;
use std::sync::OnceLock;

pub use crate::core::render::{
    export_timeline, run_export, CancelHandle, EncoderInvoker, ExportMode, ExportOptions,
    ExportProgress, ExportResult, ExportStage,
};
pub use crate::core::settings::ExportConfig;
pub use crate::core::{CoreResult, ExportError};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Installs the global tracing subscriber.
///
/// Logs go to stdout and, when `log_dir` is given, to a daily rolling file.
/// `RUST_LOG` overrides the default `info` level. Calling it again is a no-op.
pub fn init_logging(log_dir: Option<&Path>) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = log_dir.and_then(|dir| {
        // Best effort: without a directory only stdout logging is installed
        std::fs::create_dir_all(dir).ok()?;
        let file_appender = tracing_appender::rolling::daily(dir, "qcut-export.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // A guard already held means logging was initialized before
        LOG_GUARD.set(guard).ok()?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);

    // Avoid panics if already initialized (tests, embedding hosts).
    let _ = tracing::subscriber::set_global_default(subscriber);
}
