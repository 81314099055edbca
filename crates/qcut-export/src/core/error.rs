//! QCut Export Error Definitions
//!
//! Defines the export failure taxonomy. Only `SourceUnavailable` and
//! `FrameFilterFailure` are recovered locally; every other kind aborts the
//! export and cleans up its session.

use thiserror::Error;

use super::{ElementId, MediaId, SessionId};

/// Export engine error types
#[derive(Error, Debug)]
pub enum ExportError {
    // =========================================================================
    // Source Errors
    // =========================================================================
    #[error("Source unavailable for element {element_id} (media {media_id}): {reason}")]
    SourceUnavailable {
        element_id: ElementId,
        media_id: MediaId,
        reason: String,
    },

    // =========================================================================
    // Encoder Errors
    // =========================================================================
    #[error("Encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("Filter graph rejected by encoder: {message}\n{stderr_tail}")]
    FilterSyntaxError {
        message: String,
        stderr_tail: String,
    },

    #[error("Encoder exited with {}: {stderr_tail}", describe_exit(.exit_code))]
    EncoderProcessFailure {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Encoder timed out after {seconds} seconds")]
    EncoderTimeout { seconds: u64 },

    #[error("Export cancelled")]
    Cancelled,

    // =========================================================================
    // Session / Options Errors
    // =========================================================================
    #[error("Invalid export options: {0}")]
    InvalidOptions(String),

    #[error("Session already in use: {0}")]
    SessionInUse(SessionId),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "signal".to_string(),
    }
}

/// Export engine result type
pub type CoreResult<T> = Result<T, ExportError>;

impl ExportError {
    /// Short machine-readable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::SourceUnavailable { .. } => "SourceUnavailable",
            ExportError::EncoderUnavailable(_) => "EncoderUnavailable",
            ExportError::FilterSyntaxError { .. } => "FilterSyntaxError",
            ExportError::EncoderProcessFailure { .. } => "EncoderProcessFailure",
            ExportError::EncoderTimeout { .. } => "EncoderTimeout",
            ExportError::Cancelled => "Cancelled",
            ExportError::InvalidOptions(_) => "InvalidOptions",
            ExportError::SessionInUse(_) => "SessionInUse",
            ExportError::IoError(_) => "IoError",
            ExportError::JsonError(_) => "JsonError",
        }
    }

    /// Whether this error is recovered locally instead of aborting the export
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExportError::SourceUnavailable { .. })
    }

    /// Single terminal message for the user: kind plus detail
    pub fn user_message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Failure to apply an effect chain to one frame.
///
/// Kept separate from [`ExportError`]: the frame processor degrades the frame to
/// its unfiltered copy instead of failing the export.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Frame filter failed for {frame_name}: {reason}")]
pub struct FrameFilterFailure {
    pub frame_name: String,
    pub reason: String,
}

impl FrameFilterFailure {
    pub fn new(frame_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            frame_name: frame_name.into(),
            reason: reason.into(),
        }
    }
}
