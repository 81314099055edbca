//! FFmpeg Integration Module
//!
//! Locates the encoder binaries, probes media and describes encoder inputs.
//! Process supervision for exports lives in `render::export`.

mod detection;
mod runner;

use std::path::{Path, PathBuf};

pub use detection::*;
pub use runner::{AudioStreamInfo, FFmpegRunner, MediaInfo, VideoStreamInfo};

use crate::core::ExportError;

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Install FFmpeg or set QCUT_FFMPEG_PATH.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;

impl From<FFmpegError> for ExportError {
    fn from(err: FFmpegError) -> Self {
        match err {
            FFmpegError::NotFound => ExportError::EncoderUnavailable(err.to_string()),
            FFmpegError::ProcessError(io) => {
                ExportError::EncoderUnavailable(format!("failed to start encoder: {io}"))
            }
            FFmpegError::Timeout => ExportError::EncoderTimeout { seconds: 0 },
            other => ExportError::EncoderProcessFailure {
                exit_code: None,
                stderr_tail: other.to_string(),
            },
        }
    }
}

/// One `-i` input with the options that precede it
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderInput {
    /// Options placed before `-i` (`-ss`, `-t`, `-loop`, `-f`, ...)
    pub pre_input_args: Vec<String>,
    pub path: PathBuf,
}

impl EncoderInput {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            pre_input_args: Vec::new(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn with_pre_input_args(mut self, args: Vec<String>) -> Self {
        self.pre_input_args = args;
        self
    }

    /// `[pre_input_args..., "-i", path]`
    pub fn to_args(&self) -> Vec<String> {
        let mut args = self.pre_input_args.clone();
        args.push("-i".to_string());
        args.push(self.path.to_string_lossy().to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_error_display() {
        let err = FFmpegError::NotFound;
        assert!(err.to_string().contains("FFmpeg not found"));

        let err = FFmpegError::ExecutionFailed("exit code 1".to_string());
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_not_found_maps_to_encoder_unavailable() {
        let err: ExportError = FFmpegError::NotFound.into();
        assert_eq!(err.kind(), "EncoderUnavailable");

        let err: ExportError = FFmpegError::ProbeError("bad".to_string()).into();
        assert_eq!(err.kind(), "EncoderProcessFailure");
    }

    #[test]
    fn test_encoder_input_args() {
        let input = EncoderInput::new("/media/a.mp4")
            .with_pre_input_args(vec!["-ss".to_string(), "1.000".to_string()]);
        assert_eq!(input.to_args(), vec!["-ss", "1.000", "-i", "/media/a.mp4"]);
        assert_eq!(EncoderInput::new("/x.png").to_args(), vec!["-i", "/x.png"]);
    }
}
