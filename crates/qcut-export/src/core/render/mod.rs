//! Render Pipeline Module
//!
//! Mode selection, encoder orchestration and the export entry points.
//!
//! # Modules
//!
//! - `mode`: timeline analysis and export strategy selection
//! - `export`: encoder arguments and process supervision
//! - `frames`: per-frame effect processing
//! - `progress`: progress parsing and throttled reporting
//! - `pipeline`: end-to-end export driver

mod export;
mod frames;
mod mode;
mod pipeline;
mod progress;

pub use export::*;
pub use frames::{
    collect_frame_effect_windows, frame_chain_at, frame_name, frame_pattern, raw_frame_name,
    raw_frame_pattern, FilteredFrame, FrameEffectProcessor, FrameEffectWindow,
    FrameProcessingReport, FrameRequest,
};
pub use mode::{analyze_timeline, select_export_mode, ExportMode, TimelineAnalysis, TimelineFeatures};
pub use pipeline::{export_timeline, run_export, ExportOptions, ExportResult};
pub use progress::{
    encoder_fraction, is_progress_block_end, parse_ffmpeg_progress_line, parse_stderr_stats_line,
    EncoderProgress, ExportProgress, ExportStage, FFmpegProgressData, ProgressReporter, StderrTail,
};
