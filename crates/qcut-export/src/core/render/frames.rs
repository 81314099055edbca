//! Frame Effect Processor
//!
//! Applies time-varying effect chains to rendered frames one at a time.
//! Frames are processed strictly in index order. A frame whose filter fails is
//! replaced by a copy of its unfiltered input and the export continues.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::export::{CancelHandle, EncoderInvoker, EncoderJob};
use super::progress::EncoderProgress;
use crate::core::effects::{build_frame_chain, needs_frame_processing, Effect};
use crate::core::fs::validate_path_id_component;
use crate::core::sources::VideoSourceInput;
use crate::core::{CoreResult, ExportError, FrameFilterFailure, TimeSec, TIME_EPSILON};

const RAW_PREFIX: &str = "raw_";
const FRAME_PREFIX: &str = "frame-";
const FRAME_EXT: &str = ".png";

/// `frame-0001.png` for index 1.
pub fn frame_name(index: u64) -> String {
    format!("{FRAME_PREFIX}{index:04}{FRAME_EXT}")
}

/// `raw_frame-0001.png` for index 1.
pub fn raw_frame_name(index: u64) -> String {
    format!("{RAW_PREFIX}{}", frame_name(index))
}

/// Encoder image-sequence pattern for processed frames
pub fn frame_pattern() -> String {
    format!("{FRAME_PREFIX}%04d{FRAME_EXT}")
}

/// Encoder image-sequence pattern for raw frames
pub fn raw_frame_pattern() -> String {
    format!("{RAW_PREFIX}{}", frame_pattern())
}

fn parse_raw_frame_index(name: &str) -> Option<u64> {
    name.strip_prefix(RAW_PREFIX)?
        .strip_prefix(FRAME_PREFIX)?
        .strip_suffix(FRAME_EXT)?
        .parse()
        .ok()
}

/// One per-frame filter invocation
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRequest {
    pub session_id: String,
    pub input_frame_name: String,
    pub output_frame_name: String,
    pub filter_chain: String,
}

/// Written frame and whether the filter was actually applied
#[derive(Clone, Debug, PartialEq)]
pub struct FilteredFrame {
    pub output_path: PathBuf,
    pub filtered: bool,
}

/// Timeline window during which an element's time-varying effects apply
#[derive(Clone, Debug)]
pub struct FrameEffectWindow {
    pub element_id: String,
    pub start: TimeSec,
    pub end: TimeSec,
    pub effects: Vec<Effect>,
}

/// Windows for every source carrying time-varying effects, in source order.
pub fn collect_frame_effect_windows(videos: &[VideoSourceInput]) -> Vec<FrameEffectWindow> {
    videos
        .iter()
        .filter(|v| needs_frame_processing(&v.effects))
        .map(|v| FrameEffectWindow {
            element_id: v.element_id.clone(),
            start: v.start_time,
            end: v.end_time(),
            effects: v.effects.clone(),
        })
        .collect()
}

/// Chain for the frame at timeline time `t`, joining every active window.
///
/// Keyframes are evaluated at the offset from the element start.
pub fn frame_chain_at(windows: &[FrameEffectWindow], t: TimeSec, frame_index: u64) -> Option<String> {
    let chains: Vec<String> = windows
        .iter()
        .filter(|w| t + TIME_EPSILON >= w.start && t < w.end)
        .filter_map(|w| build_frame_chain(&w.effects, (t - w.start).max(0.0), frame_index))
        .collect();
    if chains.is_empty() {
        None
    } else {
        Some(chains.join(","))
    }
}

/// Summary of one processing pass
#[derive(Clone, Debug, Default)]
pub struct FrameProcessingReport {
    pub processed: u64,
    pub filtered: u64,
    pub fallbacks: Vec<FrameFilterFailure>,
}

/// Runs per-frame filters inside one session's frames directory
pub struct FrameEffectProcessor<'a, E: EncoderInvoker + ?Sized> {
    invoker: &'a E,
    session_id: String,
    frames_dir: PathBuf,
    fps: f64,
    frame_timeout: Duration,
    stderr_tail_lines: usize,
    cancel: CancelHandle,
}

impl<'a, E: EncoderInvoker + ?Sized> FrameEffectProcessor<'a, E> {
    pub fn new(
        invoker: &'a E,
        session_id: impl Into<String>,
        frames_dir: impl Into<PathBuf>,
        fps: f64,
        frame_timeout: Duration,
        stderr_tail_lines: usize,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            invoker,
            session_id: session_id.into(),
            frames_dir: frames_dir.into(),
            fps,
            frame_timeout,
            stderr_tail_lines,
            cancel,
        }
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    /// Applies `request.filter_chain` to a single frame.
    ///
    /// An empty chain copies the input unchanged.
    pub async fn process_frame(
        &self,
        request: &FrameRequest,
    ) -> Result<FilteredFrame, FrameFilterFailure> {
        let fail = |reason: String| FrameFilterFailure::new(&request.output_frame_name, reason);

        if request.session_id != self.session_id {
            return Err(fail(format!("unknown session {}", request.session_id)));
        }
        validate_path_id_component(&request.input_frame_name, "inputFrameName").map_err(fail)?;
        validate_path_id_component(&request.output_frame_name, "outputFrameName").map_err(fail)?;
        if request.input_frame_name == request.output_frame_name {
            return Err(fail("input and output frame are the same file".to_string()));
        }

        let input = self.frames_dir.join(&request.input_frame_name);
        let output = self.frames_dir.join(&request.output_frame_name);
        if !tokio::fs::try_exists(&input).await.unwrap_or(false) {
            return Err(fail(format!("input frame not found: {}", input.display())));
        }

        let chain = request.filter_chain.trim();
        if chain.is_empty() {
            tokio::fs::copy(&input, &output)
                .await
                .map_err(|e| fail(format!("copy failed: {e}")))?;
            return Ok(FilteredFrame {
                output_path: output,
                filtered: false,
            });
        }

        let args: Vec<String> = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vf".to_string(),
            chain.to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-update".to_string(),
            "1".to_string(),
            output.to_string_lossy().to_string(),
        ];
        let job = EncoderJob::new(args, self.frame_timeout, self.stderr_tail_lines);
        self.invoker
            .run(job, self.cancel.clone(), None)
            .await
            .map_err(|e| fail(e.to_string()))?;

        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => Ok(FilteredFrame {
                output_path: output,
                filtered: true,
            }),
            Ok(_) => Err(fail("filter produced an empty frame".to_string())),
            Err(e) => Err(fail(format!("filter produced no frame: {e}"))),
        }
    }

    /// Raw frame indices present in the frames directory, ascending.
    pub async fn list_raw_frames(&self) -> CoreResult<Vec<u64>> {
        let mut indices = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.frames_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(index) = entry.file_name().to_str().and_then(parse_raw_frame_index) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Produces `frame-N.png` for every `raw_frame-N.png`.
    ///
    /// Frames outside every effect window are copied. Failed frames fall back
    /// to the raw frame. Only cancellation and I/O errors abort the pass.
    pub async fn process_all(
        &self,
        windows: &[FrameEffectWindow],
        progress: Option<&mpsc::Sender<EncoderProgress>>,
    ) -> CoreResult<FrameProcessingReport> {
        let indices = self.list_raw_frames().await?;
        info!(
            session_id = %self.session_id,
            frames = indices.len(),
            windows = windows.len(),
            "Processing frame effects"
        );

        let mut report = FrameProcessingReport::default();
        for index in indices {
            if self.cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }

            let t = (index.saturating_sub(1)) as f64 / self.fps;
            let request = FrameRequest {
                session_id: self.session_id.clone(),
                input_frame_name: raw_frame_name(index),
                output_frame_name: frame_name(index),
                filter_chain: frame_chain_at(windows, t, index).unwrap_or_default(),
            };

            match self.process_frame(&request).await {
                Ok(frame) => {
                    if frame.filtered {
                        report.filtered += 1;
                    }
                }
                Err(failure) => {
                    if self.cancel.is_cancelled() {
                        return Err(ExportError::Cancelled);
                    }
                    warn!(
                        frame = %failure.frame_name,
                        reason = %failure.reason,
                        "Frame filter failed, keeping unfiltered frame"
                    );
                    tokio::fs::copy(
                        self.frames_dir.join(&request.input_frame_name),
                        self.frames_dir.join(&request.output_frame_name),
                    )
                    .await?;
                    report.fallbacks.push(failure);
                }
            }

            report.processed += 1;
            if let Some(tx) = progress {
                let _ = tx.try_send(EncoderProgress {
                    frames_done: report.processed,
                    elapsed_seconds: 0.0,
                });
            }
        }

        debug!(
            processed = report.processed,
            filtered = report.filtered,
            fallbacks = report.fallbacks.len(),
            "Frame effects done"
        );
        Ok(report)
    }
}
