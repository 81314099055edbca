//! Encoder Orchestration
//!
//! Builds encoder argument lists for every export mode and supervises the
//! encoder process: progress parsing, bounded stderr capture, timeout and
//! cancellation. The [`EncoderInvoker`] trait is the seam between the export
//! pipeline and the real `ffmpeg` binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use super::progress::{
    is_progress_block_end, parse_ffmpeg_progress_line, parse_stderr_stats_line, EncoderProgress,
    FFmpegProgressData, StderrTail,
};
use crate::core::ffmpeg::{EncoderInput, FFmpegRunner};
use crate::core::filters::{format_rate, format_seconds, CompositionPlan, AUDIO_OUT, VIDEO_OUT};
use crate::core::process::tokio_command;
use crate::core::session::ExportContext;
use crate::core::settings::ExportConfig;
use crate::core::sources::VideoSourceInput;
use crate::core::text::escape_concat_path;
use crate::core::timeline::VideoProfile;
use crate::core::{CoreResult, ExportError};

/// Output sample rate for every re-encoded audio stream
const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Stderr fragments that identify a rejected filter graph
const FILTER_ERROR_MARKERS: &[&str] = &[
    "Error parsing filterchain",
    "Error parsing a filter description",
    "Error initializing complex filters",
    "Error initializing filters",
    "Error reinitializing filters",
    "Failed to configure",
    "No such filter",
    "Undefined constant or missing",
    "Invalid stream specifier",
    "matches no streams",
    "Unable to parse option value",
];

// =============================================================================
// Cancellation
// =============================================================================

/// Shared cancellation flag for one export
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests cancellation. The running encoder is killed.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `changed` only errors if it is dropped.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Encoder Invocation
// =============================================================================

/// One encoder invocation
#[derive(Clone, Debug)]
pub struct EncoderJob {
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Whether the arguments carry a filter graph (`-filter_complex`/`-vf`)
    pub has_filter_graph: bool,
    pub stderr_tail_lines: usize,
}

impl EncoderJob {
    pub fn new(args: Vec<String>, timeout: Duration, stderr_tail_lines: usize) -> Self {
        let has_filter_graph = args
            .iter()
            .any(|a| a == "-filter_complex" || a == "-vf" || a == "-af");
        Self {
            args,
            timeout,
            has_filter_graph,
            stderr_tail_lines,
        }
    }
}

/// Result of a successful invocation
#[derive(Clone, Debug, Default)]
pub struct EncoderOutcome {
    pub stderr_tail: String,
    pub last_progress: EncoderProgress,
}

/// Runs the external encoder
#[async_trait]
pub trait EncoderInvoker: Send + Sync {
    /// Runs one job to completion, forwarding progress when a sender is given.
    ///
    /// Fails with `EncoderTimeout` or `Cancelled` after killing the process, and
    /// with `FilterSyntaxError`/`EncoderProcessFailure` on a non-zero exit.
    async fn run(
        &self,
        job: EncoderJob,
        cancel: CancelHandle,
        progress: Option<mpsc::Sender<EncoderProgress>>,
    ) -> CoreResult<EncoderOutcome>;

    /// Profile of a media file, when it can be determined.
    async fn probe_profile(&self, _path: &Path) -> Option<VideoProfile> {
        None
    }
}

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl EncoderInvoker for FFmpegRunner {
    async fn run(
        &self,
        job: EncoderJob,
        cancel: CancelHandle,
        progress: Option<mpsc::Sender<EncoderProgress>>,
    ) -> CoreResult<EncoderOutcome> {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        debug!(args = ?job.args, "Spawning encoder");

        let mut cmd = tokio_command(self.ffmpeg_path());
        cmd.args(&job.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            ExportError::EncoderUnavailable(format!(
                "failed to spawn {}: {}",
                self.ffmpeg_path().display(),
                e
            ))
        })?;

        // Drain stderr concurrently so a full pipe never blocks the encoder.
        let tail_lines = job.stderr_tail_lines;
        let stderr_progress = progress.clone();
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = StderrTail::new(tail_lines);
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    // Stats lines are separated by carriage returns
                    for segment in String::from_utf8_lossy(&buf).split('\r') {
                        if let Some(update) = parse_stderr_stats_line(segment) {
                            if let Some(tx) = &stderr_progress {
                                let _ = tx.try_send(update);
                            }
                            continue;
                        }
                        tail.push(segment);
                    }
                }
                tail.render()
            })
        });

        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut data = FFmpegProgressData::default();
                let mut last = EncoderProgress::default();
                while let Ok(Some(line)) = lines.next_line().await {
                    if parse_ffmpeg_progress_line(&line, &mut data) && is_progress_block_end(&line)
                    {
                        last = data.to_encoder_progress();
                        if let Some(tx) = &progress {
                            // Keep draining stdout even when nobody reads
                            let _ = tx.try_send(last);
                        }
                    }
                }
                last
            })
        });

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = tokio::time::sleep(job.timeout) => WaitOutcome::TimedOut,
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        };

        if !matches!(outcome, WaitOutcome::Exited(_)) {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill encoder process");
            }
        }

        let stderr_tail = match stderr_task {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let last_progress = match stdout_task {
            Some(handle) => handle.await.unwrap_or_default(),
            None => EncoderProgress::default(),
        };

        match outcome {
            WaitOutcome::Exited(Ok(status)) if status.success() => Ok(EncoderOutcome {
                stderr_tail,
                last_progress,
            }),
            WaitOutcome::Exited(Ok(status)) => {
                let err = classify_encoder_failure(status.code(), stderr_tail, job.has_filter_graph);
                error!(kind = err.kind(), "Encoder failed");
                Err(err)
            }
            WaitOutcome::Exited(Err(e)) => Err(ExportError::IoError(e)),
            WaitOutcome::TimedOut => {
                error!(seconds = job.timeout.as_secs(), "Encoder timed out");
                Err(ExportError::EncoderTimeout {
                    seconds: job.timeout.as_secs(),
                })
            }
            WaitOutcome::Cancelled => Err(ExportError::Cancelled),
        }
    }

    async fn probe_profile(&self, path: &Path) -> Option<VideoProfile> {
        match self.probe(path).await {
            Ok(info) => info.video_profile(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Probe failed, profile unknown");
                None
            }
        }
    }
}

/// Maps a non-zero exit to the matching error kind.
pub fn classify_encoder_failure(
    exit_code: Option<i32>,
    stderr_tail: String,
    has_filter_graph: bool,
) -> ExportError {
    if has_filter_graph {
        let marker_line = stderr_tail
            .lines()
            .find(|line| FILTER_ERROR_MARKERS.iter().any(|m| line.contains(m)));
        if let Some(line) = marker_line {
            return ExportError::FilterSyntaxError {
                message: line.trim().to_string(),
                stderr_tail,
            };
        }
    }
    ExportError::EncoderProcessFailure {
        exit_code,
        stderr_tail,
    }
}

// =============================================================================
// Argument Builders
// =============================================================================

/// `-stats` keeps the stderr stats line even at `-loglevel error`.
fn base_args() -> Vec<String> {
    ["-y", "-hide_banner", "-stats", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn push_all(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

/// Muxer for the output path (the partial path hides the real extension).
fn container_format(output: &Path) -> &'static str {
    match output
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("mov") => "mov",
        _ => "mp4",
    }
}

fn video_codec_args(ctx: &ExportContext, config: &ExportConfig) -> Vec<String> {
    vec![
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        ctx.quality.encoder_preset().to_string(),
        "-crf".to_string(),
        ctx.quality.crf().to_string(),
        "-pix_fmt".to_string(),
        config.encoder.pixel_format.clone(),
        "-r".to_string(),
        format_rate(ctx.fps),
    ]
}

fn audio_codec_args(config: &ExportConfig) -> Vec<String> {
    vec![
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        config.encoder.audio_bitrate.clone(),
        "-ar".to_string(),
        AUDIO_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        "2".to_string(),
    ]
}

/// `-t`, container options, progress pipe and the output path.
fn output_args(duration: f64, output: &Path, final_output: &Path) -> Vec<String> {
    vec![
        "-t".to_string(),
        format_seconds(duration),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        container_format(final_output).to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Stream copy of a single source. No filter graph.
pub fn build_direct_copy_args(
    source: &VideoSourceInput,
    ctx: &ExportContext,
    output: &Path,
    final_output: &Path,
) -> Vec<String> {
    let duration = source.effective_duration().min(ctx.duration);
    let mut args = base_args();
    args.extend(
        EncoderInput::new(&source.path)
            .with_pre_input_args(vec!["-ss".to_string(), format_seconds(source.trim_start)])
            .to_args(),
    );
    push_all(&mut args, &["-map", "0:v:0", "-map", "0:a:0?", "-c", "copy"]);
    args.extend(output_args(duration, output, final_output));
    args
}

/// Single encode over the composition graph.
pub fn build_composition_args(
    plan: &CompositionPlan,
    ctx: &ExportContext,
    config: &ExportConfig,
    output: &Path,
    final_output: &Path,
) -> Vec<String> {
    let mut args = base_args();
    args.extend(plan.input_args());
    args.push("-filter_complex".to_string());
    args.push(plan.filter_graph.clone());
    args.push("-map".to_string());
    args.push(format!("[{VIDEO_OUT}]"));
    if plan.audio_mapped {
        args.push("-map".to_string());
        args.push(format!("[{AUDIO_OUT}]"));
    }
    args.extend(video_codec_args(ctx, config));
    if plan.audio_mapped {
        args.extend(audio_codec_args(config));
    }
    args.extend(output_args(ctx.duration, output, final_output));
    args
}

/// Re-encodes one source to the target profile for concatenation.
///
/// Sources without audio get a silent track so every segment shares one
/// stream layout.
pub fn build_normalize_args(
    source: &VideoSourceInput,
    ctx: &ExportContext,
    config: &ExportConfig,
    output: &Path,
) -> Vec<String> {
    let duration = source.effective_duration();
    let (w, h) = (ctx.canvas.width, ctx.canvas.height);
    let mut args = base_args();
    args.extend(
        EncoderInput::new(&source.path)
            .with_pre_input_args(vec![
                "-ss".to_string(),
                format_seconds(source.trim_start),
                "-t".to_string(),
                format_seconds(duration),
            ])
            .to_args(),
    );

    let audio_map = if source.contributes_audio() {
        "0:a:0".to_string()
    } else {
        args.extend(
            EncoderInput::new(format!(
                "anullsrc=channel_layout=stereo:sample_rate={AUDIO_SAMPLE_RATE}"
            ))
            .with_pre_input_args(vec![
                "-f".to_string(),
                "lavfi".to_string(),
                "-t".to_string(),
                format_seconds(duration),
            ])
            .to_args(),
        );
        "1:a:0".to_string()
    };

    args.push("-vf".to_string());
    args.push(format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={}",
        format_rate(ctx.fps)
    ));
    if (source.volume - 1.0).abs() > 1e-6 && source.contributes_audio() {
        args.push("-af".to_string());
        args.push(format!("volume={:.3}", source.volume));
    }
    push_all(&mut args, &["-map", "0:v:0", "-map"]);
    args.push(audio_map);
    args.extend(video_codec_args(ctx, config));
    args.extend(audio_codec_args(config));
    push_all(&mut args, &["-t"]);
    args.push(format_seconds(duration));
    push_all(&mut args, &["-f", "mp4", "-progress", "pipe:1"]);
    args.push(output.to_string_lossy().to_string());
    args
}

/// One entry of a concat-demuxer list
#[derive(Clone, Debug, PartialEq)]
pub struct ConcatEntry {
    pub path: PathBuf,
    pub inpoint: Option<f64>,
    pub outpoint: Option<f64>,
}

/// Renders an `ffconcat` list file.
pub fn render_concat_list(entries: &[ConcatEntry]) -> String {
    let mut list = String::from("ffconcat version 1.0\n");
    for entry in entries {
        list.push_str(&format!("file {}\n", escape_concat_path(&entry.path)));
        if let Some(inpoint) = entry.inpoint.filter(|v| *v > 0.0) {
            list.push_str(&format!("inpoint {}\n", format_seconds(inpoint)));
        }
        if let Some(outpoint) = entry.outpoint {
            list.push_str(&format!("outpoint {}\n", format_seconds(outpoint)));
        }
    }
    list
}

/// Stream-copy concatenation of a list file.
pub fn build_concat_args(
    list_path: &Path,
    ctx: &ExportContext,
    output: &Path,
    final_output: &Path,
) -> Vec<String> {
    let mut args = base_args();
    args.extend(
        EncoderInput::new(list_path)
            .with_pre_input_args(vec![
                "-f".to_string(),
                "concat".to_string(),
                "-safe".to_string(),
                "0".to_string(),
            ])
            .to_args(),
    );
    push_all(&mut args, &["-map", "0:v:0", "-map", "0:a:0?", "-c", "copy"]);
    args.extend(output_args(ctx.duration, output, final_output));
    args
}

/// Renders the composition to `raw_frame-%04d.png`, plus the mixed audio
/// track when the plan has one.
pub fn build_raw_frames_args(
    plan: &CompositionPlan,
    ctx: &ExportContext,
    config: &ExportConfig,
    raw_pattern: &Path,
    audio_path: Option<&Path>,
) -> Vec<String> {
    let mut args = base_args();
    args.extend(plan.input_args());
    args.push("-filter_complex".to_string());
    args.push(plan.filter_graph.clone());
    args.push("-map".to_string());
    args.push(format!("[{VIDEO_OUT}]"));
    push_all(&mut args, &["-t"]);
    args.push(format_seconds(ctx.duration));
    push_all(&mut args, &["-r"]);
    args.push(format_rate(ctx.fps));
    push_all(&mut args, &["-start_number", "1", "-f", "image2"]);
    args.push(raw_pattern.to_string_lossy().to_string());

    if let (true, Some(audio)) = (plan.audio_mapped, audio_path) {
        args.push("-map".to_string());
        args.push(format!("[{AUDIO_OUT}]"));
        args.extend(audio_codec_args(config));
        push_all(&mut args, &["-t"]);
        args.push(format_seconds(ctx.duration));
        push_all(&mut args, &["-f", "mp4"]);
        args.push(audio.to_string_lossy().to_string());
    }
    push_all(&mut args, &["-progress", "pipe:1"]);
    args
}

/// Encodes a `frame-%04d.png` sequence (plus optional audio) into the output.
pub fn build_frame_sequence_args(
    frame_pattern: &Path,
    audio_path: Option<&Path>,
    ctx: &ExportContext,
    config: &ExportConfig,
    output: &Path,
    final_output: &Path,
) -> Vec<String> {
    let mut args = base_args();
    args.extend(
        EncoderInput::new(frame_pattern)
            .with_pre_input_args(vec![
                "-framerate".to_string(),
                format_rate(ctx.fps),
                "-start_number".to_string(),
                "1".to_string(),
                "-f".to_string(),
                "image2".to_string(),
            ])
            .to_args(),
    );
    if let Some(audio) = audio_path {
        args.extend(EncoderInput::new(audio).to_args());
    }
    push_all(&mut args, &["-map", "0:v:0"]);
    if audio_path.is_some() {
        push_all(&mut args, &["-map", "1:a:0", "-c:a", "copy"]);
    }
    args.extend(video_codec_args(ctx, config));
    args.extend(output_args(ctx.duration, output, final_output));
    args
}
