//! Export Pipeline
//!
//! Entry point of the export engine. Drives one export from options to a
//! finished file: session allocation, source resolution, mode selection,
//! encoder invocations, progress reporting and cleanup.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::export::{
    build_composition_args, build_concat_args, build_direct_copy_args, build_frame_sequence_args,
    build_normalize_args, build_raw_frames_args, render_concat_list, CancelHandle, ConcatEntry,
    EncoderInvoker, EncoderJob,
};
use super::frames::{
    collect_frame_effect_windows, frame_pattern, raw_frame_pattern, FrameEffectProcessor,
};
use super::mode::{analyze_timeline, ExportMode};
use super::progress::{encoder_fraction, EncoderProgress, ExportProgress, ExportStage, ProgressReporter};
use crate::core::effects::needs_frame_processing;
use crate::core::ffmpeg::{detect_ffmpeg, FFmpegRunner};
use crate::core::filters::{build_composition, collect_text_overlays, TextOverlay};
use crate::core::fs::{discard_file, partial_output_path, promote_partial_output, remove_file_if_exists};
use crate::core::session::{ExportContext, ExportSession};
use crate::core::settings::ExportConfig;
use crate::core::sources::{resolve_sources, ResolvedSources, SkippedSource, SourceKind};
use crate::core::timeline::{ElementPayload, MediaCatalog, TimelineTrack};
use crate::core::{Canvas, CoreResult, ExportError, Platform, QualityPreset};

const CONCAT_LIST_NAME: &str = "concat.txt";
const MIXED_AUDIO_NAME: &str = "audio.m4a";
const MAX_FPS: f64 = 240.0;

// =============================================================================
// Options / Result
// =============================================================================

/// Export request
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Session id; a fresh ULID when absent
    #[serde(default)]
    pub session_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    #[serde(default)]
    pub quality_preset: QualityPreset,
    /// Requested duration (seconds), clamped by the configured limits
    pub duration: f64,
    pub output_path: PathBuf,
    #[serde(default = "Platform::current")]
    pub platform: Platform,
}

impl ExportOptions {
    fn validate(&self) -> CoreResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::InvalidOptions(format!(
                "Invalid canvas size {}x{}",
                self.width, self.height
            )));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 || self.fps > MAX_FPS {
            return Err(ExportError::InvalidOptions(format!(
                "Frame rate must be in (0, {MAX_FPS}], got {}",
                self.fps
            )));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(ExportError::InvalidOptions(format!(
                "Duration must be positive, got {}",
                self.duration
            )));
        }
        if self.output_path.file_name().is_none() {
            return Err(ExportError::InvalidOptions(format!(
                "Output path has no file name: {}",
                self.output_path.display()
            )));
        }
        Ok(())
    }
}

/// Successful export summary
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub output_path: PathBuf,
    pub mode: ExportMode,
    pub file_size: u64,
    pub duration_sec: f64,
    pub encoding_time_sec: f64,
    pub skipped_sources: Vec<SkippedSource>,
    /// Frames kept unfiltered after their effect chain failed
    pub fallback_frames: Vec<String>,
}

// =============================================================================
// Entry Points
// =============================================================================

/// Exports a timeline with the detected FFmpeg installation.
///
/// Fails with `EncoderUnavailable` before touching the filesystem when no
/// usable encoder is found.
pub async fn export_timeline(
    config: &ExportConfig,
    tracks: &[TimelineTrack],
    catalog: &MediaCatalog,
    options: ExportOptions,
    progress: Option<mpsc::Sender<ExportProgress>>,
    cancel: CancelHandle,
) -> CoreResult<ExportResult> {
    let info = detect_ffmpeg(&config.encoder).map_err(|e| {
        error!(error = %e, "FFmpeg not available");
        ExportError::from(e)
    })?;
    info!(version = %info.version, path = %info.ffmpeg_path.display(), "Using FFmpeg");
    let runner = FFmpegRunner::new(info);
    run_export(&runner, config, tracks, catalog, options, progress, cancel).await
}

/// Exports a timeline through any encoder implementation.
pub async fn run_export<E: EncoderInvoker + ?Sized>(
    encoder: &E,
    config: &ExportConfig,
    tracks: &[TimelineTrack],
    catalog: &MediaCatalog,
    options: ExportOptions,
    progress: Option<mpsc::Sender<ExportProgress>>,
    cancel: CancelHandle,
) -> CoreResult<ExportResult> {
    let started = Instant::now();
    options.validate()?;

    let mut config = config.clone();
    config.normalize();
    let config = &config;

    let duration = config.clamp_duration(options.duration);
    if (duration - options.duration).abs() > f64::EPSILON {
        warn!(
            requested = options.duration,
            clamped = duration,
            "Export duration clamped to configured limits"
        );
    }

    let mut reporter = ProgressReporter::new(
        progress,
        Duration::from_millis(config.progress.min_interval_ms),
    );
    reporter
        .report(ExportStage::Preparing, 0.0, "Preparing export", None, true)
        .await;

    let session = ExportSession::create(&config.temp_root(), options.session_id.as_deref()).await?;
    let ctx = ExportContext::new(
        &session,
        Canvas::new(options.width, options.height),
        options.fps,
        duration,
        options.platform,
        options.quality_preset,
    );
    info!(
        session_id = %ctx.session_id,
        width = ctx.canvas.width,
        height = ctx.canvas.height,
        fps = ctx.fps,
        duration = ctx.duration,
        output = %options.output_path.display(),
        "Starting export"
    );

    let outcome = export_in_session(
        encoder,
        config,
        tracks,
        catalog,
        &options,
        &ctx,
        &mut reporter,
        &cancel,
    )
    .await;

    if let Err(e) = session.cleanup().await {
        warn!(session_id = %ctx.session_id, error = %e, "Failed to clean up export session");
    }

    match outcome {
        Ok(mut result) => {
            result.encoding_time_sec = started.elapsed().as_secs_f64();
            reporter
                .report(ExportStage::Complete, 100.0, "Export complete", None, true)
                .await;
            info!(
                mode = result.mode.label(),
                size = result.file_size,
                seconds = result.encoding_time_sec,
                "Export finished"
            );
            Ok(result)
        }
        Err(e) => {
            error!(kind = e.kind(), message = %e.user_message(), "Export failed");
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn export_in_session<E: EncoderInvoker + ?Sized>(
    encoder: &E,
    config: &ExportConfig,
    tracks: &[TimelineTrack],
    catalog: &MediaCatalog,
    options: &ExportOptions,
    ctx: &ExportContext,
    reporter: &mut ProgressReporter,
    cancel: &CancelHandle,
) -> CoreResult<ExportResult> {
    let mut sources = resolve_sources(ctx, tracks, catalog).await?;
    fill_missing_profiles(encoder, &mut sources).await;
    warn_dropped_overlay_effects(tracks, &sources);

    let texts = collect_text_overlays(tracks, ctx);
    let analysis = analyze_timeline(&sources, &texts, ctx);

    if let Some(parent) = options.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = partial_output_path(&options.output_path);
    remove_file_if_exists(&partial).await?;

    reporter
        .report(
            ExportStage::Preparing,
            5.0,
            format!("Export mode: {}", analysis.mode.label()),
            None,
            true,
        )
        .await;

    let run = ModeRun {
        encoder,
        config,
        ctx,
        cancel,
        partial: &partial,
        output: &options.output_path,
    };
    let encoded = match analysis.mode {
        ExportMode::DirectCopy => run.direct_copy(&sources, reporter).await,
        ExportMode::NormalizeAndConcat { normalize } => {
            run.concat(&sources, normalize, reporter).await
        }
        ExportMode::FilterComposition if analysis.needs_frame_processing => {
            run.frame_pipeline(&sources, &texts, reporter).await
        }
        ExportMode::FilterComposition => run.composition(&sources, &texts, reporter).await,
    };

    let fallback_frames = match encoded {
        Ok(fallbacks) => fallbacks,
        Err(e) => {
            discard_file(&partial).await;
            return Err(e);
        }
    };
    if cancel.is_cancelled() {
        discard_file(&partial).await;
        return Err(ExportError::Cancelled);
    }

    reporter
        .report(ExportStage::Finalizing, 95.0, "Finalizing output", None, true)
        .await;
    let file_size = promote_partial_output(&partial, &options.output_path).await?;

    Ok(ExportResult {
        output_path: options.output_path.clone(),
        mode: analysis.mode,
        file_size,
        duration_sec: ctx.duration,
        encoding_time_sec: 0.0,
        skipped_sources: sources.skipped,
        fallback_frames,
    })
}

/// Probes video sources whose catalog entry lacks a full profile.
async fn fill_missing_profiles<E: EncoderInvoker + ?Sized>(
    encoder: &E,
    sources: &mut ResolvedSources,
) {
    for video in sources
        .videos
        .iter_mut()
        .filter(|v| v.kind == SourceKind::Video && v.profile.is_none())
    {
        video.profile = encoder.probe_profile(&video.path).await;
        debug!(element_id = %video.element_id, profile = ?video.profile, "Probed source profile");
    }
}

/// Time-varying effects are only evaluated on video sources.
fn warn_dropped_overlay_effects(tracks: &[TimelineTrack], sources: &ResolvedSources) {
    for sticker in &sources.stickers {
        if needs_frame_processing(&sticker.effects) {
            warn!(element_id = %sticker.id, "Animated effects on stickers are not rendered");
        }
    }
    for element in tracks.iter().flat_map(|t| &t.elements) {
        if matches!(element.payload, ElementPayload::Text(_))
            && needs_frame_processing(&element.effects)
        {
            warn!(element_id = %element.id, "Animated effects on text are not rendered");
        }
    }
}

// =============================================================================
// Progress Pumping
// =============================================================================

/// Percentage window one encoder pass maps onto
struct Phase {
    stage: ExportStage,
    from: f32,
    to: f32,
    message: String,
    duration: f64,
    frames: u64,
}

impl Phase {
    fn percent(&self, update: &EncoderProgress) -> f32 {
        let fraction = encoder_fraction(update, self.duration, self.frames) as f32;
        self.from + (self.to - self.from) * fraction
    }
}

/// Drives `work` while forwarding its encoder progress to the reporter.
async fn pump_progress<T>(
    work: impl Future<Output = CoreResult<T>>,
    mut rx: mpsc::Receiver<EncoderProgress>,
    reporter: &mut ProgressReporter,
    phase: &Phase,
) -> CoreResult<T> {
    reporter
        .report(phase.stage, phase.from, phase.message.clone(), None, true)
        .await;
    tokio::pin!(work);
    loop {
        tokio::select! {
            result = &mut work => {
                if result.is_ok() {
                    reporter.report(phase.stage, phase.to, phase.message.clone(), None, false).await;
                }
                return result;
            }
            Some(update) = rx.recv() => {
                reporter
                    .report(
                        phase.stage,
                        phase.percent(&update),
                        phase.message.clone(),
                        Some(update.frames_done),
                        false,
                    )
                    .await;
            }
        }
    }
}

// =============================================================================
// Mode Execution
// =============================================================================

struct ModeRun<'a, E: EncoderInvoker + ?Sized> {
    encoder: &'a E,
    config: &'a ExportConfig,
    ctx: &'a ExportContext,
    cancel: &'a CancelHandle,
    partial: &'a Path,
    output: &'a Path,
}

impl<E: EncoderInvoker + ?Sized> ModeRun<'_, E> {
    fn job(&self, args: Vec<String>, duration: f64) -> EncoderJob {
        EncoderJob::new(
            args,
            self.config.encode_timeout(duration),
            self.config.limits.stderr_tail_lines,
        )
    }

    async fn encode(
        &self,
        args: Vec<String>,
        reporter: &mut ProgressReporter,
        phase: Phase,
    ) -> CoreResult<()> {
        let job = self.job(args, phase.duration);
        let (tx, rx) = mpsc::channel(64);
        let work = self.encoder.run(job, self.cancel.clone(), Some(tx));
        pump_progress(work, rx, reporter, &phase).await.map(|_| ())
    }

    async fn direct_copy(
        &self,
        sources: &ResolvedSources,
        reporter: &mut ProgressReporter,
    ) -> CoreResult<Vec<String>> {
        let source = sources
            .videos
            .first()
            .ok_or_else(|| ExportError::InvalidOptions("No source to copy".to_string()))?;
        let args = build_direct_copy_args(source, self.ctx, self.partial, self.output);
        debug!(?args, "Direct copy arguments");
        let phase = Phase {
            stage: ExportStage::Encoding,
            from: 5.0,
            to: 95.0,
            message: "Copying source".to_string(),
            duration: source.effective_duration().min(self.ctx.duration),
            frames: self.ctx.total_frames(),
        };
        self.encode(args, reporter, phase).await?;
        Ok(Vec::new())
    }

    async fn concat(
        &self,
        sources: &ResolvedSources,
        normalize: bool,
        reporter: &mut ProgressReporter,
    ) -> CoreResult<Vec<String>> {
        let count = sources.videos.len().max(1) as f32;
        let mut entries = Vec::with_capacity(sources.videos.len());

        for (i, source) in sources.videos.iter().enumerate() {
            if !normalize {
                entries.push(ConcatEntry {
                    path: source.path.clone(),
                    inpoint: Some(source.trim_start),
                    outpoint: Some(source.trim_start + source.effective_duration()),
                });
                continue;
            }

            let normalized = self.ctx.temp_dir.join(format!("norm_{i:03}.mp4"));
            let args = build_normalize_args(source, self.ctx, self.config, &normalized);
            debug!(element_id = %source.element_id, ?args, "Normalize arguments");
            let phase = Phase {
                stage: ExportStage::Normalizing,
                from: 5.0 + 75.0 * i as f32 / count,
                to: 5.0 + 75.0 * (i + 1) as f32 / count,
                message: format!("Normalizing clip {} of {}", i + 1, sources.videos.len()),
                duration: source.effective_duration(),
                frames: (source.effective_duration() * self.ctx.fps).ceil() as u64,
            };
            self.encode(args, reporter, phase).await?;
            entries.push(ConcatEntry {
                path: normalized,
                inpoint: None,
                outpoint: None,
            });
        }

        let list_path = self.ctx.temp_dir.join(CONCAT_LIST_NAME);
        tokio::fs::write(&list_path, render_concat_list(&entries)).await?;

        let args = build_concat_args(&list_path, self.ctx, self.partial, self.output);
        debug!(?args, "Concat arguments");
        let phase = Phase {
            stage: ExportStage::Encoding,
            from: if normalize { 80.0 } else { 5.0 },
            to: 95.0,
            message: "Joining clips".to_string(),
            duration: self.ctx.duration,
            frames: self.ctx.total_frames(),
        };
        self.encode(args, reporter, phase).await?;
        Ok(Vec::new())
    }

    async fn composition(
        &self,
        sources: &ResolvedSources,
        texts: &[TextOverlay],
        reporter: &mut ProgressReporter,
    ) -> CoreResult<Vec<String>> {
        let plan = build_composition(sources, texts, self.ctx);
        debug!(graph = %plan.filter_graph, "Composition filter graph");
        let args = build_composition_args(&plan, self.ctx, self.config, self.partial, self.output);
        let phase = Phase {
            stage: ExportStage::Encoding,
            from: 5.0,
            to: 95.0,
            message: "Encoding video".to_string(),
            duration: self.ctx.duration,
            frames: self.ctx.total_frames(),
        };
        self.encode(args, reporter, phase).await?;
        Ok(Vec::new())
    }

    /// Render raw frames, filter each one, encode the sequence.
    async fn frame_pipeline(
        &self,
        sources: &ResolvedSources,
        texts: &[TextOverlay],
        reporter: &mut ProgressReporter,
    ) -> CoreResult<Vec<String>> {
        let frames_dir = self.ctx.frames_dir();
        tokio::fs::create_dir_all(&frames_dir).await?;

        let plan = build_composition(sources, texts, self.ctx);
        debug!(graph = %plan.filter_graph, "Frame render filter graph");
        let audio_path = plan
            .audio_mapped
            .then(|| self.ctx.temp_dir.join(MIXED_AUDIO_NAME));

        let args = build_raw_frames_args(
            &plan,
            self.ctx,
            self.config,
            &frames_dir.join(raw_frame_pattern()),
            audio_path.as_deref(),
        );
        let phase = Phase {
            stage: ExportStage::RenderingFrames,
            from: 5.0,
            to: 40.0,
            message: "Rendering frames".to_string(),
            duration: self.ctx.duration,
            frames: self.ctx.total_frames(),
        };
        self.encode(args, reporter, phase).await?;

        let windows = collect_frame_effect_windows(&sources.videos);
        let processor = FrameEffectProcessor::new(
            self.encoder,
            self.ctx.session_id.clone(),
            frames_dir.clone(),
            self.ctx.fps,
            self.config.frame_timeout(),
            self.config.limits.stderr_tail_lines,
            self.cancel.clone(),
        );
        let (tx, rx) = mpsc::channel(64);
        let phase = Phase {
            stage: ExportStage::ProcessingFrames,
            from: 40.0,
            to: 80.0,
            message: "Applying frame effects".to_string(),
            duration: 0.0,
            frames: self.ctx.total_frames(),
        };
        let report = pump_progress(processor.process_all(&windows, Some(&tx)), rx, reporter, &phase)
            .await?;
        drop(tx);

        let args = build_frame_sequence_args(
            &frames_dir.join(frame_pattern()),
            audio_path.as_deref(),
            self.ctx,
            self.config,
            self.partial,
            self.output,
        );
        let phase = Phase {
            stage: ExportStage::Encoding,
            from: 80.0,
            to: 95.0,
            message: "Encoding frames".to_string(),
            duration: self.ctx.duration,
            frames: self.ctx.total_frames(),
        };
        self.encode(args, reporter, phase).await?;

        Ok(report.fallbacks.into_iter().map(|f| f.frame_name).collect())
    }
}
