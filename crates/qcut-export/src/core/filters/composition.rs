//! Filter Composition
//!
//! Builds the complete `-filter_complex` graph for the filter-composition
//! export mode. Encoder inputs are laid out as:
//!
//! 1. one input per visible video/image segment (trimmed with `-ss`/`-t`)
//! 2. one input per separate audio clip
//! 3. one input per sticker
//!
//! Video segments and black gap fillers are concatenated into `[base]`, text
//! overlays and stickers are painted on top, and the result is exposed as
//! `[outv]`. Audio is delayed to its timeline position and mixed into `[outa]`.

use tracing::{debug, warn};

use super::text_overlay::format_rate;
use super::{
    apply_sticker_overlays, apply_text_overlays, format_seconds, FilterGraph, TextOverlay,
};
use crate::core::effects::build_static_chain;
use crate::core::ffmpeg::EncoderInput;
use crate::core::session::ExportContext;
use crate::core::sources::{ResolvedSources, SourceKind, VideoSourceInput};
use crate::core::{TimeSec, TIME_EPSILON};

/// Label of the composed video stream
pub const VIDEO_OUT: &str = "outv";

/// Label of the mixed audio stream
pub const AUDIO_OUT: &str = "outa";

/// What fills a span of the output timeline
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SegmentKind {
    /// Index into `ResolvedSources::videos`
    Source(usize),
    /// Black filler
    Gap,
}

/// One contiguous span of the output timeline
#[derive(Clone, Debug, PartialEq)]
pub struct TimelineSegment {
    pub kind: SegmentKind,
    /// Output timeline position (seconds)
    pub start: TimeSec,
    pub duration: TimeSec,
    /// Seconds cut from the head of the source to resolve an overlap
    pub head_trim: TimeSec,
}

/// Inputs and graph for one filter-composition encode
#[derive(Clone, Debug)]
pub struct CompositionPlan {
    pub inputs: Vec<EncoderInput>,
    pub filter_graph: String,
    /// Whether `[outa]` exists
    pub audio_mapped: bool,
    pub segments: Vec<TimelineSegment>,
}

impl CompositionPlan {
    /// Encoder arguments for every input, in order.
    pub fn input_args(&self) -> Vec<String> {
        self.inputs.iter().flat_map(|i| i.to_args()).collect()
    }
}

/// Lays sources end to end on the output timeline.
///
/// Sources must be sorted by start time. Gaps become black fillers; a source
/// overlapping its predecessor loses its head, and a source fully covered by
/// earlier ones is dropped. Everything is cut at the export duration.
pub fn plan_segments(videos: &[VideoSourceInput], total: TimeSec) -> Vec<TimelineSegment> {
    let mut segments = Vec::new();
    let mut cursor: TimeSec = 0.0;

    for (index, video) in videos.iter().enumerate() {
        if cursor + TIME_EPSILON >= total {
            break;
        }
        let start = video.start_time.max(0.0);
        let end = video.end_time().min(total);
        if end <= cursor + TIME_EPSILON {
            if video.effective_duration() > 0.0 {
                warn!(
                    element_id = %video.element_id,
                    "Clip is hidden by earlier clips and will not be exported"
                );
            }
            continue;
        }

        if start > cursor + TIME_EPSILON {
            segments.push(TimelineSegment {
                kind: SegmentKind::Gap,
                start: cursor,
                duration: start - cursor,
                head_trim: 0.0,
            });
            cursor = start;
        }

        let segment_start = start.max(cursor);
        segments.push(TimelineSegment {
            kind: SegmentKind::Source(index),
            start: segment_start,
            duration: end - segment_start,
            head_trim: (segment_start - start).max(0.0),
        });
        cursor = end;
    }

    if cursor + TIME_EPSILON < total {
        segments.push(TimelineSegment {
            kind: SegmentKind::Gap,
            start: cursor,
            duration: total - cursor,
            head_trim: 0.0,
        });
    }
    segments
}

fn video_input(video: &VideoSourceInput, segment: &TimelineSegment, ctx: &ExportContext) -> EncoderInput {
    let args = match video.kind {
        SourceKind::Image => vec![
            "-loop".to_string(),
            "1".to_string(),
            "-framerate".to_string(),
            format_rate(ctx.fps),
            "-t".to_string(),
            format_seconds(segment.duration),
        ],
        SourceKind::Video => vec![
            "-ss".to_string(),
            format_seconds(video.trim_start + segment.head_trim),
            "-t".to_string(),
            format_seconds(segment.duration),
        ],
    };
    EncoderInput::new(&video.path).with_pre_input_args(args)
}

/// Normalizes a source stream to the canvas: letterboxed scale, fps, SAR, pixel format.
fn normalize_chain(ctx: &ExportContext) -> String {
    let (w, h) = (ctx.canvas.width, ctx.canvas.height);
    format!(
        "setpts=PTS-STARTPTS,scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={},format=yuv420p",
        format_rate(ctx.fps)
    )
}

fn gap_chain(duration: TimeSec, ctx: &ExportContext) -> String {
    format!(
        "color=c=black:s={}x{}:r={}:d={},format=yuv420p,setsar=1",
        ctx.canvas.width,
        ctx.canvas.height,
        format_rate(ctx.fps),
        format_seconds(duration)
    )
}

fn audio_chain(volume: f64, delay: TimeSec) -> String {
    let delay_ms = (delay.max(0.0) * 1000.0).round() as u64;
    format!("asetpts=PTS-STARTPTS,volume={volume:.3},adelay={delay_ms}|{delay_ms}")
}

/// Builds inputs and graph for a filter-composition encode.
pub fn build_composition(
    sources: &ResolvedSources,
    texts: &[TextOverlay],
    ctx: &ExportContext,
) -> CompositionPlan {
    let segments = plan_segments(&sources.videos, ctx.duration);
    let mut graph = FilterGraph::new();
    let mut inputs = Vec::new();
    let mut concat_labels = Vec::new();
    let mut audio_labels = Vec::new();

    for (position, segment) in segments.iter().enumerate() {
        match segment.kind {
            SegmentKind::Gap => {
                let label = format!("g{position}");
                graph.push(&[], &gap_chain(segment.duration, ctx), &label);
                concat_labels.push(label);
            }
            SegmentKind::Source(index) => {
                let video = &sources.videos[index];
                let input_index = inputs.len();
                inputs.push(video_input(video, segment, ctx));

                let mut body = normalize_chain(ctx);
                if let Some(effects) = build_static_chain(&video.effects) {
                    body.push(',');
                    body.push_str(&effects);
                }
                let label = format!("v{position}");
                graph.push(&[format!("{input_index}:v").as_str()], &body, &label);
                concat_labels.push(label);

                if video.contributes_audio() {
                    let label = format!("a{}", audio_labels.len());
                    graph.push(
                        &[format!("{input_index}:a").as_str()],
                        &audio_chain(video.volume, segment.start),
                        &label,
                    );
                    audio_labels.push(label);
                }
            }
        }
    }

    for audio in &sources.audios {
        if audio.duration <= 0.0 || audio.start_time >= ctx.duration || audio.volume <= 0.0 {
            continue;
        }
        let input_index = inputs.len();
        inputs.push(EncoderInput::new(&audio.path).with_pre_input_args(vec![
            "-ss".to_string(),
            format_seconds(audio.trim_start),
            "-t".to_string(),
            format_seconds(audio.duration),
        ]));
        let label = format!("a{}", audio_labels.len());
        graph.push(
            &[format!("{input_index}:a").as_str()],
            &audio_chain(audio.volume, audio.start_time),
            &label,
        );
        audio_labels.push(label);
    }

    let first_sticker_input = inputs.len();
    inputs.extend(sources.stickers.iter().map(|s| EncoderInput::new(&s.path)));

    let concat_refs: Vec<&str> = concat_labels.iter().map(String::as_str).collect();
    if concat_refs.len() == 1 {
        graph.push(&concat_refs, "null", "base");
    } else {
        graph.push(
            &concat_refs,
            &format!("concat=n={}:v=1:a=0", concat_refs.len()),
            "base",
        );
    }

    let with_text = apply_text_overlays(&mut graph, texts, "base", ctx);
    let with_stickers = apply_sticker_overlays(
        &mut graph,
        &sources.stickers,
        first_sticker_input,
        &with_text,
        ctx,
    );
    graph.push(&[with_stickers.as_str()], "format=yuv420p", VIDEO_OUT);

    let audio_mapped = !audio_labels.is_empty();
    if audio_mapped {
        let refs: Vec<&str> = audio_labels.iter().map(String::as_str).collect();
        let body = if refs.len() == 1 {
            "anull".to_string()
        } else {
            format!(
                "amix=inputs={}:duration=longest:dropout_transition=0:normalize=0",
                refs.len()
            )
        };
        graph.push(&refs, &body, AUDIO_OUT);
    }

    let filter_graph = graph.render();
    debug!(
        inputs = inputs.len(),
        segments = segments.len(),
        chains = graph.len(),
        "Filter composition built"
    );

    CompositionPlan {
        inputs,
        filter_graph,
        audio_mapped,
        segments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::effects::{Effect, EffectType};
    use crate::core::sources::{AudioFileInput, StickerSourceForFilter};
    use crate::core::timeline::VideoProfile;
    use crate::core::{Canvas, Platform, QualityPreset};
    use std::path::PathBuf;

    fn ctx(duration: f64) -> ExportContext {
        ExportContext {
            session_id: "s".to_string(),
            temp_dir: PathBuf::from("/tmp/s"),
            canvas: Canvas::new(1280, 720),
            fps: 30.0,
            duration,
            platform: Platform::Linux,
            quality: QualityPreset::Medium,
        }
    }

    fn video(id: &str, start: f64, duration: f64) -> VideoSourceInput {
        VideoSourceInput {
            element_id: id.to_string(),
            path: PathBuf::from(format!("/media/{id}.mp4")),
            kind: SourceKind::Video,
            start_time: start,
            duration,
            trim_start: 0.0,
            trim_end: 0.0,
            muted: false,
            volume: 1.0,
            profile: Some(VideoProfile {
                width: 1920,
                height: 1080,
                fps: 30.0,
                codec: "h264".to_string(),
                has_audio: Some(true),
            }),
            effects: Vec::new(),
            track_index: 0,
            element_index: 0,
        }
    }

    #[test]
    fn test_segments_fill_gaps_and_tail() {
        let videos = vec![video("a", 1.0, 2.0), video("b", 4.0, 2.0)];
        let segments = plan_segments(&videos, 8.0);
        let kinds: Vec<SegmentKind> = segments.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SegmentKind::Gap,
                SegmentKind::Source(0),
                SegmentKind::Gap,
                SegmentKind::Source(1),
                SegmentKind::Gap
            ]
        );
        let total: f64 = segments.iter().map(|s| s.duration).sum();
        assert!((total - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_overlap_trims_head_and_drops_covered() {
        let videos = vec![video("a", 0.0, 4.0), video("b", 1.0, 2.0), video("c", 3.0, 3.0)];
        let segments = plan_segments(&videos, 6.0);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].kind, SegmentKind::Source(2));
        assert!((segments[1].head_trim - 1.0).abs() < 1e-9);
        assert!((segments[1].duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_timeline_is_black() {
        let plan = build_composition(&ResolvedSources::default(), &[], &ctx(3.0));
        assert!(plan.inputs.is_empty());
        assert!(!plan.audio_mapped);
        assert_eq!(
            plan.filter_graph,
            "color=c=black:s=1280x720:r=30:d=3.000,format=yuv420p,setsar=1[g0];\
             [g0]null[base];[base]format=yuv420p[outv]"
        );
    }

    #[test]
    fn test_two_sources_concat_and_mix() {
        let mut second = video("b", 2.0, 3.5);
        second.trim_start = 1.5;
        second.effects.push(Effect::new(EffectType::Invert));
        let sources = ResolvedSources {
            videos: vec![video("a", 0.0, 2.0), second],
            ..Default::default()
        };
        let plan = build_composition(&sources, &[], &ctx(4.0));

        assert_eq!(
            plan.input_args(),
            vec![
                "-ss", "0.000", "-t", "2.000", "-i", "/media/a.mp4", "-ss", "1.500", "-t",
                "2.000", "-i", "/media/b.mp4"
            ]
        );
        let graph = &plan.filter_graph;
        assert_eq!(graph.matches("scale=1280:720").count(), 2);
        assert!(graph.contains("[v0][v1]concat=n=2:v=1:a=0[base]"));
        assert!(graph.contains("format=yuv420p,negate[v1]"));
        assert!(graph.contains("[1:a]asetpts=PTS-STARTPTS,volume=1.000,adelay=2000|2000[a1]"));
        assert!(graph.contains("[a0][a1]amix=inputs=2"));
        assert!(plan.audio_mapped);
    }

    #[test]
    fn test_images_loop_and_silent_sources_skip_audio() {
        let mut still = video("still", 0.0, 2.0);
        still.kind = SourceKind::Image;
        still.profile = None;
        let mut muted = video("muted", 2.0, 2.0);
        muted.muted = true;
        let sources = ResolvedSources {
            videos: vec![still, muted],
            ..Default::default()
        };
        let plan = build_composition(&sources, &[], &ctx(4.0));
        assert_eq!(
            plan.inputs[0].to_args(),
            vec!["-loop", "1", "-framerate", "30", "-t", "2.000", "-i", "/media/still.mp4"]
        );
        assert!(!plan.audio_mapped);
        assert!(!plan.filter_graph.contains(":a]"));
    }

    #[test]
    fn test_input_layout_audio_then_stickers() {
        let sources = ResolvedSources {
            videos: vec![video("a", 0.0, 5.0)],
            audios: vec![AudioFileInput {
                element_id: "music".to_string(),
                path: PathBuf::from("/media/music.mp3"),
                start_time: 1.0,
                volume: 0.5,
                trim_start: 2.0,
                duration: 3.0,
            }],
            stickers: vec![StickerSourceForFilter {
                id: "logo".to_string(),
                path: PathBuf::from("/media/logo.png"),
                x: 10.0,
                y: 10.0,
                width: 64.0,
                height: 64.0,
                start_time: 0.0,
                end_time: 5.0,
                z_index: 0,
                opacity: None,
                rotation: None,
                effects: Vec::new(),
            }],
            skipped: Vec::new(),
        };
        let plan = build_composition(&sources, &[], &ctx(5.0));
        assert_eq!(plan.inputs.len(), 3);
        assert_eq!(plan.inputs[1].path, PathBuf::from("/media/music.mp3"));
        assert!(plan
            .filter_graph
            .contains("[1:a]asetpts=PTS-STARTPTS,volume=0.500,adelay=1000|1000[a1]"));
        assert!(plan.filter_graph.contains("[2:v]scale=64:64[stk0]"));
        assert!(plan.filter_graph.contains("[v0]null[base]"));
        assert!(plan.filter_graph.contains("[a0][a1]amix=inputs=2"));
        assert!(plan.filter_graph.contains("[ov0]format=yuv420p[outv]"));
    }
}
