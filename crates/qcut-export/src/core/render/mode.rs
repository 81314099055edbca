//! Timeline Analyzer
//!
//! Extracts the features that decide how a timeline is encoded and maps them
//! to exactly one [`ExportMode`]. The decision itself is a pure function so it
//! can be tested without sources, sessions or an encoder.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::effects::{needs_frame_processing, Effect};
use crate::core::filters::{plan_segments, SegmentKind, TextOverlay};
use crate::core::session::ExportContext;
use crate::core::sources::{ResolvedSources, SourceKind};

/// Encoding strategy, chosen once per export
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ExportMode {
    /// Stream-copy the single source
    DirectCopy,
    /// Concatenate sources with the concat demuxer, re-encoding each to a
    /// common profile first when `normalize` is set
    NormalizeAndConcat { normalize: bool },
    /// One filter graph spanning every input
    FilterComposition,
}

impl ExportMode {
    pub fn label(&self) -> &'static str {
        match self {
            ExportMode::DirectCopy => "direct-copy",
            ExportMode::NormalizeAndConcat { normalize: false } => "concat",
            ExportMode::NormalizeAndConcat { normalize: true } => "normalize-concat",
            ExportMode::FilterComposition => "filter-composition",
        }
    }
}

/// Timeline properties that drive mode selection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimelineFeatures {
    /// Visible video/image sources
    pub video_sources: usize,
    /// Every source has a known profile equal to the export target and all
    /// sources share one stream layout
    pub all_sources_match_target: bool,
    /// Text, stickers or static effects
    pub has_overlays: bool,
    /// Effects that can only be applied per frame
    pub has_timed_effects: bool,
    /// Separate audio clips or per-clip volume changes
    pub has_audio_mix: bool,
    /// Gaps, overlaps, leading offset or trailing black
    pub has_gaps: bool,
    /// Still images among the sources
    pub has_images: bool,
}

/// Picks the export strategy.
///
/// 1. one matching source and nothing else to do: `DirectCopy`
/// 2. no overlays, effects, audio mixing, images or gaps: `NormalizeAndConcat`,
///    normalizing unless every source already matches the target
/// 3. anything else: `FilterComposition`
pub fn select_export_mode(features: &TimelineFeatures) -> ExportMode {
    let plain = !features.has_overlays
        && !features.has_timed_effects
        && !features.has_audio_mix
        && !features.has_gaps
        && !features.has_images;

    if features.video_sources == 0 || !plain {
        return ExportMode::FilterComposition;
    }
    if features.video_sources == 1 && features.all_sources_match_target {
        return ExportMode::DirectCopy;
    }
    ExportMode::NormalizeAndConcat {
        normalize: !features.all_sources_match_target,
    }
}

/// Features, selected mode and whether frames must be processed one by one
#[derive(Clone, Debug, PartialEq)]
pub struct TimelineAnalysis {
    pub features: TimelineFeatures,
    pub mode: ExportMode,
    pub needs_frame_processing: bool,
}

fn has_static_effects(effects: &[Effect]) -> bool {
    effects.iter().any(|e| e.enabled && !e.is_time_varying())
}

/// Inspects resolved sources and text overlays against the export context.
pub fn analyze_timeline(
    sources: &ResolvedSources,
    texts: &[TextOverlay],
    ctx: &ExportContext,
) -> TimelineAnalysis {
    let videos = &sources.videos;

    let first_profile = videos.first().and_then(|v| v.profile.as_ref());
    let all_sources_match_target = !videos.is_empty()
        && videos.iter().all(|v| match (&v.profile, first_profile) {
            (Some(profile), Some(first)) => {
                profile.matches_target(ctx.canvas, ctx.fps) && profile.same_stream_layout(first)
            }
            _ => false,
        });

    let has_overlays = !texts.is_empty()
        || !sources.stickers.is_empty()
        || videos.iter().any(|v| has_static_effects(&v.effects));

    let has_timed_effects = videos
        .iter()
        .any(|v| needs_frame_processing(&v.effects));

    let has_audio_mix = !sources.audios.is_empty()
        || videos
            .iter()
            .any(|v| v.contributes_audio() && (v.volume - 1.0).abs() > 1e-6);

    let segments = plan_segments(videos, ctx.duration);
    let used_sources = segments
        .iter()
        .filter(|s| matches!(s.kind, SegmentKind::Source(_)))
        .count();
    let has_gaps = segments.iter().any(|s| s.kind == SegmentKind::Gap)
        || segments.iter().any(|s| s.head_trim > 0.0)
        || used_sources != videos.len();

    let features = TimelineFeatures {
        video_sources: videos.len(),
        all_sources_match_target,
        has_overlays,
        has_timed_effects,
        has_audio_mix,
        has_gaps,
        has_images: videos.iter().any(|v| v.kind == SourceKind::Image),
    };
    let mode = select_export_mode(&features);
    debug!(?features, "Timeline features");
    info!(mode = mode.label(), sources = videos.len(), "Export mode selected");

    TimelineAnalysis {
        features,
        mode,
        needs_frame_processing: has_timed_effects,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::effects::{EffectType, Keyframe, ParamValue};
    use crate::core::sources::VideoSourceInput;
    use crate::core::timeline::VideoProfile;
    use crate::core::{Canvas, Platform, QualityPreset};
    use std::path::PathBuf;

    fn plain(video_sources: usize, matching: bool) -> TimelineFeatures {
        TimelineFeatures {
            video_sources,
            all_sources_match_target: matching,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_matching_source_is_direct_copy() {
        assert_eq!(select_export_mode(&plain(1, true)), ExportMode::DirectCopy);
    }

    #[test]
    fn test_multiple_sources_never_direct_copy() {
        for count in 2..6 {
            for matching in [true, false] {
                for overlays in [true, false] {
                    let mut f = plain(count, matching);
                    f.has_overlays = overlays;
                    assert_ne!(select_export_mode(&f), ExportMode::DirectCopy);
                }
            }
        }
    }

    #[test]
    fn test_concat_variants() {
        assert_eq!(
            select_export_mode(&plain(3, true)),
            ExportMode::NormalizeAndConcat { normalize: false }
        );
        assert_eq!(
            select_export_mode(&plain(3, false)),
            ExportMode::NormalizeAndConcat { normalize: true }
        );
        assert_eq!(
            select_export_mode(&plain(1, false)),
            ExportMode::NormalizeAndConcat { normalize: true }
        );
    }

    #[test]
    fn test_anything_extra_forces_composition() {
        let toggles: [fn(&mut TimelineFeatures); 5] = [
            |f| f.has_overlays = true,
            |f| f.has_timed_effects = true,
            |f| f.has_audio_mix = true,
            |f| f.has_gaps = true,
            |f| f.has_images = true,
        ];
        for toggle in toggles {
            let mut f = plain(1, true);
            toggle(&mut f);
            assert_eq!(select_export_mode(&f), ExportMode::FilterComposition);
        }
        assert_eq!(select_export_mode(&plain(0, true)), ExportMode::FilterComposition);
    }

    fn ctx() -> ExportContext {
        ExportContext {
            session_id: "s".to_string(),
            temp_dir: PathBuf::from("/tmp/s"),
            canvas: Canvas::new(1920, 1080),
            fps: 30.0,
            duration: 5.0,
            platform: Platform::Linux,
            quality: QualityPreset::Medium,
        }
    }

    fn source(start: f64, duration: f64) -> VideoSourceInput {
        VideoSourceInput {
            element_id: format!("v{start}"),
            path: PathBuf::from("/media/v.mp4"),
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
    fn test_analyze_detects_features() {
        let sources = ResolvedSources {
            videos: vec![source(0.0, 5.0)],
            ..Default::default()
        };
        let analysis = analyze_timeline(&sources, &[], &ctx());
        assert_eq!(analysis.mode, ExportMode::DirectCopy);
        assert!(!analysis.needs_frame_processing);

        let gapped = ResolvedSources {
            videos: vec![source(1.0, 4.0)],
            ..Default::default()
        };
        let analysis = analyze_timeline(&gapped, &[], &ctx());
        assert!(analysis.features.has_gaps);
        assert_eq!(analysis.mode, ExportMode::FilterComposition);
    }

    #[test]
    fn test_keyframed_effect_needs_frame_processing() {
        let mut effect = Effect::new(EffectType::Brightness);
        effect
            .add_keyframe("value", Keyframe::new(0.0, ParamValue::Float(0.0)))
            .unwrap();
        effect
            .add_keyframe("value", Keyframe::new(2.0, ParamValue::Float(0.5)))
            .unwrap();
        let mut video = source(0.0, 5.0);
        video.effects.push(effect);
        let sources = ResolvedSources {
            videos: vec![video],
            ..Default::default()
        };
        let analysis = analyze_timeline(&sources, &[], &ctx());
        assert!(analysis.needs_frame_processing);
        assert_eq!(analysis.mode, ExportMode::FilterComposition);
    }
}
