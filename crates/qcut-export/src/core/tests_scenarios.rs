//! End-to-end export scenarios
//!
//! Drives `run_export` against a scripted encoder that records every argument
//! list and writes plausible outputs, so the whole pipeline runs without a
//! real FFmpeg.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::core::effects::{Effect, EffectType, Keyframe, ParamValue};
use crate::core::render::{
    export_timeline, run_export, CancelHandle, EncoderInvoker, EncoderJob, EncoderOutcome, EncoderProgress,
    ExportMode, ExportOptions, ExportProgress, ExportStage,
};
use crate::core::session::{ExportSession, SESSIONS_DIR};
use crate::core::settings::ExportConfig;
use crate::core::timeline::{
    MediaCatalog, MediaItem, MediaKind, TimelineElement, TimelineTrack, TrackKind, VideoProfile,
};
use crate::core::{CoreResult, ExportError, Platform, QualityPreset};

const RAW_FRAME_COUNT: u64 = 3;

#[derive(Default)]
struct ScriptedEncoder {
    calls: Mutex<Vec<Vec<String>>>,
    fail_all: bool,
    fail_frame_filters: bool,
    /// Set by the final image-sequence encode: every frame equals its raw frame
    frames_match_raw: Mutex<Option<bool>>,
}

impl ScriptedEncoder {
    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn graphs(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|args| value_after(args, "-filter_complex").map(str::to_string))
            .collect()
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn input_paths(args: &[String]) -> Vec<String> {
    args.windows(2)
        .filter(|w| w[0] == "-i")
        .map(|w| w[1].clone())
        .collect()
}

async fn all_frames_match_raw(dir: &Path) -> bool {
    for i in 1..=RAW_FRAME_COUNT {
        let raw = tokio::fs::read(dir.join(format!("raw_frame-{i:04}.png"))).await;
        let out = tokio::fs::read(dir.join(format!("frame-{i:04}.png"))).await;
        match (raw, out) {
            (Ok(raw), Ok(out)) if raw == out => {}
            _ => return false,
        }
    }
    true
}

#[async_trait]
impl EncoderInvoker for ScriptedEncoder {
    async fn run(
        &self,
        job: EncoderJob,
        cancel: CancelHandle,
        _progress: Option<mpsc::Sender<EncoderProgress>>,
    ) -> CoreResult<EncoderOutcome> {
        let args = job.args.clone();
        self.calls.lock().unwrap().push(args.clone());

        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        if self.fail_all {
            return Err(ExportError::EncoderProcessFailure {
                exit_code: Some(1),
                stderr_tail: "scripted failure".to_string(),
            });
        }

        // Per-frame filter invocation
        if args.iter().any(|a| a == "-frames:v") {
            if self.fail_frame_filters {
                return Err(ExportError::FilterSyntaxError {
                    message: "No such filter".to_string(),
                    stderr_tail: "No such filter".to_string(),
                });
            }
            tokio::fs::write(args.last().unwrap(), b"filtered").await?;
            return Ok(EncoderOutcome::default());
        }

        // Raw frame render
        if let Some(pattern) = args.iter().find(|a| a.ends_with("raw_frame-%04d.png")) {
            let dir = PathBuf::from(pattern).parent().unwrap().to_path_buf();
            for i in 1..=RAW_FRAME_COUNT {
                tokio::fs::write(dir.join(format!("raw_frame-{i:04}.png")), format!("raw-{i}"))
                    .await?;
            }
            if let Some(audio) = args.iter().find(|a| a.ends_with("audio.m4a")) {
                tokio::fs::write(audio, b"audio").await?;
            }
            return Ok(EncoderOutcome::default());
        }

        // Final image-sequence encode
        if let Some(pattern) = input_paths(&args)
            .into_iter()
            .find(|p| p.ends_with("frame-%04d.png"))
        {
            let dir = PathBuf::from(pattern).parent().unwrap().to_path_buf();
            let matched = all_frames_match_raw(&dir).await;
            *self.frames_match_raw.lock().unwrap() = Some(matched);
        }

        tokio::fs::write(args.last().unwrap(), b"encoded-video").await?;
        Ok(EncoderOutcome::default())
    }
}

struct Fixture {
    root: TempDir,
    config: ExportConfig,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let mut config = ExportConfig::default();
        config.session.temp_root = Some(root.path().join("tmp"));
        config.progress.min_interval_ms = 0;
        Self { root, config }
    }

    fn media_file(&self, name: &str) -> PathBuf {
        let path = self.root.path().join("media").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"media").unwrap();
        path
    }

    fn video(&self, id: &str, width: u32, height: u32) -> MediaItem {
        MediaItem::new(id, &format!("{id}.mp4"), MediaKind::Video)
            .with_path(self.media_file(&format!("{id}.mp4")))
            .with_profile(VideoProfile {
                width,
                height,
                fps: 30.0,
                codec: "h264".to_string(),
                has_audio: Some(true),
            })
    }

    fn output(&self) -> PathBuf {
        self.root.path().join("out").join("export.mp4")
    }

    fn options(&self, duration: f64) -> ExportOptions {
        ExportOptions {
            session_id: None,
            width: 1920,
            height: 1080,
            fps: 30.0,
            quality_preset: QualityPreset::Medium,
            duration,
            output_path: self.output(),
            platform: Platform::Linux,
        }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.config.temp_root().join(SESSIONS_DIR)
    }
}

fn media_track(elements: Vec<TimelineElement>) -> TimelineTrack {
    elements
        .into_iter()
        .fold(TimelineTrack::new("main", TrackKind::Media), |t, e| t.with_element(e))
}

fn animated_brightness() -> Effect {
    let mut effect = Effect::new(EffectType::Brightness);
    effect
        .add_keyframe("value", Keyframe::new(0.0, ParamValue::Float(0.0)))
        .unwrap();
    effect
        .add_keyframe("value", Keyframe::new(2.0, ParamValue::Float(0.3)))
        .unwrap();
    effect
}

#[tokio::test]
async fn single_matching_clip_is_stream_copied() {
    let fx = Fixture::new();
    let catalog = MediaCatalog::from_items([fx.video("m1", 1920, 1080)]);
    let tracks = vec![media_track(vec![TimelineElement::media("e1", "m1", 0.0, 10.0)])];
    let encoder = ScriptedEncoder::default();

    let result = run_export(
        &encoder,
        &fx.config,
        &tracks,
        &catalog,
        fx.options(10.0),
        None,
        CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.mode, ExportMode::DirectCopy);
    assert_eq!(result.output_path, fx.output());
    assert_eq!(result.file_size, b"encoded-video".len() as u64);
    assert!(fx.output().exists());

    let calls = encoder.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].iter().any(|a| a == "-filter_complex"));
    assert_eq!(value_after(&calls[0], "-c"), Some("copy"));
}

#[tokio::test]
async fn mixed_resolutions_with_text_use_one_composition_graph() {
    let fx = Fixture::new();
    let catalog =
        MediaCatalog::from_items([fx.video("m1", 1920, 1080), fx.video("m2", 1280, 720)]);
    let tracks = vec![
        media_track(vec![
            TimelineElement::media("e1", "m1", 0.0, 5.0),
            TimelineElement::media("e2", "m2", 5.0, 5.0),
        ]),
        TimelineTrack::new("titles", TrackKind::Text)
            .with_element(TimelineElement::text("t1", "Hello", 1.0, 2.0)),
    ];
    let encoder = ScriptedEncoder::default();

    let result = run_export(
        &encoder,
        &fx.config,
        &tracks,
        &catalog,
        fx.options(10.0),
        None,
        CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.mode, ExportMode::FilterComposition);
    let graphs = encoder.graphs();
    assert_eq!(graphs.len(), 1);
    let graph = &graphs[0];
    assert_eq!(graph.matches("drawtext=").count(), 1);
    assert_eq!(
        graph
            .matches("scale=1920:1080:force_original_aspect_ratio=decrease")
            .count(),
        2
    );
    assert!(graph.contains("[0:v]"));
    assert!(graph.contains("[1:v]"));
    assert!(graph.contains("concat=n=2"));
}

#[tokio::test]
async fn stickers_are_painted_in_z_order() {
    let fx = Fixture::new();
    let sticker = |id: &str| {
        MediaItem::new(id, &format!("{id}.png"), MediaKind::Image)
            .with_path(fx.media_file(&format!("{id}.png")))
    };
    let catalog = MediaCatalog::from_items([
        fx.video("m1", 1920, 1080),
        sticker("top"),
        sticker("bottom"),
        sticker("middle"),
    ]);
    let tracks = vec![
        media_track(vec![TimelineElement::media("e1", "m1", 0.0, 5.0)]),
        TimelineTrack::new("stickers", TrackKind::Sticker)
            .with_element(TimelineElement::sticker("s1", "top", 0.0, 5.0, 9))
            .with_element(TimelineElement::sticker("s2", "bottom", 0.0, 5.0, -1))
            .with_element(TimelineElement::sticker("s3", "middle", 0.0, 5.0, 4)),
    ];
    let encoder = ScriptedEncoder::default();

    run_export(
        &encoder,
        &fx.config,
        &tracks,
        &catalog,
        fx.options(5.0),
        None,
        CancelHandle::new(),
    )
    .await
    .unwrap();

    let calls = encoder.calls();
    assert_eq!(calls.len(), 1);
    let inputs = input_paths(&calls[0]);
    let graph = value_after(&calls[0], "-filter_complex").unwrap();

    // Order in which sticker inputs are consumed by the graph
    let mut painted: Vec<(usize, &str)> = inputs
        .iter()
        .enumerate()
        .filter(|(_, path)| path.ends_with(".png"))
        .filter_map(|(index, path)| {
            let name = Path::new(path).file_stem()?.to_str()?;
            graph.find(&format!("[{index}:v]")).map(|pos| (pos, name))
        })
        .collect();
    painted.sort_by_key(|(pos, _)| *pos);
    let names: Vec<&str> = painted.iter().map(|(_, n)| *n).collect();
    assert_eq!(names, vec!["bottom", "middle", "top"]);
}

#[tokio::test]
async fn text_order_follows_track_and_element_position() {
    let fx = Fixture::new();
    let catalog = MediaCatalog::from_items([fx.video("m1", 1920, 1080)]);
    let tracks = vec![
        media_track(vec![TimelineElement::media("e1", "m1", 0.0, 10.0)]),
        TimelineTrack::new("t0", TrackKind::Text)
            .with_element(TimelineElement::text("a", "Alpha", 6.0, 2.0))
            .with_element(TimelineElement::text("b", "Beta", 0.0, 2.0)),
        TimelineTrack::new("t1", TrackKind::Text)
            .with_element(TimelineElement::text("c", "Gamma", 0.0, 10.0)),
    ];
    let encoder = ScriptedEncoder::default();

    run_export(
        &encoder,
        &fx.config,
        &tracks,
        &catalog,
        fx.options(10.0),
        None,
        CancelHandle::new(),
    )
    .await
    .unwrap();

    let graph = encoder.graphs().pop().unwrap();
    let alpha = graph.find("text=Alpha").unwrap();
    let beta = graph.find("text=Beta").unwrap();
    let gamma = graph.find("text=Gamma").unwrap();
    assert!(alpha < beta);
    assert!(beta < gamma);
}

#[tokio::test]
async fn failing_frame_filters_keep_raw_frames() {
    let fx = Fixture::new();
    let catalog = MediaCatalog::from_items([fx.video("m1", 1920, 1080)]);
    let tracks = vec![media_track(vec![
        TimelineElement::media("e1", "m1", 0.0, 5.0).with_effect(animated_brightness())
    ])];
    let encoder = ScriptedEncoder {
        fail_frame_filters: true,
        ..Default::default()
    };

    let result = run_export(
        &encoder,
        &fx.config,
        &tracks,
        &catalog,
        fx.options(5.0),
        None,
        CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.mode, ExportMode::FilterComposition);
    assert_eq!(
        result.fallback_frames,
        vec!["frame-0001.png", "frame-0002.png", "frame-0003.png"]
    );
    assert_eq!(*encoder.frames_match_raw.lock().unwrap(), Some(true));
    assert!(fx.output().exists());

    let per_frame_calls = encoder
        .calls()
        .iter()
        .filter(|args| args.iter().any(|a| a == "-frames:v"))
        .count();
    assert_eq!(per_frame_calls, RAW_FRAME_COUNT as usize);
}

#[tokio::test]
async fn failed_encode_leaves_no_output_and_no_session() {
    let fx = Fixture::new();
    let catalog = MediaCatalog::from_items([fx.video("m1", 1920, 1080)]);
    let tracks = vec![media_track(vec![TimelineElement::media("e1", "m1", 0.0, 10.0)])];
    let encoder = ScriptedEncoder {
        fail_all: true,
        ..Default::default()
    };
    let mut options = fx.options(10.0);
    options.session_id = Some("failing".to_string());

    let err = run_export(
        &encoder,
        &fx.config,
        &tracks,
        &catalog,
        options,
        None,
        CancelHandle::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExportError::EncoderProcessFailure { .. }));
    assert!(err.user_message().contains("scripted failure"));
    assert!(!fx.output().exists());
    assert!(!crate::core::fs::partial_output_path(&fx.output()).exists());
    assert!(!fx.sessions_dir().join("failing").exists());
}

#[tokio::test]
async fn cancelled_export_produces_nothing() {
    let fx = Fixture::new();
    let catalog = MediaCatalog::from_items([fx.video("m1", 1920, 1080)]);
    let tracks = vec![media_track(vec![TimelineElement::media("e1", "m1", 0.0, 10.0)])];
    let encoder = ScriptedEncoder::default();
    let cancel = CancelHandle::new();
    cancel.cancel();

    let err = run_export(
        &encoder,
        &fx.config,
        &tracks,
        &catalog,
        fx.options(10.0),
        None,
        cancel,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExportError::Cancelled));
    assert!(!fx.output().exists());
}

#[tokio::test]
async fn duplicate_session_id_is_rejected() {
    let fx = Fixture::new();
    let busy = ExportSession::create(&fx.config.temp_root(), Some("busy"))
        .await
        .unwrap();
    let catalog = MediaCatalog::from_items([fx.video("m1", 1920, 1080)]);
    let tracks = vec![media_track(vec![TimelineElement::media("e1", "m1", 0.0, 10.0)])];
    let mut options = fx.options(10.0);
    options.session_id = Some("busy".to_string());

    let err = run_export(
        &ScriptedEncoder::default(),
        &fx.config,
        &tracks,
        &catalog,
        options,
        None,
        CancelHandle::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExportError::SessionInUse(ref id) if id == "busy"));
    // The active session keeps its directory
    assert!(busy.temp_dir().exists());
}

#[tokio::test]
async fn progress_is_monotonic_from_start_to_complete() {
    let fx = Fixture::new();
    let catalog =
        MediaCatalog::from_items([fx.video("m1", 1920, 1080), fx.video("m2", 1280, 720)]);
    let tracks = vec![media_track(vec![
        TimelineElement::media("e1", "m1", 0.0, 5.0),
        TimelineElement::media("e2", "m2", 5.0, 5.0),
    ])];
    let (tx, mut rx) = mpsc::channel::<ExportProgress>(256);

    let result = run_export(
        &ScriptedEncoder::default(),
        &fx.config,
        &tracks,
        &catalog,
        fx.options(10.0),
        Some(tx),
        CancelHandle::new(),
    )
    .await
    .unwrap();
    assert_eq!(result.mode, ExportMode::NormalizeAndConcat { normalize: true });

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.len() >= 2);
    assert_eq!(events.first().unwrap().stage, ExportStage::Preparing);
    assert_eq!(events.first().unwrap().progress_percent, 0.0);
    assert_eq!(events.last().unwrap().stage, ExportStage::Complete);
    assert_eq!(events.last().unwrap().progress_percent, 100.0);
    assert!(events
        .windows(2)
        .all(|w| w[1].progress_percent >= w[0].progress_percent));
    assert!(events.iter().any(|e| e.stage == ExportStage::Normalizing));
}

#[tokio::test]
async fn unread_progress_channel_does_not_stall_export() {
    let fx = Fixture::new();
    let catalog =
        MediaCatalog::from_items([fx.video("m1", 1920, 1080), fx.video("m2", 1280, 720)]);
    let tracks = vec![media_track(vec![
        TimelineElement::media("e1", "m1", 0.0, 5.0),
        TimelineElement::media("e2", "m2", 5.0, 5.0),
    ])];
    let (tx, mut rx) = mpsc::channel::<ExportProgress>(1);

    let encoder = ScriptedEncoder::default();
    let export = run_export(
        &encoder,
        &fx.config,
        &tracks,
        &catalog,
        fx.options(10.0),
        Some(tx),
        CancelHandle::new(),
    );
    let result = tokio::time::timeout(Duration::from_secs(5), export)
        .await
        .expect("export stalled on a full progress channel")
        .unwrap();
    assert!(fx.output().exists());
    assert_eq!(result.mode, ExportMode::NormalizeAndConcat { normalize: true });

    // Intermediate events were dropped, completion still arrives
    let first = rx.recv().await.unwrap();
    assert_eq!(first.stage, ExportStage::Preparing);
    let last = rx.recv().await.unwrap();
    assert_eq!(last.stage, ExportStage::Complete);
    assert_eq!(last.progress_percent, 100.0);
}

#[tokio::test]
async fn inverted_duration_limits_clamp_to_minimum() {
    let mut fx = Fixture::new();
    fx.config.limits.min_duration_secs = 10.0;
    fx.config.limits.max_duration_secs = 5.0;
    let catalog = MediaCatalog::from_items([fx.video("m1", 1920, 1080)]);
    let tracks = vec![media_track(vec![TimelineElement::media("e1", "m1", 0.0, 10.0)])];

    let result = run_export(
        &ScriptedEncoder::default(),
        &fx.config,
        &tracks,
        &catalog,
        fx.options(7.0),
        None,
        CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.duration_sec, 10.0);
    assert!(fx.output().exists());
}

#[tokio::test]
async fn missing_encoder_fails_before_creating_anything() {
    let mut fx = Fixture::new();
    fx.config.encoder.ffmpeg_path = Some(PathBuf::from("/definitely/not/here/ffmpeg"));
    let catalog = MediaCatalog::from_items([fx.video("m1", 1920, 1080)]);
    let tracks = vec![media_track(vec![TimelineElement::media("e1", "m1", 0.0, 10.0)])];

    let err = export_timeline(
        &fx.config,
        &tracks,
        &catalog,
        fx.options(10.0),
        None,
        CancelHandle::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExportError::EncoderUnavailable(_)));
    assert!(!fx.sessions_dir().exists());
    assert!(!fx.config.temp_root().exists());
    assert!(!fx.output().exists());
    assert!(!fx.output().parent().unwrap().exists());
}
