//! Timeline Models
//!
//! The finished timeline as handed over by the editor. The export engine only
//! reads these structures; track order is the visual z-order (index 0 is the
//! background).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::effects::Effect;
use crate::core::{Canvas, ElementId, MediaId, TimeSec, TrackId, TIME_EPSILON};

// =============================================================================
// Tracks
// =============================================================================

/// Track kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Media,
    Text,
    Sticker,
    Audio,
}

/// One timeline track
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineTrack {
    pub id: TrackId,
    #[serde(default)]
    pub name: String,
    pub kind: TrackKind,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub elements: Vec<TimelineElement>,
}

impl TimelineTrack {
    pub fn new(id: &str, kind: TrackKind) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            kind,
            muted: false,
            hidden: false,
            elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, element: TimelineElement) -> Self {
        self.elements.push(element);
        self
    }
}

// =============================================================================
// Elements
// =============================================================================

/// One element on a track
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineElement {
    pub id: ElementId,
    #[serde(default)]
    pub name: String,
    /// Timeline position (seconds)
    pub start_time: TimeSec,
    /// Untrimmed duration (seconds)
    pub duration: TimeSec,
    #[serde(default)]
    pub trim_start: TimeSec,
    #[serde(default)]
    pub trim_end: TimeSec,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub effects: Vec<Effect>,
    /// Type-specific payload, discriminated by `type`
    #[serde(flatten)]
    pub payload: ElementPayload,
}

/// Type-specific element data
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementPayload {
    Media(MediaElement),
    Text(TextElement),
    Sticker(StickerElement),
    Audio(AudioElement),
}

impl TimelineElement {
    fn with_payload(id: &str, start_time: f64, duration: f64, payload: ElementPayload) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            start_time,
            duration,
            trim_start: 0.0,
            trim_end: 0.0,
            hidden: false,
            effects: Vec::new(),
            payload,
        }
    }

    pub fn media(id: &str, media_id: &str, start_time: f64, duration: f64) -> Self {
        Self::with_payload(
            id,
            start_time,
            duration,
            ElementPayload::Media(MediaElement {
                media_id: media_id.to_string(),
                muted: false,
                volume: 1.0,
            }),
        )
    }

    pub fn text(id: &str, content: &str, start_time: f64, duration: f64) -> Self {
        Self::with_payload(
            id,
            start_time,
            duration,
            ElementPayload::Text(TextElement {
                content: content.to_string(),
                ..TextElement::default()
            }),
        )
    }

    pub fn sticker(id: &str, media_id: &str, start_time: f64, duration: f64, z_index: i32) -> Self {
        Self::with_payload(
            id,
            start_time,
            duration,
            ElementPayload::Sticker(StickerElement {
                media_id: media_id.to_string(),
                z_index,
                ..StickerElement::default()
            }),
        )
    }

    pub fn audio(id: &str, media_id: &str, start_time: f64, duration: f64) -> Self {
        Self::with_payload(
            id,
            start_time,
            duration,
            ElementPayload::Audio(AudioElement {
                media_id: media_id.to_string(),
                volume: 1.0,
            }),
        )
    }

    pub fn with_trim(mut self, trim_start: f64, trim_end: f64) -> Self {
        self.trim_start = trim_start;
        self.trim_end = trim_end;
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Visible duration: `duration - trimStart - trimEnd`, floored at 0.
    pub fn effective_duration(&self) -> TimeSec {
        let d = self.duration - self.trim_start.max(0.0) - self.trim_end.max(0.0);
        if d.is_finite() {
            d.max(0.0)
        } else {
            0.0
        }
    }

    /// Timeline position where the element stops being visible.
    pub fn end_time(&self) -> TimeSec {
        self.start_time + self.effective_duration()
    }

    /// Enabled effects in application order.
    pub fn active_effects(&self) -> Vec<&Effect> {
        let mut effects: Vec<&Effect> = self.effects.iter().filter(|e| e.enabled).collect();
        effects.sort_by_key(|e| e.order);
        effects
    }

    pub fn media_id(&self) -> Option<&MediaId> {
        match &self.payload {
            ElementPayload::Media(m) => Some(&m.media_id),
            ElementPayload::Sticker(s) => Some(&s.media_id),
            ElementPayload::Audio(a) => Some(&a.media_id),
            ElementPayload::Text(_) => None,
        }
    }

    pub fn is_active_at(&self, time: TimeSec) -> bool {
        time + TIME_EPSILON >= self.start_time && time < self.end_time()
    }
}

/// Video or image clip
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaElement {
    pub media_id: MediaId,
    #[serde(default)]
    pub muted: bool,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

/// Separate audio clip
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioElement {
    pub media_id: MediaId,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

fn default_volume() -> f64 {
    1.0
}

/// Horizontal text alignment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

/// Text overlay element
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextElement {
    pub content: String,
    pub font_family: String,
    pub font_size: f64,
    pub color: String,
    pub background_color: Option<String>,
    pub text_align: TextAlign,
    pub font_weight: String,
    pub font_style: String,
    /// Pixel offset from canvas centre
    pub x: f64,
    pub y: f64,
    /// Degrees, clockwise
    pub rotation: f64,
    pub opacity: f64,
}

impl Default for TextElement {
    fn default() -> Self {
        Self {
            content: String::new(),
            font_family: "Arial".to_string(),
            font_size: 48.0,
            color: "#ffffff".to_string(),
            background_color: None,
            text_align: TextAlign::Center,
            font_weight: "normal".to_string(),
            font_style: "normal".to_string(),
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            opacity: 1.0,
        }
    }
}

/// Percent coordinates of a sticker centre
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PercentPoint {
    pub x: f64,
    pub y: f64,
}

/// Percent size relative to the canvas
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PercentSize {
    pub width: f64,
    pub height: f64,
}

/// Image overlay element
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StickerElement {
    pub media_id: MediaId,
    pub position: PercentPoint,
    pub size: PercentSize,
    pub rotation: f64,
    pub opacity: f64,
    pub z_index: i32,
}

impl Default for StickerElement {
    fn default() -> Self {
        Self {
            media_id: String::new(),
            position: PercentPoint { x: 50.0, y: 50.0 },
            size: PercentSize {
                width: 20.0,
                height: 20.0,
            },
            rotation: 0.0,
            opacity: 1.0,
            z_index: 0,
        }
    }
}

impl StickerElement {
    /// Pixel-space `(x, y, width, height)` of the top-left corner and size.
    pub fn pixel_rect(&self, canvas: Canvas) -> (f64, f64, f64, f64) {
        let width = canvas.percent_x(self.size.width.max(0.0)).round().max(1.0);
        let height = canvas.percent_y(self.size.height.max(0.0)).round().max(1.0);
        let x = (canvas.percent_x(self.position.x) - width / 2.0).round();
        let y = (canvas.percent_y(self.position.y) - height / 2.0).round();
        (x, y, width, height)
    }
}

// =============================================================================
// Media Catalog
// =============================================================================

/// Media kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

/// Encoding profile of a video stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProfile {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    #[serde(default)]
    pub has_audio: Option<bool>,
}

impl VideoProfile {
    /// Target codec for stream-copy compatibility
    pub const TARGET_CODEC: &'static str = "h264";

    /// True when a stream with this profile can be copied into the output as-is.
    pub fn matches_target(&self, canvas: Canvas, fps: f64) -> bool {
        self.width == canvas.width
            && self.height == canvas.height
            && (self.fps - fps).abs() < 0.01
            && self.codec.eq_ignore_ascii_case(Self::TARGET_CODEC)
    }

    /// True when two sources can be concatenated without re-encoding.
    pub fn same_stream_layout(&self, other: &VideoProfile) -> bool {
        self.width == other.width
            && self.height == other.height
            && (self.fps - other.fps).abs() < 0.01
            && self.codec.eq_ignore_ascii_case(&other.codec)
            && self.has_audio == other.has_audio
    }
}

/// Catalog entry for a media asset
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: MediaId,
    #[serde(default)]
    pub name: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    /// In-memory bytes for assets that never touched disk
    #[serde(default, skip_serializing)]
    pub blob: Option<Vec<u8>>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub has_audio: Option<bool>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl MediaItem {
    pub fn new(id: &str, name: &str, kind: MediaKind) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            local_path: None,
            blob: None,
            width: None,
            height: None,
            fps: None,
            codec: None,
            has_audio: None,
            duration: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn with_blob(mut self, bytes: Vec<u8>) -> Self {
        self.blob = Some(bytes);
        self
    }

    pub fn with_profile(mut self, profile: VideoProfile) -> Self {
        self.width = Some(profile.width);
        self.height = Some(profile.height);
        self.fps = Some(profile.fps);
        self.codec = Some(profile.codec);
        self.has_audio = profile.has_audio;
        self
    }

    /// Full video profile, when the catalog carries all of its fields.
    pub fn profile(&self) -> Option<VideoProfile> {
        if self.kind != MediaKind::Video {
            return None;
        }
        Some(VideoProfile {
            width: self.width?,
            height: self.height?,
            fps: self.fps.filter(|f| f.is_finite() && *f > 0.0)?,
            codec: self.codec.clone()?,
            has_audio: self.has_audio,
        })
    }
}

/// Media lookup by id
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaCatalog {
    items: BTreeMap<MediaId, MediaItem>,
}

impl MediaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = MediaItem>) -> Self {
        Self {
            items: items.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn insert(&mut self, item: MediaItem) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn get(&self, id: &str) -> Option<&MediaItem> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// End of the last visible element on a visible track.
pub fn timeline_duration(tracks: &[TimelineTrack]) -> TimeSec {
    tracks
        .iter()
        .filter(|t| !t.hidden)
        .flat_map(|t| t.elements.iter())
        .filter(|e| !e.hidden)
        .map(|e| e.end_time())
        .fold(0.0, f64::max)
}
