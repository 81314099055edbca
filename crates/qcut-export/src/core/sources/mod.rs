//! Source Resolver
//!
//! Turns timeline elements into encoder-ready inputs with on-disk paths.
//! Catalog entries with an existing local path are used verbatim; blob-only
//! entries are written into the session directory as
//! `<sessionId>_<sanitized filename>`. Elements whose media cannot be resolved
//! are skipped with a warning and recorded in [`ResolvedSources::skipped`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::effects::Effect;
use crate::core::fs::sanitize_file_component;
use crate::core::session::ExportContext;
use crate::core::timeline::{
    ElementPayload, MediaCatalog, MediaItem, MediaKind, TimelineElement, TimelineTrack,
    VideoProfile,
};
use crate::core::{CoreResult, ElementId, ExportError, MediaId, TimeSec};

// =============================================================================
// Resolved Inputs
// =============================================================================

/// Kind of visual source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Video,
    Image,
}

/// A resolved video or still-image clip
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSourceInput {
    pub element_id: ElementId,
    pub path: PathBuf,
    pub kind: SourceKind,
    pub start_time: TimeSec,
    /// Untrimmed duration
    pub duration: TimeSec,
    pub trim_start: TimeSec,
    pub trim_end: TimeSec,
    pub muted: bool,
    pub volume: f64,
    pub profile: Option<VideoProfile>,
    pub effects: Vec<Effect>,
    pub track_index: usize,
    pub element_index: usize,
}

impl VideoSourceInput {
    /// Visible duration after trims
    pub fn effective_duration(&self) -> TimeSec {
        (self.duration - self.trim_start - self.trim_end).max(0.0)
    }

    pub fn end_time(&self) -> TimeSec {
        self.start_time + self.effective_duration()
    }

    /// Whether the source contributes an audio stream to the mix.
    ///
    /// Only sources known to carry audio are mixed; mapping a missing stream
    /// would make the encoder fail.
    pub fn contributes_audio(&self) -> bool {
        self.kind == SourceKind::Video
            && !self.muted
            && self.volume > 0.0
            && self.profile.as_ref().and_then(|p| p.has_audio) == Some(true)
    }
}

/// A resolved separate audio clip
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFileInput {
    pub element_id: ElementId,
    pub path: PathBuf,
    pub start_time: TimeSec,
    pub volume: f64,
    pub trim_start: TimeSec,
    /// Visible duration after trims
    pub duration: TimeSec,
}

/// A resolved sticker in pixel space
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerSourceForFilter {
    pub id: ElementId,
    pub path: PathBuf,
    /// Top-left corner (px)
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub start_time: TimeSec,
    pub end_time: TimeSec,
    pub z_index: i32,
    pub opacity: Option<f64>,
    /// Degrees
    pub rotation: Option<f64>,
    #[serde(default)]
    pub effects: Vec<Effect>,
}

/// An element dropped because its media could not be resolved
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedSource {
    pub element_id: ElementId,
    pub media_id: MediaId,
    pub reason: String,
}

/// Everything the graph builder and orchestrator need from the timeline
#[derive(Clone, Debug, Default)]
pub struct ResolvedSources {
    /// Sorted by start time (ties keep track/element order)
    pub videos: Vec<VideoSourceInput>,
    pub audios: Vec<AudioFileInput>,
    /// Sorted ascending by zIndex (ties keep track/element order)
    pub stickers: Vec<StickerSourceForFilter>,
    pub skipped: Vec<SkippedSource>,
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves timeline media to on-disk paths for one export session
pub struct SourceResolver<'a> {
    ctx: &'a ExportContext,
    catalog: &'a MediaCatalog,
    /// media id -> materialized or verified path
    resolved_paths: BTreeMap<MediaId, PathBuf>,
    /// file name -> media id that claimed it
    claimed_names: BTreeMap<String, MediaId>,
}

impl<'a> SourceResolver<'a> {
    pub fn new(ctx: &'a ExportContext, catalog: &'a MediaCatalog) -> Self {
        Self {
            ctx,
            catalog,
            resolved_paths: BTreeMap::new(),
            claimed_names: BTreeMap::new(),
        }
    }

    /// Resolves every media-bearing element on visible tracks.
    pub async fn resolve(mut self, tracks: &[TimelineTrack]) -> CoreResult<ResolvedSources> {
        let mut sources = ResolvedSources::default();

        for (track_index, track) in tracks.iter().enumerate() {
            if track.hidden {
                continue;
            }
            for (element_index, element) in track.elements.iter().enumerate() {
                if element.hidden || element.effective_duration() <= 0.0 {
                    continue;
                }
                let Some(media_id) = element.media_id() else {
                    continue;
                };

                let (item, path) = match self.resolve_media(element, media_id).await {
                    Ok(resolved) => resolved,
                    Err(ExportError::SourceUnavailable {
                        element_id,
                        media_id,
                        reason,
                    }) => {
                        warn!(
                            element_id = %element_id,
                            media_id = %media_id,
                            reason = %reason,
                            "Skipping element with unavailable source"
                        );
                        sources.skipped.push(SkippedSource {
                            element_id,
                            media_id,
                            reason,
                        });
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                self.push_input(
                    &mut sources,
                    track,
                    track_index,
                    element_index,
                    element,
                    item,
                    path,
                );
            }
        }

        sources
            .videos
            .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        sources.stickers.sort_by_key(|s| s.z_index);
        sources
            .audios
            .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        info!(
            videos = sources.videos.len(),
            audios = sources.audios.len(),
            stickers = sources.stickers.len(),
            skipped = sources.skipped.len(),
            "Sources resolved"
        );
        Ok(sources)
    }

    #[allow(clippy::too_many_arguments)]
    fn push_input(
        &self,
        sources: &mut ResolvedSources,
        track: &TimelineTrack,
        track_index: usize,
        element_index: usize,
        element: &TimelineElement,
        item: &MediaItem,
        path: PathBuf,
    ) {
        match &element.payload {
            ElementPayload::Media(media) if item.kind == MediaKind::Audio => {
                if track.muted || media.muted {
                    return;
                }
                sources.audios.push(AudioFileInput {
                    element_id: element.id.clone(),
                    path,
                    start_time: element.start_time,
                    volume: media.volume,
                    trim_start: element.trim_start,
                    duration: element.effective_duration(),
                });
            }
            ElementPayload::Media(media) => {
                let kind = if item.kind == MediaKind::Image {
                    SourceKind::Image
                } else {
                    SourceKind::Video
                };
                sources.videos.push(VideoSourceInput {
                    element_id: element.id.clone(),
                    path,
                    kind,
                    start_time: element.start_time,
                    duration: element.duration,
                    trim_start: element.trim_start.max(0.0),
                    trim_end: element.trim_end.max(0.0),
                    muted: track.muted || media.muted,
                    volume: media.volume.max(0.0),
                    profile: item.profile(),
                    effects: element.effects.clone(),
                    track_index,
                    element_index,
                });
            }
            ElementPayload::Audio(audio) => {
                if track.muted {
                    return;
                }
                sources.audios.push(AudioFileInput {
                    element_id: element.id.clone(),
                    path,
                    start_time: element.start_time,
                    volume: audio.volume.max(0.0),
                    trim_start: element.trim_start.max(0.0),
                    duration: element.effective_duration(),
                });
            }
            ElementPayload::Sticker(sticker) => {
                let (x, y, width, height) = sticker.pixel_rect(self.ctx.canvas);
                let opacity = sticker.opacity.clamp(0.0, 1.0);
                sources.stickers.push(StickerSourceForFilter {
                    id: element.id.clone(),
                    path,
                    x,
                    y,
                    width,
                    height,
                    start_time: element.start_time,
                    end_time: element.end_time(),
                    z_index: sticker.z_index,
                    opacity: (opacity < 1.0).then_some(opacity),
                    rotation: (sticker.rotation.is_finite() && sticker.rotation.abs() > 1e-6)
                        .then_some(sticker.rotation),
                    effects: element.effects.clone(),
                });
            }
            ElementPayload::Text(_) => {}
        }
    }

    async fn resolve_media(
        &mut self,
        element: &TimelineElement,
        media_id: &str,
    ) -> CoreResult<(&'a MediaItem, PathBuf)> {
        let unavailable = |reason: &str| ExportError::SourceUnavailable {
            element_id: element.id.clone(),
            media_id: media_id.to_string(),
            reason: reason.to_string(),
        };

        let catalog = self.catalog;
        let item = catalog
            .get(media_id)
            .ok_or_else(|| unavailable("media not found in catalog"))?;

        if let Some(path) = self.resolved_paths.get(media_id) {
            return Ok((item, path.clone()));
        }

        if let Some(local) = &item.local_path {
            if tokio::fs::try_exists(local).await.unwrap_or(false) {
                self.resolved_paths
                    .insert(media_id.to_string(), local.clone());
                return Ok((item, local.clone()));
            }
            debug!(media_id, path = %local.display(), "Local path missing, trying blob");
        }

        let Some(blob) = item.blob.as_deref() else {
            return Err(unavailable(if item.local_path.is_some() {
                "local file does not exist and no blob data is available"
            } else {
                "no local path or blob data"
            }));
        };

        let path = self.materialized_path(item);
        tokio::fs::write(&path, blob).await?;
        debug!(
            media_id,
            bytes = blob.len(),
            path = %path.display(),
            "Materialized blob source"
        );
        self.resolved_paths
            .insert(media_id.to_string(), path.clone());
        Ok((item, path))
    }

    /// `<tempDir>/<sessionId>_<sanitized name>`; the media id is inserted when
    /// two different media share a file name.
    fn materialized_path(&mut self, item: &MediaItem) -> PathBuf {
        let base = if item.name.trim().is_empty() {
            format!("{}.bin", item.id)
        } else {
            item.name.clone()
        };
        let mut file_name = format!(
            "{}_{}",
            self.ctx.session_id,
            sanitize_file_component(&base)
        );
        if let Some(owner) = self.claimed_names.get(&file_name) {
            if owner != &item.id {
                file_name = format!(
                    "{}_{}_{}",
                    self.ctx.session_id,
                    sanitize_file_component(&item.id),
                    sanitize_file_component(&base)
                );
            }
        }
        self.claimed_names.insert(file_name.clone(), item.id.clone());
        self.ctx.temp_dir.join(file_name)
    }
}

/// Convenience wrapper around [`SourceResolver`].
pub async fn resolve_sources(
    ctx: &ExportContext,
    tracks: &[TimelineTrack],
    catalog: &MediaCatalog,
) -> CoreResult<ResolvedSources> {
    SourceResolver::new(ctx, catalog).resolve(tracks).await
}

/// True when `path` lies inside the session directory (materialized blob).
pub fn is_session_file(ctx: &ExportContext, path: &Path) -> bool {
    path.starts_with(&ctx.temp_dir)
}
