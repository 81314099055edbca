//! Text overlays
//!
//! One `drawtext` per visible text element. Overlays are ordered by
//! `(trackIndex, elementIndex)`; unlike stickers, `zIndex` plays no part.

use tracing::warn;

use super::{format_seconds, timing_gate, FilterGraph};
use crate::core::session::ExportContext;
use crate::core::text::{color_to_filter_color, escape_filter_text, resolve_font};
use crate::core::timeline::{ElementPayload, TextAlign, TextElement, TimelineTrack};
use crate::core::{ElementId, TimeSec};

/// Border width drawn around every glyph for legibility
const TEXT_BORDER_WIDTH: u32 = 2;

/// Padding of the optional background box
const TEXT_BOX_BORDER: u32 = 10;

/// How a text overlay is placed onto the composite
#[derive(Clone, Debug, PartialEq)]
pub enum TextPlacement {
    /// Drawn directly onto the running composite
    Inline,
    /// Drawn centred on a transparent canvas-sized layer which is rotated and
    /// overlaid so the layer centre lands on the text anchor
    Rotated {
        radians: f64,
        offset_x: f64,
        offset_y: f64,
    },
}

/// A compiled text overlay
#[derive(Clone, Debug, PartialEq)]
pub struct TextOverlay {
    pub element_id: ElementId,
    pub track_index: usize,
    pub element_index: usize,
    /// Complete `drawtext=...` filter
    pub drawtext: String,
    pub placement: TextPlacement,
}

/// Collects every renderable text element in `(trackIndex, elementIndex)` order.
pub fn collect_text_overlays(tracks: &[TimelineTrack], ctx: &ExportContext) -> Vec<TextOverlay> {
    let mut overlays = Vec::new();

    for (track_index, track) in tracks.iter().enumerate() {
        if track.hidden {
            continue;
        }
        for (element_index, element) in track.elements.iter().enumerate() {
            let ElementPayload::Text(text) = &element.payload else {
                continue;
            };
            if element.hidden || text.content.trim().is_empty() {
                continue;
            }

            let start = element.start_time + element.trim_start;
            let end = element.start_time + element.duration - element.trim_end;
            if !start.is_finite() || !end.is_finite() || end <= start {
                continue;
            }
            if !element.effects.is_empty() {
                warn!(
                    element_id = %element.id,
                    "Effects on text elements are not exported"
                );
            }

            let rotated = text.rotation.is_finite() && text.rotation.abs() > 1e-6;
            let (drawtext, placement) = if rotated {
                (
                    build_drawtext(text, (0.0, 0.0), start, end, ctx),
                    TextPlacement::Rotated {
                        radians: text.rotation.to_radians(),
                        offset_x: text.x,
                        offset_y: text.y,
                    },
                )
            } else {
                (
                    build_drawtext(text, (text.x, text.y), start, end, ctx),
                    TextPlacement::Inline,
                )
            };

            overlays.push(TextOverlay {
                element_id: element.id.clone(),
                track_index,
                element_index,
                drawtext,
                placement,
            });
        }
    }

    overlays.sort_by_key(|o| (o.track_index, o.element_index));
    overlays
}

/// Builds one `drawtext` filter.
///
/// `offset` is the pixel offset of the text anchor from the canvas centre.
pub fn build_drawtext(
    text: &TextElement,
    offset: (f64, f64),
    start: TimeSec,
    end: TimeSec,
    ctx: &ExportContext,
) -> String {
    let font = resolve_font(
        &text.font_family,
        Some(text.font_weight.as_str()),
        Some(text.font_style.as_str()),
        ctx.platform,
    );

    let font_size = if text.font_size.is_finite() {
        text.font_size.round().max(1.0) as u32
    } else {
        48
    };

    let mut font_color = color_to_filter_color(&text.color);
    let opacity = if text.opacity.is_finite() {
        text.opacity.clamp(0.0, 1.0)
    } else {
        1.0
    };
    if opacity < 1.0 {
        font_color = format!("{font_color}@{opacity:.2}");
    }

    let (dx, dy) = offset;
    let x = match text.text_align {
        TextAlign::Center => format!("(w-text_w)/2{}", signed(dx)),
        TextAlign::Left => format!("w/2{}", signed(dx)),
        TextAlign::Right => format!("w/2{}-text_w", signed(dx)),
    };
    let y = format!("(h-text_h)/2{}", signed(dy));

    let mut parts = vec![
        format!("drawtext=text={}", escape_filter_text(&text.content)),
        font.to_filter_option(),
        format!("fontsize={font_size}"),
        format!("fontcolor={font_color}"),
        format!("x={x}"),
        format!("y={y}"),
        format!("borderw={TEXT_BORDER_WIDTH}"),
        "bordercolor=black".to_string(),
    ];

    if let Some(background) = text
        .background_color
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("transparent"))
    {
        parts.push("box=1".to_string());
        parts.push(format!("boxcolor={}", color_to_filter_color(background)));
        parts.push(format!("boxborderw={TEXT_BOX_BORDER}"));
    }

    parts.push(timing_gate(start, end));
    parts.join(":")
}

fn signed(value: f64) -> String {
    let v = if value.is_finite() { value.round() as i64 } else { 0 };
    if v < 0 {
        format!("-{}", -v)
    } else {
        format!("+{v}")
    }
}

/// Applies overlays onto `base`, returning the label of the result.
///
/// Consecutive inline overlays share one comma-joined chain.
pub fn apply_text_overlays(
    graph: &mut FilterGraph,
    overlays: &[TextOverlay],
    base: &str,
    ctx: &ExportContext,
) -> String {
    let mut current = base.to_string();
    let mut pending: Vec<&str> = Vec::new();
    let mut step = 0usize;

    for overlay in overlays {
        match &overlay.placement {
            TextPlacement::Inline => pending.push(&overlay.drawtext),
            TextPlacement::Rotated {
                radians,
                offset_x,
                offset_y,
            } => {
                flush_inline(graph, &mut pending, &mut current, &mut step);

                let layer = format!("txtlayer{step}");
                let body = format!(
                    "color=c=black@0.0:s={}x{}:r={}:d={},format=rgba,{},rotate=a={:.6}:c=none",
                    ctx.canvas.width,
                    ctx.canvas.height,
                    format_rate(ctx.fps),
                    format_seconds(ctx.duration),
                    overlay.drawtext,
                    radians
                );
                graph.push(&[], &body, &layer);

                let label = format!("txt{step}");
                graph.push(
                    &[current.as_str(), layer.as_str()],
                    &format!(
                        "overlay=x={}:y={}",
                        offset_x.round() as i64,
                        offset_y.round() as i64
                    ),
                    &label,
                );
                current = label;
                step += 1;
            }
        }
    }
    flush_inline(graph, &mut pending, &mut current, &mut step);

    current
}

fn flush_inline(
    graph: &mut FilterGraph,
    pending: &mut Vec<&str>,
    current: &mut String,
    step: &mut usize,
) {
    if pending.is_empty() {
        return;
    }
    let label = format!("txt{}", *step);
    graph.push(&[current.as_str()], &pending.join(","), &label);
    pending.clear();
    *current = label;
    *step += 1;
}

/// Frame rate as a filter argument (`30`, `29.97`).
pub(crate) fn format_rate(fps: f64) -> String {
    if (fps - fps.round()).abs() < 1e-6 {
        format!("{}", fps.round() as i64)
    } else {
        format!("{:.3}", fps)
    }
}
