//! Sticker overlays
//!
//! Each sticker is scaled to its pixel size, optionally rotated and faded,
//! then overlaid onto the running composite. Stickers are painted in ascending
//! `zIndex`; the output of each overlay is the base of the next.

use super::{optional_timing_gate, FilterGraph};
use crate::core::effects::build_static_chain;
use crate::core::session::ExportContext;
use crate::core::sources::StickerSourceForFilter;

/// Builds the per-sticker chain body: scale, rotation, alpha, static effects.
pub fn build_sticker_chain(sticker: &StickerSourceForFilter) -> String {
    let width = sticker.width.round().max(1.0) as i64;
    let height = sticker.height.round().max(1.0) as i64;
    let mut filters = vec![format!("scale={width}:{height}")];

    let rotation = sticker.rotation.filter(|r| r.is_finite() && r.abs() > 1e-6);
    let opacity = sticker
        .opacity
        .filter(|o| o.is_finite())
        .map(|o| o.clamp(0.0, 1.0))
        .filter(|o| *o < 1.0);

    if rotation.is_some() || opacity.is_some() {
        filters.push("format=rgba".to_string());
    }
    if let Some(degrees) = rotation {
        let rad = degrees.to_radians();
        filters.push(format!(
            "rotate={rad:.6}:c=none:ow=rotw({rad:.6}):oh=roth({rad:.6})"
        ));
    }
    if let Some(alpha) = opacity {
        filters.push(format!("colorchannelmixer=aa={alpha:.3}"));
    }
    if let Some(effects) = build_static_chain(&sticker.effects) {
        filters.push(effects);
    }

    filters.join(",")
}

fn overlay_position(sticker: &StickerSourceForFilter) -> (String, String) {
    let rotated = sticker.rotation.is_some_and(|r| r.is_finite() && r.abs() > 1e-6);
    if rotated {
        // Rotation grows the bounding box; keep the sticker centre fixed.
        let cx = (sticker.x + sticker.width / 2.0).round() as i64;
        let cy = (sticker.y + sticker.height / 2.0).round() as i64;
        (format!("{cx}-overlay_w/2"), format!("{cy}-overlay_h/2"))
    } else {
        (
            format!("{}", sticker.x.round() as i64),
            format!("{}", sticker.y.round() as i64),
        )
    }
}

/// Overlays `stickers` onto `base` and returns the resulting label.
///
/// `first_input_index` is the encoder input index of `stickers[0]`; sticker
/// `i` is read from input `first_input_index + i`. Painting order is ascending
/// `zIndex` with ties in slice order, whatever order the slice is in.
pub fn apply_sticker_overlays(
    graph: &mut FilterGraph,
    stickers: &[StickerSourceForFilter],
    first_input_index: usize,
    base: &str,
    ctx: &ExportContext,
) -> String {
    let mut order: Vec<(usize, &StickerSourceForFilter)> = stickers.iter().enumerate().collect();
    order.sort_by_key(|(_, s)| s.z_index);

    let mut current = base.to_string();
    for (step, (slice_index, sticker)) in order.into_iter().enumerate() {
        let input = format!("{}:v", first_input_index + slice_index);
        let scaled = format!("stk{step}");
        graph.push(&[input.as_str()], &build_sticker_chain(sticker), &scaled);

        let (x, y) = overlay_position(sticker);
        let mut overlay = format!("overlay=x={x}:y={y}");
        if let Some(gate) = optional_timing_gate(sticker.start_time, sticker.end_time, ctx.duration)
        {
            overlay.push(':');
            overlay.push_str(&gate);
        }

        let label = format!("ov{step}");
        graph.push(&[current.as_str(), scaled.as_str()], &overlay, &label);
        current = label;
    }
    current
}
