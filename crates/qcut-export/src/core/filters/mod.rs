//! Filter Graph Builder
//!
//! Compiles resolved sources, text overlays, stickers and static effects into
//! one `-filter_complex` graph.
//!
//! # Modules
//!
//! - `text_overlay`: `drawtext` chains for text elements
//! - `sticker_overlay`: scaled/rotated image overlays in zIndex order
//! - `composition`: the full graph for the filter-composition export mode

mod composition;
mod sticker_overlay;
mod text_overlay;

pub use composition::{
    build_composition, plan_segments, CompositionPlan, SegmentKind, TimelineSegment, AUDIO_OUT,
    VIDEO_OUT,
};
pub use sticker_overlay::{apply_sticker_overlays, build_sticker_chain};
pub(crate) use text_overlay::format_rate;
pub use text_overlay::{
    apply_text_overlays, build_drawtext, collect_text_overlays, TextOverlay, TextPlacement,
};

/// A list of labelled filter chains joined with `;`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterGraph {
    chains: Vec<String>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `[in0][in1]body[out]`. Labels are given without brackets.
    pub fn push(&mut self, inputs: &[&str], body: &str, output: &str) {
        let mut chain = String::new();
        for input in inputs {
            chain.push('[');
            chain.push_str(input);
            chain.push(']');
        }
        chain.push_str(body);
        chain.push('[');
        chain.push_str(output);
        chain.push(']');
        self.chains.push(chain);
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn chains(&self) -> &[String] {
        &self.chains
    }

    /// Renders the graph as the encoder expects it.
    pub fn render(&self) -> String {
        self.chains.join(";")
    }
}

/// Seconds with millisecond precision, as used in filter arguments.
pub fn format_seconds(value: f64) -> String {
    let v = if value.is_finite() { value.max(0.0) } else { 0.0 };
    format!("{:.3}", v)
}

/// `enable` expression gating a filter to `[start, end]`.
pub fn timing_gate(start: f64, end: f64) -> String {
    format!(
        "enable='between(t,{},{})'",
        format_seconds(start),
        format_seconds(end)
    )
}

/// Gate only when `[start, end]` actually constrains a timeline of `total` seconds.
pub fn optional_timing_gate(start: f64, end: f64, total: f64) -> Option<String> {
    if start <= 1e-3 && end + 1e-3 >= total {
        None
    } else {
        Some(timing_gate(start, end))
    }
}
