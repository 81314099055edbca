//! Text Utilities Module
//!
//! Font resolution and filter-graph escaping used by the text overlay builder.

pub mod escape;
pub mod fonts;

pub use escape::{color_to_filter_color, escape_concat_path, escape_filter_path, escape_filter_text};
pub use fonts::{resolve_font, FontConfig, WINDOWS_FONT_DIR};
