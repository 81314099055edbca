//! Filter-graph escaping
//!
//! FFmpeg filtergraphs treat `:` and `,` as separators, `[`/`]` as pad labels,
//! `;` as a chain separator and `\` as the escape character. Everything a user
//! can type (text content, file names, colors) goes through these helpers
//! before it is spliced into a graph.
//!
//! All functions are total: any input string produces valid output.

use std::path::Path;

/// Escapes arbitrary user text for use as a `drawtext` `text=` value.
///
/// Backslash is escaped first so the escapes added for the other characters are
/// never doubled. Newlines become the two-character sequence `\n` and carriage
/// returns are dropped.
pub fn escape_filter_text(raw: &str) -> String {
    raw.replace('\\', r"\\")
        .replace(':', r"\:")
        .replace('[', r"\[")
        .replace(']', r"\]")
        .replace(',', r"\,")
        .replace(';', r"\;")
        .replace('\'', r"\'")
        .replace('%', r"\%")
        .replace('=', r"\=")
        .replace('\r', "")
        .replace('\n', r"\n")
}

/// Escapes a file-system path embedded as an unquoted filter argument
/// (`fontfile=`, `movie=`, `lut3d=` ...).
///
/// Same escape class as [`escape_filter_text`], plus spaces and parentheses.
pub fn escape_filter_path(raw: &str) -> String {
    raw.replace('\\', r"\\")
        .replace(':', r"\:")
        .replace('[', r"\[")
        .replace(']', r"\]")
        .replace(',', r"\,")
        .replace(';', r"\;")
        .replace('\'', r"\'")
        .replace('%', r"\%")
        .replace('=', r"\=")
        .replace(' ', r"\ ")
        .replace('(', r"\(")
        .replace(')', r"\)")
        .replace('\r', "")
        .replace('\n', "")
}

/// Converts an editor color (`#rrggbb`, `#rgb`, `#rrggbbaa`) to FFmpeg's `0x`
/// notation. Named colors pass through unchanged.
pub fn color_to_filter_color(color: &str) -> String {
    let trimmed = color.trim();
    let Some(hex) = trimmed.strip_prefix('#') else {
        if trimmed.is_empty() {
            return "white".to_string();
        }
        return trimmed.to_string();
    };

    if hex.len() == 3 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
        return format!("0x{expanded}");
    }

    format!("0x{hex}")
}

/// Quotes a path for a concat-demuxer list file (`file '<path>'`).
///
/// The list format only understands single-quoted strings, so embedded quotes
/// close the string, emit an escaped quote and reopen it.
pub fn escape_concat_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', r"'\''"))
}
