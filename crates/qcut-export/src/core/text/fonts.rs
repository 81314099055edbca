//! Font resolution for `drawtext`
//!
//! Linux and macOS builds of FFmpeg resolve fonts through fontconfig, so a
//! family name plus style is enough. Windows builds need an explicit font file.

use serde::{Deserialize, Serialize};

use super::escape::{escape_filter_path, escape_filter_text};
use crate::core::Platform;

/// Windows system font directory (forward slashes are accepted by FFmpeg)
pub const WINDOWS_FONT_DIR: &str = "C:/Windows/Fonts";

/// Family used when none is requested
const DEFAULT_FAMILY: &str = "Arial";

/// Encoder font reference
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FontConfig {
    /// fontconfig pattern such as `Liberation Sans:style=Bold`
    #[serde(rename_all = "camelCase")]
    Fontconfig { font_name: String },
    /// Explicit font file
    #[serde(rename_all = "camelCase")]
    FontFile { font_path: String },
}

impl FontConfig {
    /// Renders the `drawtext` option selecting this font.
    pub fn to_filter_option(&self) -> String {
        match self {
            FontConfig::Fontconfig { font_name } => {
                format!("font={}", escape_filter_text(font_name))
            }
            FontConfig::FontFile { font_path } => {
                format!("fontfile={}", escape_filter_path(font_path))
            }
        }
    }

    pub fn uses_fontconfig(&self) -> bool {
        matches!(self, FontConfig::Fontconfig { .. })
    }
}

/// Windows file variants: regular, bold, italic, bold-italic
struct WindowsFontFiles {
    regular: &'static str,
    bold: &'static str,
    italic: &'static str,
    bold_italic: &'static str,
}

const ARIAL_FILES: WindowsFontFiles = WindowsFontFiles {
    regular: "arial.ttf",
    bold: "arialbd.ttf",
    italic: "ariali.ttf",
    bold_italic: "arialbi.ttf",
};

fn windows_font_files(family: &str) -> Option<WindowsFontFiles> {
    let files = match family.to_ascii_lowercase().as_str() {
        "arial" | "helvetica" | "liberation sans" | "sans-serif" => ARIAL_FILES,
        "times new roman" | "times" | "liberation serif" | "serif" => WindowsFontFiles {
            regular: "times.ttf",
            bold: "timesbd.ttf",
            italic: "timesi.ttf",
            bold_italic: "timesbi.ttf",
        },
        "courier new" | "courier" | "liberation mono" | "monospace" => WindowsFontFiles {
            regular: "cour.ttf",
            bold: "courbd.ttf",
            italic: "couri.ttf",
            bold_italic: "courbi.ttf",
        },
        "verdana" => WindowsFontFiles {
            regular: "verdana.ttf",
            bold: "verdanab.ttf",
            italic: "verdanai.ttf",
            bold_italic: "verdanaz.ttf",
        },
        "georgia" => WindowsFontFiles {
            regular: "georgia.ttf",
            bold: "georgiab.ttf",
            italic: "georgiai.ttf",
            bold_italic: "georgiaz.ttf",
        },
        "segoe ui" => WindowsFontFiles {
            regular: "segoeui.ttf",
            bold: "segoeuib.ttf",
            italic: "segoeuii.ttf",
            bold_italic: "segoeuiz.ttf",
        },
        _ => return None,
    };
    Some(files)
}

/// Maps web/editor family names to families that actually exist on the platform.
fn fontconfig_family(family: &str, platform: Platform) -> String {
    let lower = family.to_ascii_lowercase();
    let alias = match (platform, lower.as_str()) {
        (Platform::Linux, "arial" | "helvetica" | "sans-serif") => Some("Liberation Sans"),
        (Platform::Linux, "times new roman" | "times" | "serif") => Some("Liberation Serif"),
        (Platform::Linux, "courier new" | "courier" | "monospace") => Some("Liberation Mono"),
        (Platform::Linux, "verdana") => Some("DejaVu Sans"),
        (Platform::Linux, "georgia") => Some("DejaVu Serif"),
        (Platform::Macos, "arial" | "liberation sans" | "sans-serif") => Some("Helvetica"),
        (Platform::Macos, "times new roman" | "liberation serif" | "serif") => Some("Times"),
        (Platform::Macos, "courier new" | "liberation mono" | "monospace") => Some("Courier"),
        _ => None,
    };
    alias.map(str::to_string).unwrap_or_else(|| family.to_string())
}

fn is_bold(weight: Option<&str>) -> bool {
    match weight.map(str::trim) {
        Some(w) if w.eq_ignore_ascii_case("bold") || w.eq_ignore_ascii_case("bolder") => true,
        Some(w) => w.parse::<u32>().map(|n| n >= 600).unwrap_or(false),
        None => false,
    }
}

fn is_italic(style: Option<&str>) -> bool {
    matches!(
        style.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("italic") | Some("oblique")
    )
}

/// Resolves a logical font family plus weight/style to an encoder font reference.
///
/// Deterministic: the platform is an argument, never read from the environment.
pub fn resolve_font(
    family: &str,
    weight: Option<&str>,
    style: Option<&str>,
    platform: Platform,
) -> FontConfig {
    let family = match family.trim() {
        "" => DEFAULT_FAMILY,
        trimmed => trimmed,
    };
    let bold = is_bold(weight);
    let italic = is_italic(style);

    if platform.is_windows() {
        let files = windows_font_files(family).unwrap_or_else(|| {
            tracing::debug!(family, "No Windows font mapping, using default family");
            ARIAL_FILES
        });
        let file = match (bold, italic) {
            (true, true) => files.bold_italic,
            (true, false) => files.bold,
            (false, true) => files.italic,
            (false, false) => files.regular,
        };
        return FontConfig::FontFile {
            font_path: format!("{WINDOWS_FONT_DIR}/{file}"),
        };
    }

    let name = fontconfig_family(family, platform);
    let style = match (bold, italic) {
        (true, true) => Some("Bold Italic"),
        (true, false) => Some("Bold"),
        (false, true) => Some("Italic"),
        (false, false) => None,
    };

    FontConfig::Fontconfig {
        font_name: match style {
            Some(style) => format!("{name}:style={style}"),
            None => name,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arial_bold_italic_on_windows_uses_bold_italic_file() {
        let font = resolve_font("Arial", Some("bold"), Some("italic"), Platform::Windows);
        assert_eq!(
            font,
            FontConfig::FontFile {
                font_path: "C:/Windows/Fonts/arialbi.ttf".to_string()
            }
        );
    }

    #[test]
    fn arial_bold_italic_on_linux_maps_to_liberation_sans() {
        let font = resolve_font("Arial", Some("bold"), Some("italic"), Platform::Linux);
        assert_eq!(
            font,
            FontConfig::Fontconfig {
                font_name: "Liberation Sans:style=Bold Italic".to_string()
            }
        );
    }

    #[test]
    fn arial_bold_italic_on_macos_maps_to_helvetica() {
        let font = resolve_font("Arial", Some("bold"), Some("italic"), Platform::Macos);
        assert_eq!(
            font,
            FontConfig::Fontconfig {
                font_name: "Helvetica:style=Bold Italic".to_string()
            }
        );
    }

    #[test]
    fn regular_weight_omits_style_suffix() {
        let font = resolve_font("Arial", Some("normal"), Some("normal"), Platform::Linux);
        assert_eq!(
            font,
            FontConfig::Fontconfig {
                font_name: "Liberation Sans".to_string()
            }
        );
    }

    #[test]
    fn numeric_weights_count_as_bold_from_600() {
        let bold = resolve_font("Arial", Some("700"), None, Platform::Windows);
        let normal = resolve_font("Arial", Some("400"), None, Platform::Windows);
        assert!(matches!(bold, FontConfig::FontFile { ref font_path } if font_path.ends_with("arialbd.ttf")));
        assert!(matches!(normal, FontConfig::FontFile { ref font_path } if font_path.ends_with("arial.ttf")));
    }

    #[test]
    fn unmapped_family_falls_back_to_arial_on_windows() {
        let font = resolve_font("Comic Neue", None, Some("italic"), Platform::Windows);
        assert_eq!(
            font,
            FontConfig::FontFile {
                font_path: "C:/Windows/Fonts/ariali.ttf".to_string()
            }
        );
    }

    #[test]
    fn unknown_family_passes_through_on_linux() {
        let font = resolve_font("Inter", Some("bold"), None, Platform::Linux);
        assert_eq!(
            font,
            FontConfig::Fontconfig {
                font_name: "Inter:style=Bold".to_string()
            }
        );
    }

    #[test]
    fn filter_option_escapes_separators() {
        let font = resolve_font("Arial", Some("bold"), None, Platform::Linux);
        assert_eq!(font.to_filter_option(), r"font=Liberation Sans\:style\=Bold");

        let file = resolve_font("Arial", None, None, Platform::Windows);
        assert_eq!(file.to_filter_option(), r"fontfile=C\:/Windows/Fonts/arial.ttf");
    }
}
