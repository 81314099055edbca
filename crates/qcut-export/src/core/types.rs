//! QCut Export Type Definitions
//!
//! Defines fundamental types shared by every export component.

use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// ID Types
// =============================================================================

/// Timeline element identifier
pub type ElementId = String;

/// Timeline track identifier
pub type TrackId = String;

/// Media catalog identifier
pub type MediaId = String;

/// Export session identifier (ULID by default)
pub type SessionId = String;

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

/// Tolerance used when comparing timeline positions
pub const TIME_EPSILON: TimeSec = 1e-3;

// =============================================================================
// Platform
// =============================================================================

/// Host platform the encoder runs on.
///
/// Font resolution and path handling differ per platform, so callers pass it
/// explicitly instead of the engine reading it from the environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Macos,
}

impl Platform {
    /// Platform this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Macos
        } else {
            Platform::Linux
        }
    }

    pub fn is_windows(self) -> bool {
        matches!(self, Platform::Windows)
    }
}

// =============================================================================
// Canvas
// =============================================================================

/// Output canvas dimensions in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    /// Creates a canvas, falling back to 1920x1080 for zero dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            warn!(width, height, "Canvas created with zero dimension, defaulting to 1920x1080");
            return Self {
                width: 1920,
                height: 1080,
            };
        }
        // libx264 with yuv420p requires even dimensions
        Self {
            width: width + (width % 2),
            height: height + (height % 2),
        }
    }

    /// Converts a percentage of the canvas width to pixels.
    pub fn percent_x(&self, percent: f64) -> f64 {
        percent / 100.0 * self.width as f64
    }

    /// Converts a percentage of the canvas height to pixels.
    pub fn percent_y(&self, percent: f64) -> f64 {
        percent / 100.0 * self.height as f64
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

// =============================================================================
// Quality
// =============================================================================

/// Named encoder quality preset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    High,
    #[default]
    Medium,
    Low,
}

impl QualityPreset {
    /// x264 speed preset for this quality level
    pub fn encoder_preset(self) -> &'static str {
        match self {
            QualityPreset::High => "slow",
            QualityPreset::Medium => "medium",
            QualityPreset::Low => "veryfast",
        }
    }

    /// Constant rate factor (lower is better)
    pub fn crf(self) -> u8 {
        match self {
            QualityPreset::High => 18,
            QualityPreset::Medium => 23,
            QualityPreset::Low => 28,
        }
    }
}
