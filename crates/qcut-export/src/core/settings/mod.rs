//! Export Configuration
//!
//! Provides persistent export engine configuration with:
//! - Atomic file writes (temp file + rename)
//! - Schema defaults per section
//! - Environment overrides for encoder binaries and the temp root
//!
//! Values are clamped by [`ExportConfig::normalize`] so a corrupted file never
//! produces a nonsensical timeout or duration limit.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Config schema version
pub const CONFIG_VERSION: u32 = 1;

/// Default config file name
pub const CONFIG_FILE: &str = "export-config.json";

/// Environment variable overriding the ffmpeg binary
pub const ENV_FFMPEG_PATH: &str = "QCUT_FFMPEG_PATH";

/// Environment variable overriding the ffprobe binary
pub const ENV_FFPROBE_PATH: &str = "QCUT_FFPROBE_PATH";

/// Environment variable overriding the session temp root
pub const ENV_TEMP_DIR: &str = "QCUT_TEMP_DIR";

/// Export engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportConfig {
    /// Schema version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Encoder binaries and codec settings
    #[serde(default)]
    pub encoder: EncoderSettings,

    /// Process timeouts
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Duration and diagnostics limits
    #[serde(default)]
    pub limits: LimitSettings,

    /// Progress reporting
    #[serde(default)]
    pub progress: ProgressSettings,

    /// Session temp directories
    #[serde(default)]
    pub session: SessionSettings,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            encoder: EncoderSettings::default(),
            timeouts: TimeoutSettings::default(),
            limits: LimitSettings::default(),
            progress: ProgressSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl ExportConfig {
    /// Normalizes and clamps values so the engine never runs with nonsense limits.
    pub fn normalize(&mut self) {
        self.version = CONFIG_VERSION;

        self.encoder.audio_bitrate = normalize_bitrate(&self.encoder.audio_bitrate);
        if self.encoder.pixel_format.trim().is_empty() {
            self.encoder.pixel_format = default_pixel_format();
        }
        self.encoder.ffmpeg_path = non_empty_path(self.encoder.ffmpeg_path.take());
        self.encoder.ffprobe_path = non_empty_path(self.encoder.ffprobe_path.take());

        self.timeouts.floor_secs = self.timeouts.floor_secs.clamp(1, 86_400);
        self.timeouts.ceiling_secs = self
            .timeouts
            .ceiling_secs
            .clamp(self.timeouts.floor_secs, 7 * 86_400);
        self.timeouts.per_second_multiplier =
            clamp_f64(self.timeouts.per_second_multiplier, 0.1, 1000.0);
        self.timeouts.base_secs = self.timeouts.base_secs.min(86_400);
        self.timeouts.frame_timeout_secs = self.timeouts.frame_timeout_secs.clamp(1, 3600);

        self.limits.min_duration_secs = clamp_f64(self.limits.min_duration_secs, 0.01, 60.0);
        self.limits.max_duration_secs = clamp_f64(
            self.limits.max_duration_secs,
            self.limits.min_duration_secs,
            86_400.0,
        );
        self.limits.stderr_tail_lines = self.limits.stderr_tail_lines.clamp(1, 500);

        self.progress.min_interval_ms = self.progress.min_interval_ms.min(10_000);

        self.session.temp_root = non_empty_path(self.session.temp_root.take());
    }

    /// Applies `QCUT_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = non_empty(ENV_FFMPEG_PATH) {
            info!(path = %path, "Using ffmpeg path from environment");
            self.encoder.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty(ENV_FFPROBE_PATH) {
            self.encoder.ffprobe_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty(ENV_TEMP_DIR) {
            self.session.temp_root = Some(PathBuf::from(path));
        }
    }

    /// Loads config from disk. A missing file yields defaults; a corrupt file
    /// logs a warning and yields defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!("Export config not found at {:?}, using defaults", path);
            return Self::default();
        }

        let parsed = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read export config: {}", e))
            .and_then(|content| {
                serde_json::from_str::<ExportConfig>(&content)
                    .map_err(|e| format!("Failed to parse export config: {}", e))
            });

        match parsed {
            Ok(mut config) => {
                config.normalize();
                config
            }
            Err(e) => {
                warn!("Failed to load export config, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Saves config using atomic write (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<ExportConfig, String> {
        let mut normalized = self.clone();
        normalized.normalize();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create config directory: {}", e))?;
            }
        }

        let content = serde_json::to_string_pretty(&normalized)
            .map_err(|e| format!("Failed to serialize export config: {}", e))?;

        let temp_path = path.with_extension("json.tmp");
        if temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }

        let mut file = fs::File::create(&temp_path)
            .map_err(|e| format!("Failed to create temp config file: {}", e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| format!("Failed to write export config: {}", e))?;
        file.sync_all()
            .map_err(|e| format!("Failed to sync export config: {}", e))?;
        drop(file);

        if cfg!(windows) && path.exists() {
            // rename does not overwrite on Windows
            fs::remove_file(path)
                .map_err(|e| format!("Failed to replace export config: {}", e))?;
        }
        fs::rename(&temp_path, path)
            .map_err(|e| format!("Failed to finalize export config: {}", e))?;

        info!("Export config saved to {:?}", path);
        Ok(normalized)
    }

    /// Encoder timeout for a timeline of `duration_secs`:
    /// `clamp(duration * multiplier + base, floor, ceiling)`.
    pub fn encode_timeout(&self, duration_secs: f64) -> Duration {
        let t = &self.timeouts;
        let duration = if duration_secs.is_finite() {
            duration_secs.max(0.0)
        } else {
            0.0
        };
        let scaled = duration * t.per_second_multiplier + t.base_secs as f64;
        let clamped = clamp_f64(
            scaled,
            t.floor_secs as f64,
            t.ceiling_secs.max(t.floor_secs) as f64,
        );
        Duration::from_secs_f64(clamped)
    }

    /// Timeout for a single per-frame encoder invocation.
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.frame_timeout_secs)
    }

    /// Clamps an export duration into `[minDurationSecs, maxDurationSecs]`.
    pub fn clamp_duration(&self, duration_secs: f64) -> f64 {
        clamp_f64(
            duration_secs,
            self.limits.min_duration_secs,
            self.limits.max_duration_secs,
        )
    }

    /// Root directory under which sessions are created.
    pub fn temp_root(&self) -> PathBuf {
        self.session
            .temp_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    // An inverted range collapses to `min`
    value.max(min).min(max.max(min))
}

fn non_empty_path(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn normalize_bitrate(value: &str) -> String {
    let trimmed = value.trim().to_ascii_lowercase();
    let digits = trimmed.strip_suffix('k').unwrap_or(&trimmed);
    match digits.parse::<u32>() {
        Ok(kbps) if (32..=512).contains(&kbps) => format!("{kbps}k"),
        _ => default_audio_bitrate(),
    }
}

/// Encoder binaries and codec settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncoderSettings {
    /// Explicit ffmpeg binary (skips detection)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Explicit ffprobe binary
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// AAC bitrate (e.g. "192k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Output pixel format
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            audio_bitrate: default_audio_bitrate(),
            pixel_format: default_pixel_format(),
        }
    }
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

/// Process timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutSettings {
    /// Minimum encode timeout
    #[serde(default = "default_floor_secs")]
    pub floor_secs: u64,

    /// Maximum encode timeout
    #[serde(default = "default_ceiling_secs")]
    pub ceiling_secs: u64,

    /// Seconds of budget per second of timeline
    #[serde(default = "default_per_second_multiplier")]
    pub per_second_multiplier: f64,

    /// Fixed budget added to every encode
    #[serde(default = "default_base_secs")]
    pub base_secs: u64,

    /// Timeout for one per-frame filter invocation
    #[serde(default = "default_frame_timeout_secs")]
    pub frame_timeout_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            floor_secs: default_floor_secs(),
            ceiling_secs: default_ceiling_secs(),
            per_second_multiplier: default_per_second_multiplier(),
            base_secs: default_base_secs(),
            frame_timeout_secs: default_frame_timeout_secs(),
        }
    }
}

fn default_floor_secs() -> u64 {
    60
}

fn default_ceiling_secs() -> u64 {
    7200
}

fn default_per_second_multiplier() -> f64 {
    10.0
}

fn default_base_secs() -> u64 {
    30
}

fn default_frame_timeout_secs() -> u64 {
    30
}

/// Duration and diagnostics limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LimitSettings {
    #[serde(default = "default_min_duration_secs")]
    pub min_duration_secs: f64,

    /// Four hours
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: f64,

    /// Lines of encoder stderr kept for error reports
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            min_duration_secs: default_min_duration_secs(),
            max_duration_secs: default_max_duration_secs(),
            stderr_tail_lines: default_stderr_tail_lines(),
        }
    }
}

fn default_min_duration_secs() -> f64 {
    0.1
}

fn default_max_duration_secs() -> f64 {
    14_400.0
}

fn default_stderr_tail_lines() -> usize {
    20
}

/// Progress reporting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSettings {
    /// Minimum delay between two progress events
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

fn default_min_interval_ms() -> u64 {
    250
}

/// Session temp directories
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    /// Root for session directories (system temp dir when unset)
    #[serde(default)]
    pub temp_root: Option<PathBuf>,
}
