//! FFmpeg Detection Module
//!
//! Resolution order for each binary: explicit config/env path, common install
//! locations, then a `which`/`where` lookup. ffprobe is optional; without it
//! media profiles come from catalog metadata only.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{FFmpegError, FFmpegResult};
use crate::core::process::std_command;
use crate::core::settings::EncoderSettings;

/// Information about detected FFmpeg installation
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary, when found
    pub ffprobe_path: Option<PathBuf>,
    /// FFmpeg version string
    pub version: String,
}

/// Detects ffmpeg (required) and ffprobe (optional).
pub fn detect_ffmpeg(settings: &EncoderSettings) -> FFmpegResult<FFmpegInfo> {
    let ffmpeg_path = match &settings.ffmpeg_path {
        Some(path) if path.is_file() => path.clone(),
        Some(path) => {
            warn!(path = %path.display(), "Configured ffmpeg path does not exist");
            return Err(FFmpegError::NotFound);
        }
        None => find_binary("ffmpeg").ok_or(FFmpegError::NotFound)?,
    };

    let ffprobe_path = match &settings.ffprobe_path {
        Some(path) if path.is_file() => Some(path.clone()),
        Some(path) => {
            warn!(path = %path.display(), "Configured ffprobe path does not exist");
            None
        }
        None => sibling_binary(&ffmpeg_path, "ffprobe").or_else(|| find_binary("ffprobe")),
    };

    let version = get_ffmpeg_version(&ffmpeg_path)?;
    info!(
        ffmpeg = %ffmpeg_path.display(),
        ffprobe = ?ffprobe_path,
        version = %version,
        "FFmpeg detected"
    );

    Ok(FFmpegInfo {
        ffmpeg_path,
        ffprobe_path,
        version,
    })
}

fn binary_file_name(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// ffprobe installed next to ffmpeg
fn sibling_binary(ffmpeg_path: &Path, name: &str) -> Option<PathBuf> {
    let candidate = ffmpeg_path.parent()?.join(binary_file_name(name));
    candidate.is_file().then_some(candidate)
}

/// Finds a binary in common install locations, then on PATH.
fn find_binary(name: &str) -> Option<PathBuf> {
    let file_name = binary_file_name(name);
    for dir in get_common_ffmpeg_paths() {
        let candidate = dir.join(&file_name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let lookup = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };
    let mut cmd = std_command(lookup);
    cmd.arg(name);
    let output = cmd.output().ok()?;
    if !output.status.success() {
        debug!(binary = name, "Binary not found on PATH");
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files (x86)\ffmpeg\bin"));

        // Chocolatey installation
        if let Ok(programdata) = std::env::var("ProgramData") {
            paths.push(PathBuf::from(programdata).join("chocolatey").join("bin"));
        }

        // Scoop installation
        if let Ok(userprofile) = std::env::var("USERPROFILE") {
            paths.push(PathBuf::from(userprofile).join("scoop").join("shims"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/opt/local/bin")); // MacPorts
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/snap/bin"));
    }

    paths
}

/// Extracts the version from the first line of `ffmpeg -version`.
pub fn parse_version_line(output: &str) -> Option<String> {
    let first_line = output.lines().next()?.trim();
    if first_line.is_empty() {
        return None;
    }
    if let Some(version_part) = first_line.strip_prefix("ffmpeg version ") {
        if let Some(version) = version_part.split_whitespace().next() {
            return Some(version.to_string());
        }
    }
    Some(first_line.to_string())
}

fn get_ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let mut cmd = std_command(ffmpeg_path);
    cmd.arg("-version");
    let output = cmd.output().map_err(FFmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(
            "Failed to get FFmpeg version".to_string(),
        ));
    }

    parse_version_line(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| FFmpegError::ParseError("Could not parse FFmpeg version".to_string()))
}
