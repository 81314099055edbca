//! FFmpeg Runner Module
//!
//! Holds the detected installation and runs ffprobe for media profiles.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::{FFmpegError, FFmpegInfo, FFmpegResult};
use crate::core::process::tokio_command;
use crate::core::timeline::VideoProfile;

/// Media information extracted by FFprobe
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration_sec: f64,
    /// Video stream info (if present)
    pub video: Option<VideoStreamInfo>,
    /// Audio stream info (if present)
    pub audio: Option<AudioStreamInfo>,
    /// Container format
    pub format: String,
}

impl MediaInfo {
    /// Encoding profile of the first video stream.
    pub fn video_profile(&self) -> Option<VideoProfile> {
        let video = self.video.as_ref()?;
        if video.width == 0 || video.height == 0 {
            return None;
        }
        Some(VideoProfile {
            width: video.width,
            height: video.height,
            fps: video.fps,
            codec: video.codec.clone(),
            has_audio: Some(self.audio.is_some()),
        })
    }
}

/// Video stream information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VideoStreamInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (frames per second)
    pub fps: f64,
    /// Codec name (e.g., "h264", "vp9")
    pub codec: String,
    /// Pixel format
    pub pixel_format: String,
}

/// Audio stream information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AudioStreamInfo {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u8,
    /// Codec name (e.g., "aac", "mp3")
    pub codec: String,
}

/// Handle on a detected FFmpeg installation
#[derive(Clone, Debug)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
}

impl FFmpegRunner {
    /// Create a new FFmpegRunner from detected FFmpeg installation
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    /// Get the FFmpeg info
    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.info.ffmpeg_path
    }

    /// Probe media file to get information
    pub async fn probe(&self, input: &Path) -> FFmpegResult<MediaInfo> {
        let ffprobe = self
            .info
            .ffprobe_path
            .as_ref()
            .ok_or_else(|| FFmpegError::ProbeError("ffprobe is not available".to_string()))?;

        if !input.exists() {
            return Err(FFmpegError::InvalidInput(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }

        let mut cmd = tokio_command(ffprobe);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(input);

        let output = cmd.output().await.map_err(FFmpegError::ProcessError)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ProbeError(format!("FFprobe failed: {}", stderr)));
        }

        let info = parse_probe_output(&String::from_utf8_lossy(&output.stdout))?;
        debug!(input = %input.display(), duration = info.duration_sec, "Probed media");
        Ok(info)
    }
}

/// Parse FFprobe JSON output
pub(crate) fn parse_probe_output(json_str: &str) -> FFmpegResult<MediaInfo> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| FFmpegError::ParseError(format!("Failed to parse FFprobe output: {}", e)))?;

    let format = json
        .get("format")
        .ok_or_else(|| FFmpegError::ParseError("Missing format info".to_string()))?;

    let duration_sec = format
        .get("duration")
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let format_name = format
        .get("format_name")
        .and_then(|f| f.as_str())
        .unwrap_or("unknown")
        .to_string();

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let mut video_info: Option<VideoStreamInfo> = None;
    let mut audio_info: Option<AudioStreamInfo> = None;

    for stream in &streams {
        match stream.get("codec_type").and_then(|c| c.as_str()) {
            // Cover art is reported as a video stream
            Some("video") if video_info.is_none() && !is_attached_picture(stream) => {
                video_info = Some(parse_video_stream(stream));
            }
            Some("audio") if audio_info.is_none() => {
                audio_info = Some(parse_audio_stream(stream));
            }
            _ => {}
        }
    }

    Ok(MediaInfo {
        duration_sec,
        video: video_info,
        audio: audio_info,
        format: format_name,
    })
}

fn is_attached_picture(stream: &serde_json::Value) -> bool {
    stream
        .get("disposition")
        .and_then(|d| d.get("attached_pic"))
        .and_then(|v| v.as_u64())
        == Some(1)
}

/// Parses `r_frame_rate` values such as `"30/1"` or `"30000/1001"`.
fn parse_frame_rate(value: &str) -> Option<f64> {
    let fps = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den > 0.0 {
                num / den
            } else {
                return None;
            }
        }
        None => value.parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_video_stream(stream: &serde_json::Value) -> VideoStreamInfo {
    let width = stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;
    let height = stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;

    let fps = stream
        .get("r_frame_rate")
        .and_then(|f| f.as_str())
        .and_then(parse_frame_rate)
        .unwrap_or(30.0);

    let codec = stream
        .get("codec_name")
        .and_then(|c| c.as_str())
        .unwrap_or("unknown")
        .to_string();

    let pixel_format = stream
        .get("pix_fmt")
        .and_then(|p| p.as_str())
        .unwrap_or("unknown")
        .to_string();

    VideoStreamInfo {
        width,
        height,
        fps,
        codec,
        pixel_format,
    }
}

fn parse_audio_stream(stream: &serde_json::Value) -> AudioStreamInfo {
    let sample_rate = stream
        .get("sample_rate")
        .and_then(|s| s.as_str())
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(44100);

    let channels = stream
        .get("channels")
        .and_then(|c| c.as_u64())
        .unwrap_or(2) as u8;

    let codec = stream
        .get("codec_name")
        .and_then(|c| c.as_str())
        .unwrap_or("unknown")
        .to_string();

    AudioStreamInfo {
        sample_rate,
        channels,
        codec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output_video() {
        let json = r#"{
            "format": {
                "duration": "10.5",
                "size": "1048576",
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2"
            },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1920,
                    "height": 1080,
                    "r_frame_rate": "30/1",
                    "pix_fmt": "yuv420p"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "sample_rate": "48000",
                    "channels": 2
                }
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.duration_sec, 10.5);

        let profile = info.video_profile().unwrap();
        assert_eq!(profile.width, 1920);
        assert_eq!(profile.height, 1080);
        assert_eq!(profile.fps, 30.0);
        assert_eq!(profile.codec, "h264");
        assert_eq!(profile.has_audio, Some(true));

        let audio = info.audio.unwrap();
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(audio.channels, 2);
    }

    #[test]
    fn test_parse_fractional_framerate() {
        let json = r#"{
            "format": {"duration": "1.0", "format_name": "mp4"},
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1920,
                    "height": 1080,
                    "r_frame_rate": "30000/1001"
                }
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        let video = info.video.unwrap();
        assert!((video.fps - 29.97).abs() < 0.01);
        assert!(info.audio.is_none());
    }

    #[test]
    fn test_cover_art_is_not_a_video_stream() {
        let json = r#"{
            "format": {"duration": "180.0", "format_name": "mp3"},
            "streams": [
                {"codec_type": "audio", "codec_name": "mp3", "sample_rate": "44100", "channels": 2},
                {"codec_type": "video", "codec_name": "mjpeg", "width": 500, "height": 500,
                 "disposition": {"attached_pic": 1}}
            ]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!(info.video.is_none());
        assert!(info.video_profile().is_none());
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        assert!(matches!(
            parse_probe_output("not json"),
            Err(FFmpegError::ParseError(_))
        ));
        assert!(parse_frame_rate("30/0").is_none());
    }
}
