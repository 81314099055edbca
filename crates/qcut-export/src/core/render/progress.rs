//! Export Progress
//!
//! Parses encoder progress (`-progress pipe:1` key/value blocks and classic
//! stderr stats lines), normalizes it into [`EncoderProgress`], and throttles
//! the [`ExportProgress`] events sent to a UI listener.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::debug;

// =============================================================================
// Events
// =============================================================================

/// Coarse export stage reported alongside the percentage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportStage {
    Preparing,
    Normalizing,
    Encoding,
    RenderingFrames,
    ProcessingFrames,
    Finalizing,
    Complete,
}

/// Export progress update
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    /// Progress percentage (0-100), never decreasing within one export
    pub progress_percent: f32,
    /// Current status message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames_done: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_seconds_remaining: Option<u64>,
    pub stage: ExportStage,
}

/// Normalized encoder progress: frames written and output time reached
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EncoderProgress {
    pub frames_done: u64,
    pub elapsed_seconds: f64,
}

// =============================================================================
// Progress Parsing
// =============================================================================

/// Parsed FFmpeg progress line data
#[derive(Debug, Clone, Default)]
pub struct FFmpegProgressData {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f32,
    /// Current time in seconds
    pub time_sec: f64,
    /// Bitrate in kbps
    pub bitrate_kbps: Option<f32>,
    /// Speed multiplier (e.g., 2.5x)
    pub speed: Option<f32>,
}

impl FFmpegProgressData {
    pub fn to_encoder_progress(&self) -> EncoderProgress {
        EncoderProgress {
            frames_done: self.frame,
            elapsed_seconds: self.time_sec,
        }
    }
}

/// Parse FFmpeg progress output line
///
/// FFmpeg progress output format (when using -progress pipe:1):
/// ```text
/// frame=100
/// fps=30.0
/// out_time_ms=3333333
/// bitrate=1234.5kbits/s
/// speed=2.5x
/// progress=continue
/// ```
///
/// Returns true for recognized keys; `progress=` marks the end of a block.
pub fn parse_ffmpeg_progress_line(line: &str, data: &mut FFmpegProgressData) -> bool {
    let line = line.trim();

    if let Some(value) = line.strip_prefix("frame=") {
        data.frame = value.trim().parse().unwrap_or(data.frame);
        return true;
    }

    if let Some(value) = line.strip_prefix("fps=") {
        data.fps = value.trim().parse().unwrap_or(data.fps);
        return true;
    }

    if let Some(value) = line.strip_prefix("out_time_ms=") {
        // out_time_ms is in microseconds despite the name
        if let Ok(microseconds) = value.trim().parse::<u64>() {
            data.time_sec = microseconds as f64 / 1_000_000.0;
        }
        return true;
    }

    if let Some(value) = line.strip_prefix("bitrate=") {
        if let Some(num_str) = value.strip_suffix("kbits/s") {
            data.bitrate_kbps = num_str.trim().parse().ok();
        }
        return true;
    }

    if let Some(value) = line.strip_prefix("speed=") {
        if let Some(num_str) = value.strip_suffix('x') {
            data.speed = num_str.trim().parse().ok();
        }
        return true;
    }

    line.starts_with("progress=")
}

/// True when the line closes a `-progress` block.
pub fn is_progress_block_end(line: &str) -> bool {
    line.trim_start().starts_with("progress=")
}

fn stats_regex() -> Option<&'static Regex> {
    static STATS: OnceLock<Option<Regex>> = OnceLock::new();
    STATS
        .get_or_init(|| Regex::new(r"frame=\s*(\d+).*?time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").ok())
        .as_ref()
}

/// Parses a stderr stats line such as
/// `frame=  240 fps= 60 q=28.0 size=1024kB time=00:00:08.00 bitrate=...`.
pub fn parse_stderr_stats_line(line: &str) -> Option<EncoderProgress> {
    let caps = stats_regex()?.captures(line)?;
    let frames_done = caps.get(1)?.as_str().parse().ok()?;
    let hours: f64 = caps.get(2)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(3)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(4)?.as_str().parse().ok()?;
    Some(EncoderProgress {
        frames_done,
        elapsed_seconds: hours * 3600.0 + minutes * 60.0 + seconds,
    })
}

/// Fraction (0..=1) of an encode covering `total_duration` seconds or `total_frames`.
pub fn encoder_fraction(progress: &EncoderProgress, total_duration: f64, total_frames: u64) -> f64 {
    let fraction = if total_duration > 0.0 && progress.elapsed_seconds > 0.0 {
        progress.elapsed_seconds / total_duration
    } else if total_frames > 0 {
        progress.frames_done as f64 / total_frames as f64
    } else {
        0.0
    };
    if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// =============================================================================
// Stderr Tail
// =============================================================================

/// Keeps the last `capacity` non-empty stderr lines
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: &str) {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    pub fn render(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

// =============================================================================
// Reporter
// =============================================================================

/// Sends throttled, monotonic [`ExportProgress`] events.
///
/// The first event and every forced event (stage changes, completion) are
/// always offered; others only after `min_interval` has passed since the last
/// one. Events never wait on a slow listener: they are dropped when the
/// channel is full, except `Complete`, which is queued until it fits.
pub struct ProgressReporter {
    tx: Option<Sender<ExportProgress>>,
    min_interval: Duration,
    last_sent: Option<Instant>,
    last_percent: f32,
    started: Instant,
}

impl ProgressReporter {
    pub fn new(tx: Option<Sender<ExportProgress>>, min_interval: Duration) -> Self {
        Self {
            tx,
            min_interval,
            last_sent: None,
            last_percent: 0.0,
            started: Instant::now(),
        }
    }

    /// A reporter that drops every event.
    pub fn disabled() -> Self {
        Self::new(None, Duration::ZERO)
    }

    pub fn last_percent(&self) -> f32 {
        self.last_percent
    }

    /// Reports progress; returns whether an event was sent.
    pub async fn report(
        &mut self,
        stage: ExportStage,
        percent: f32,
        message: impl Into<String>,
        frames_done: Option<u64>,
        force: bool,
    ) -> bool {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0).max(self.last_percent)
        } else {
            self.last_percent
        };
        self.last_percent = percent;

        let Some(tx) = &self.tx else {
            return false;
        };
        let now = Instant::now();
        let due = match self.last_sent {
            None => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        };
        if !force && !due {
            return false;
        }

        let event = ExportProgress {
            progress_percent: percent,
            message: message.into(),
            frames_done,
            estimated_seconds_remaining: self.estimate_remaining(percent, now),
            stage,
        };
        match tx.try_send(event) {
            Ok(()) => {
                self.last_sent = Some(now);
                true
            }
            Err(TrySendError::Full(event)) if event.stage == ExportStage::Complete => {
                // Delivered once the listener catches up
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                });
                self.last_sent = Some(now);
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(stage = ?stage, percent, "Progress listener is behind, dropping event");
                false
            }
            // A closed channel only means nobody is listening
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn estimate_remaining(&self, percent: f32, now: Instant) -> Option<u64> {
        if percent <= 1.0 || percent >= 100.0 {
            return None;
        }
        let elapsed = now.duration_since(self.started).as_secs_f64();
        let total = elapsed * 100.0 / percent as f64;
        Some((total - elapsed).max(0.0).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_parse_ffmpeg_progress_complete_block() {
        let mut data = FFmpegProgressData::default();
        let lines = [
            "frame=150",
            "fps=29.97",
            "out_time_ms=5005005",
            "bitrate=8000kbits/s",
            "speed=1.5x",
            "progress=continue",
        ];
        for line in lines {
            assert!(parse_ffmpeg_progress_line(line, &mut data));
        }
        assert!(is_progress_block_end("progress=end"));

        assert_eq!(data.frame, 150);
        assert!((data.fps - 29.97).abs() < 0.01);
        assert!((data.time_sec - 5.005005).abs() < 0.001);
        assert!((data.bitrate_kbps.unwrap() - 8000.0).abs() < 0.1);
        assert!((data.speed.unwrap() - 1.5).abs() < 0.01);

        let normalized = data.to_encoder_progress();
        assert_eq!(normalized.frames_done, 150);
    }

    #[test]
    fn test_parse_ffmpeg_progress_na_values() {
        let mut data = FFmpegProgressData {
            time_sec: 2.0,
            ..Default::default()
        };
        assert!(parse_ffmpeg_progress_line("bitrate=N/A", &mut data));
        assert!(parse_ffmpeg_progress_line("out_time_ms=N/A", &mut data));
        assert_eq!(data.time_sec, 2.0);
        assert!(!parse_ffmpeg_progress_line("stream_0_0_q=28.0", &mut data));
    }

    #[test]
    fn test_parse_stderr_stats_line() {
        let line = "frame=  240 fps= 60 q=28.0 size=    1024kB time=00:01:08.50 bitrate=1000.0kbits/s speed=2x";
        let progress = parse_stderr_stats_line(line).unwrap();
        assert_eq!(progress.frames_done, 240);
        assert!((progress.elapsed_seconds - 68.5).abs() < 1e-9);

        assert!(parse_stderr_stats_line("Stream mapping:").is_none());
    }

    #[test]
    fn test_encoder_fraction() {
        let p = EncoderProgress {
            frames_done: 150,
            elapsed_seconds: 5.0,
        };
        assert!((encoder_fraction(&p, 10.0, 300) - 0.5).abs() < 1e-9);

        let by_frames = EncoderProgress {
            frames_done: 250,
            elapsed_seconds: 0.0,
        };
        assert!((encoder_fraction(&by_frames, 10.0, 500) - 0.5).abs() < 1e-9);
        assert_eq!(encoder_fraction(&p, 1.0, 0), 1.0);
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let mut tail = StderrTail::new(2);
        tail.push("one");
        tail.push("");
        tail.push("two");
        tail.push("three\r");
        assert_eq!(tail.render(), "two\nthree");
    }

    #[tokio::test]
    async fn test_reporter_throttles_and_stays_monotonic() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut reporter = ProgressReporter::new(Some(tx), Duration::from_secs(3600));

        assert!(reporter.report(ExportStage::Preparing, 0.0, "start", None, false).await);
        assert!(!reporter.report(ExportStage::Encoding, 10.0, "tick", Some(1), false).await);
        assert!(reporter.report(ExportStage::Encoding, 5.0, "stage", None, true).await);
        drop(reporter);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.stage, ExportStage::Preparing);
        let second = rx.recv().await.unwrap();
        // 5.0 after 10.0 is held at 10.0
        assert_eq!(second.progress_percent, 10.0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reporter_never_waits_on_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut reporter = ProgressReporter::new(Some(tx), Duration::ZERO);

        assert!(reporter.report(ExportStage::Preparing, 0.0, "start", None, true).await);
        assert!(!reporter.report(ExportStage::Encoding, 40.0, "dropped", None, true).await);
        assert!(reporter.report(ExportStage::Complete, 100.0, "done", None, true).await);
        assert_eq!(reporter.last_percent(), 100.0);
        drop(reporter);

        assert_eq!(rx.recv().await.unwrap().stage, ExportStage::Preparing);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.stage, ExportStage::Complete);
        assert_eq!(last.progress_percent, 100.0);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_progress_serializes_camel_case() {
        let event = ExportProgress {
            progress_percent: 50.0,
            message: "Encoding".to_string(),
            frames_done: Some(10),
            estimated_seconds_remaining: None,
            stage: ExportStage::RenderingFrames,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"progressPercent\":50.0"));
        assert!(json.contains("\"framesDone\":10"));
        assert!(json.contains("\"renderingFrames\""));
        assert!(!json.contains("estimatedSecondsRemaining"));
    }
}
