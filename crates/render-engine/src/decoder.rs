//! Clip decoders and the bounded seek-retry policy.
//!
//! A decoder holds one opened source and produces the frame nearest to the
//! last seek target. Seeking is asynchronous and may land short of the
//! target; [`seek_with_retry`] retries a fixed number of times and then
//! proceeds with whatever frame the decoder currently shows.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use montage_common::config::{EngineConfig, SeekConfig};
use montage_common::error::{MontageError, MontageResult};
use montage_project_model::clip::Clip;
use serde::Deserialize;
use tokio::process::Command;

/// An opened source clip.
#[async_trait]
pub trait ClipDecoder: Send {
    /// Native frame size; `(0, 0)` until the source is ready.
    fn dimensions(&self) -> (u32, u32);

    /// Whether the decoder knows its frame size and can be seeked.
    fn is_ready(&self) -> bool {
        let (w, h) = self.dimensions();
        w > 0 && h > 0
    }

    /// Request the frame at `time_secs` of the source.
    async fn seek(&mut self, time_secs: f64) -> MontageResult<()>;

    /// Source time of the frame currently held, if any.
    fn position_secs(&self) -> Option<f64>;

    /// Frame currently held, if any.
    fn current_frame(&self) -> Option<&RgbaImage>;
}

/// Factory for decoders, injected into the exporter.
#[async_trait]
pub trait DecoderOpener: Send + Sync {
    /// Open `clip`, whose media is readable at `source`.
    async fn open(&self, clip: &Clip, source: &Path) -> MontageResult<Box<dyn ClipDecoder>>;
}

/// Retry budget for a single seek.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub tolerance_secs: f64,
}

impl Default for SeekPolicy {
    fn default() -> Self {
        Self::from(&SeekConfig::default())
    }
}

impl From<&SeekConfig> for SeekPolicy {
    fn from(config: &SeekConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            tolerance_secs: config.tolerance_secs.max(0.0),
        }
    }
}

/// How a retried seek ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekOutcome {
    /// The decoder reported a position within tolerance of the target.
    Reached { attempts: u32 },
    /// Budget exhausted; rendering continues with the current frame.
    BestEffort {
        attempts: u32,
        position_secs: Option<f64>,
    },
}

impl SeekOutcome {
    pub fn reached(&self) -> bool {
        matches!(self, Self::Reached { .. })
    }
}

/// Seek `decoder` to `target_secs`, retrying within `policy`.
///
/// Never fails: seek errors and short landings count as failed attempts.
pub async fn seek_with_retry(
    decoder: &mut dyn ClipDecoder,
    target_secs: f64,
    policy: &SeekPolicy,
) -> SeekOutcome {
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match decoder.seek(target_secs).await {
            Ok(()) => {
                let landed = decoder
                    .position_secs()
                    .is_some_and(|pos| (pos - target_secs).abs() <= policy.tolerance_secs);
                if landed {
                    return SeekOutcome::Reached { attempts: attempt };
                }
            }
            Err(e) => {
                tracing::debug!(attempt, target_secs, error = %e, "Seek attempt failed");
            }
        }
        if attempt < max_attempts && !policy.backoff.is_zero() {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    let position_secs = decoder.position_secs();
    tracing::warn!(
        target_secs,
        ?position_secs,
        attempts = max_attempts,
        "Seek retry budget exhausted, using current frame"
    );
    SeekOutcome::BestEffort {
        attempts: max_attempts,
        position_secs,
    }
}

/// Opens clips through ffprobe/ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegDecoderOpener {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegDecoderOpener {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.ffmpeg, &config.ffprobe)
    }
}

impl Default for FfmpegDecoderOpener {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[async_trait]
impl DecoderOpener for FfmpegDecoderOpener {
    async fn open(&self, clip: &Clip, source: &Path) -> MontageResult<Box<dyn ClipDecoder>> {
        let (width, height) = probe_dimensions(&self.ffprobe, source).await?;
        tracing::debug!(
            clip = %clip.id,
            source = %source.display(),
            width,
            height,
            "Opened clip decoder"
        );
        Ok(Box::new(FfmpegDecoder {
            ffmpeg: self.ffmpeg.clone(),
            source: source.to_path_buf(),
            width,
            height,
            frame: None,
            position_secs: None,
        }))
    }
}

/// Decodes single frames by running ffmpeg once per seek.
#[derive(Debug)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    source: PathBuf,
    width: u32,
    height: u32,
    frame: Option<RgbaImage>,
    position_secs: Option<f64>,
}

#[async_trait]
impl ClipDecoder for FfmpegDecoder {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn seek(&mut self, time_secs: f64) -> MontageResult<()> {
        // Clamped timelines repeat targets near the end of a clip.
        if self.frame.is_some() && self.position_secs == Some(time_secs) {
            return Ok(());
        }

        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostdin", "-v", "error", "-ss"])
            .arg(format!("{time_secs:.6}"))
            .arg("-i")
            .arg(&self.source)
            .args([
                "-frames:v", "1", "-an", "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1",
            ])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MontageError::decode(format!("Failed to start ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(MontageError::decode(format!(
                "ffmpeg could not decode {} at {time_secs:.3}s: {}",
                self.source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let expected = self.width as usize * self.height as usize * 4;
        if output.stdout.len() < expected {
            return Err(MontageError::decode(format!(
                "short frame from {} at {time_secs:.3}s ({} of {expected} bytes)",
                self.source.display(),
                output.stdout.len()
            )));
        }

        let mut bytes = output.stdout;
        bytes.truncate(expected);
        let frame = RgbaImage::from_raw(self.width, self.height, bytes)
            .ok_or_else(|| MontageError::decode("decoded frame has the wrong size"))?;
        self.frame = Some(frame);
        self.position_secs = Some(time_secs);
        Ok(())
    }

    fn position_secs(&self) -> Option<f64> {
        self.position_secs
    }

    fn current_frame(&self) -> Option<&RgbaImage> {
        self.frame.as_ref()
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

async fn probe_dimensions(ffprobe: &Path, source: &Path) -> MontageResult<(u32, u32)> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "json",
        ])
        .arg(source)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| MontageError::decode(format!("Failed to start ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(MontageError::decode(format!(
            "ffprobe rejected {}: {}",
            source.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_dimensions(&output.stdout).ok_or_else(|| {
        MontageError::decode(format!("no video stream in {}", source.display()))
    })
}

fn parse_probe_dimensions(json: &[u8]) -> Option<(u32, u32)> {
    let probe: ProbeOutput = serde_json::from_slice(json).ok()?;
    let stream = probe.streams.into_iter().next()?;
    if stream.width == 0 || stream.height == 0 {
        return None;
    }
    Some((stream.width, stream.height))
}
