//! Transcoding engine wrapper.
//!
//! Every compressed-video export runs exactly one ffmpeg process. Progress is
//! read from `-progress pipe:1` on stdout while stderr is drained on a
//! separate task and attached to the error when the process fails.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use montage_common::config::EngineConfig;
use montage_common::error::{MontageError, MontageResult};
use montage_project_model::settings::{ExportFormat, ExportSettings};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Lower bound of the derived video bitrate.
pub const MIN_VIDEO_BITRATE_KBPS: u32 = 500;

/// Upper bound of the derived video bitrate.
pub const MAX_VIDEO_BITRATE_KBPS: u32 = 50_000;

/// Handle on an ffmpeg executable.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    binary: PathBuf,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.ffmpeg)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Whether the executable can be started at all.
    pub fn is_available(&self) -> bool {
        tool_available(&self.binary)
    }

    /// Run ffmpeg to completion.
    ///
    /// `expected_duration_secs` converts the engine's `out_time` reports into
    /// a `[0, 1]` fraction handed to `on_fraction`. Dropping the returned
    /// future kills the process.
    pub async fn run(
        &self,
        args: &[String],
        expected_duration_secs: f64,
        on_fraction: &(dyn Fn(f64) + Send + Sync),
    ) -> MontageResult<()> {
        tracing::debug!(binary = %self.binary.display(), args = ?args, "Running ffmpeg");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = std::time::Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| MontageError::engine(format!("Failed to start ffmpeg: {e}")))?;

        tracing::info!(
            pid = child.id(),
            args_len = args.len(),
            expected_duration_secs,
            "ffmpeg process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MontageError::engine("Failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MontageError::engine("Failed to capture ffmpeg stderr"))?;

        // ffmpeg blocks once the stderr pipe fills up.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut latest = ProgressState::default();
        let mut last_progress_secs = 0.0f64;
        let mut last_progress_wall = std::time::Instant::now();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| MontageError::engine(format!("Failed reading ffmpeg progress: {e}")))?
        {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            latest.update(key, value);
            if key != "progress" {
                continue;
            }

            if latest.out_time_secs > last_progress_secs + 0.001 {
                last_progress_secs = latest.out_time_secs;
                last_progress_wall = std::time::Instant::now();
            }
            on_fraction(latest.fraction(expected_duration_secs));

            if last_progress_wall.elapsed().as_secs() >= 10 {
                tracing::warn!(
                    out_time_secs = latest.out_time_secs,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "No ffmpeg progress advancement for 10s"
                );
                last_progress_wall = std::time::Instant::now();
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| MontageError::engine(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            tracing::error!(%status, "ffmpeg exited abnormally");
            return Err(MontageError::engine_with_diagnostics(
                format!("ffmpeg exited with {status}"),
                stderr_output,
            ));
        }

        tracing::info!(
            elapsed_secs = start.elapsed().as_secs_f64(),
            "ffmpeg process finished"
        );
        Ok(())
    }
}

/// Leading arguments shared by every invocation.
pub fn base_args() -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
    ]
}

/// Target video bitrate for a resolution and quality.
///
/// Grows with both pixel count and quality, clamped to
/// `[MIN_VIDEO_BITRATE_KBPS, MAX_VIDEO_BITRATE_KBPS]`.
pub fn video_bitrate_kbps(width: u32, height: u32, quality: u8) -> u32 {
    let q = quality.min(100) as f64 / 100.0;
    let pixels = width as f64 * height as f64;
    let kbps = pixels * (0.5 + 4.5 * q) / 1000.0;
    (kbps.round() as u32).clamp(MIN_VIDEO_BITRATE_KBPS, MAX_VIDEO_BITRATE_KBPS)
}

/// Encoder arguments for a compressed-video format. Audio is always dropped.
pub fn codec_args(settings: &ExportSettings) -> MontageResult<Vec<String>> {
    let video_bitrate = format!(
        "{}k",
        video_bitrate_kbps(settings.width, settings.height, settings.quality)
    );

    match settings.format {
        ExportFormat::Mp4 => Ok(vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-profile:v".to_string(),
            "high".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-b:v".to_string(),
            video_bitrate,
            "-an".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
        ]),
        ExportFormat::Webm => Ok(vec![
            "-c:v".to_string(),
            "libvpx-vp9".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-b:v".to_string(),
            video_bitrate,
            "-an".to_string(),
            "-f".to_string(),
            "webm".to_string(),
        ]),
        ExportFormat::Gif => Err(MontageError::unsupported(
            "gif output is produced by the raster encoder, not ffmpeg",
        )),
    }
}

/// Pad filter rounding odd output sizes up to even ones with a black edge.
///
/// yuv420p encoders reject odd widths and heights.
pub fn even_size_pad(settings: &ExportSettings) -> Option<String> {
    if settings.width % 2 == 0 && settings.height % 2 == 0 {
        return None;
    }
    Some("pad=ceil(iw/2)*2:ceil(ih/2)*2:0:0:color=black".to_string())
}

/// Whether an engine-family executable (ffmpeg, ffprobe) starts and exits
/// cleanly on `-version`.
pub fn tool_available(binary: &Path) -> bool {
    std::process::Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // Despite the name, ffmpeg reports out_time_ms in microseconds.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    fn fraction(&self, expected_duration_secs: f64) -> f64 {
        if self.complete {
            return 1.0;
        }
        if expected_duration_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(format: ExportFormat) -> ExportSettings {
        ExportSettings {
            width: 1280,
            height: 720,
            fps: 30,
            format,
            quality: 80,
        }
    }

    #[test]
    fn test_bitrate_is_monotonic_and_clamped() {
        assert_eq!(video_bitrate_kbps(16, 16, 0), MIN_VIDEO_BITRATE_KBPS);
        assert_eq!(video_bitrate_kbps(7680, 4320, 100), MAX_VIDEO_BITRATE_KBPS);

        let low = video_bitrate_kbps(1280, 720, 20);
        let high = video_bitrate_kbps(1280, 720, 90);
        assert!(low < high);
        assert!(video_bitrate_kbps(640, 360, 80) <= video_bitrate_kbps(1920, 1080, 80));
    }

    #[test]
    fn test_codec_args_per_format() {
        let mp4 = codec_args(&settings(ExportFormat::Mp4)).unwrap();
        assert!(mp4.contains(&"libx264".to_string()));
        assert!(mp4.contains(&"-an".to_string()));

        let webm = codec_args(&settings(ExportFormat::Webm)).unwrap();
        assert!(webm.contains(&"libvpx-vp9".to_string()));

        assert!(codec_args(&settings(ExportFormat::Gif)).is_err());
    }

    #[test]
    fn test_progress_state_parses_out_time() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "1500000");
        assert!((state.fraction(3.0) - 0.5).abs() < 1e-9);

        state.update("out_time_ms", "6000000");
        assert_eq!(state.fraction(3.0), 1.0);

        state.update("out_time_us", "0");
        state.update("progress", "end");
        assert_eq!(state.fraction(3.0), 1.0);
        assert_eq!(state.fraction(0.0), 1.0);
    }

    #[test]
    fn test_even_size_pad_only_for_odd_sizes() {
        assert_eq!(even_size_pad(&settings(ExportFormat::Mp4)), None);
        let odd = ExportSettings {
            width: 321,
            ..settings(ExportFormat::Mp4)
        };
        assert!(even_size_pad(&odd).unwrap().starts_with("pad=ceil(iw/2)*2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropping_run_kills_engine() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = dir.path().join("ffmpeg");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nif [ \"$1\" = \"-version\" ]; then exit 0; fi\nsleep 1\ntouch '{}'\n",
                marker.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let engine = FfmpegEngine::new(&script);
        for _ in 0..50 {
            if engine.is_available() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let run = engine.run(&[], 1.0, &|_| {});
        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(200), run).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "engine kept running after the job was dropped");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let engine = FfmpegEngine::new("/nonexistent/montage/ffmpeg");
        assert!(!engine.is_available());
        let err = engine.run(&base_args(), 1.0, &|_| {}).await.unwrap_err();
        assert!(matches!(err, MontageError::Engine { .. }));
    }
}
