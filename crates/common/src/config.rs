//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Transcoding engine location and scratch space.
    pub engine: EngineConfig,

    /// Decoder seek retry budget.
    pub seek: SeekConfig,

    /// Default export parameters.
    pub export: ExportDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Where to find the transcoding engine and where jobs keep their files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// ffmpeg executable (name on PATH or absolute path).
    pub ffmpeg: PathBuf,

    /// ffprobe executable (name on PATH or absolute path).
    pub ffprobe: PathBuf,

    /// Parent directory for per-job working areas. `None` uses the system
    /// temp directory.
    pub work_dir: Option<PathBuf>,
}

/// Bounded retry policy for decoder seeks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeekConfig {
    /// Seek attempts per frame before proceeding best-effort.
    pub max_attempts: u32,

    /// Fixed pause between attempts, in milliseconds.
    pub backoff_ms: u64,

    /// Distance (seconds) between requested and reached position that still
    /// counts as a completed seek.
    pub tolerance_secs: f64,
}

/// Default export parameters used when a manifest or the CLI omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Quality in `[0, 100]`.
    pub quality: u8,

    /// Output format name (`gif`, `mp4` or `webm`).
    pub format: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "montage=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            work_dir: None,
        }
    }
}

impl Default for SeekConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 20,
            tolerance_secs: 0.001,
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            quality: 80,
            format: "mp4".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("montage").join("config.json")
}
