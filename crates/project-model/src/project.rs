//! Export manifest and structural validation.
//!
//! A manifest is the top-level container that ties together the clip
//! sequence and the output settings of one export (`*.montage.json`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clip::{Clip, MediaSource};
use crate::settings::ExportSettings;

/// Current manifest schema version.
pub const MANIFEST_VERSION: &str = "1.0";

/// Top-level export manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    /// Schema version.
    #[serde(default = "default_version")]
    pub version: String,

    /// Clip sequence, ordered by `sequence_start_secs`.
    pub clips: Vec<Clip>,

    /// Output settings.
    pub settings: ExportSettings,
}

fn default_version() -> String {
    MANIFEST_VERSION.to_string()
}

impl ExportManifest {
    pub fn new(clips: Vec<Clip>, settings: ExportSettings) -> Self {
        Self {
            version: default_version(),
            clips,
            settings,
        }
    }

    /// Load a manifest from a JSON file.
    ///
    /// Relative file sources are resolved against the manifest's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        Self::load_inner(path.as_ref(), None)
    }

    /// Load a manifest, using `fallback` when it has no `settings` object.
    pub fn load_with_default_settings(
        path: impl AsRef<Path>,
        fallback: &ExportSettings,
    ) -> Result<Self, ProjectError> {
        Self::load_inner(path.as_ref(), Some(fallback))
    }

    fn load_inner(path: &Path, fallback: Option<&ExportSettings>) -> Result<Self, ProjectError> {
        let parse_error = |source| ProjectError::ParseError {
            path: path.to_path_buf(),
            source,
        };
        let json = std::fs::read_to_string(path).map_err(|e| ProjectError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut value: serde_json::Value = serde_json::from_str(&json).map_err(parse_error)?;
        if let (Some(fallback), Some(object)) = (fallback, value.as_object_mut()) {
            if !object.contains_key("settings") {
                let settings = serde_json::to_value(fallback).map_err(parse_error)?;
                object.insert("settings".to_string(), settings);
            }
        }
        let mut manifest: ExportManifest = serde_json::from_value(value).map_err(parse_error)?;

        if let Some(base) = path.parent() {
            manifest.resolve_sources(base);
        }
        Ok(manifest)
    }

    /// Save the manifest as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| ProjectError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| ProjectError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn resolve_sources(&mut self, base: &Path) {
        for clip in &mut self.clips {
            if let MediaSource::File { path } = &mut clip.source {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        }
    }

    /// Collect every structural issue and every missing file source.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = collect_issues(&self.clips, &self.settings);

        for clip in &self.clips {
            if let MediaSource::File { path } = &clip.source {
                if !path.exists() {
                    issues.push(format!(
                        "clip '{}' source missing: {}",
                        clip.id,
                        path.display()
                    ));
                }
            }
        }

        issues
    }
}

/// Check the structural invariants of an export request, failing on the
/// first violation.
pub fn validate_export(clips: &[Clip], settings: &ExportSettings) -> Result<(), ProjectError> {
    match collect_issues(clips, settings).into_iter().next() {
        Some(message) => Err(ProjectError::ValidationError { message }),
        None => Ok(()),
    }
}

fn collect_issues(clips: &[Clip], settings: &ExportSettings) -> Vec<String> {
    let mut issues = vec![];

    if let Err(e) = settings.validate() {
        issues.push(e.to_string());
    }

    if clips.is_empty() {
        issues.push("at least one clip is required".to_string());
    }

    for (index, clip) in clips.iter().enumerate() {
        let label = if clip.id.is_empty() {
            format!("clip #{index}")
        } else {
            format!("clip '{}'", clip.id)
        };

        if !(clip.source_duration_secs.is_finite() && clip.source_duration_secs > 0.0) {
            issues.push(format!(
                "{label}: source duration must be positive, got {}",
                clip.source_duration_secs
            ));
        }
        if !(clip.effects.speed.is_finite() && clip.effects.speed > 0.0) {
            issues.push(format!(
                "{label}: speed must be positive, got {}",
                clip.effects.speed
            ));
        }
        if !(clip.source_start_secs.is_finite() && clip.source_start_secs >= 0.0) {
            issues.push(format!(
                "{label}: source start must be non-negative, got {}",
                clip.source_start_secs
            ));
        }
        if !clip.sequence_start_secs.is_finite() {
            issues.push(format!("{label}: sequence start must be finite"));
        }
        if clip.effects.uniform_blur.is_nan() || clip.effects.uniform_blur < 0.0 {
            issues.push(format!(
                "{label}: uniform blur must be non-negative, got {}",
                clip.effects.uniform_blur
            ));
        }
        if let MediaSource::Memory { bytes } = &clip.source {
            if bytes.is_empty() {
                issues.push(format!("{label}: in-memory source is empty"));
            }
        }
    }

    issues
}

/// Errors that can occur when working with manifests.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid export: {message}")]
    ValidationError { message: String },
}

impl ProjectError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError {
            message: msg.into(),
        }
    }
}
