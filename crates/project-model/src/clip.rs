//! Clips and the effects attached to them.
//!
//! A clip is one trimmed segment of a source video placed in the output
//! sequence. Clips are produced by the editing front-end and are read-only
//! to the export pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One source video segment placed in the export sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    /// Unique clip identifier.
    pub id: String,

    /// Where the encoded source video lives.
    pub source: MediaSource,

    /// Trim in-point within the source, in seconds.
    #[serde(default)]
    pub source_start_secs: f64,

    /// Trimmed length of source media to use, in seconds.
    pub source_duration_secs: f64,

    /// Position of this clip in the overall sequence, in seconds.
    #[serde(default)]
    pub sequence_start_secs: f64,

    /// Time remapping and blur effects.
    #[serde(default)]
    pub effects: EffectsDescriptor,
}

/// Reference to decodable source media.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaSource {
    /// A video file on disk.
    File { path: PathBuf },

    /// Encoded video bytes held in memory. Materialized into the job's
    /// working area before decoding.
    Memory { bytes: Vec<u8> },
}

/// Per-clip effect settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsDescriptor {
    /// Playback rate multiplier (2.0 plays twice as fast).
    pub speed: f64,

    /// Whole-frame gaussian blur radius in output pixels. Ignored when the
    /// clip has any regional blur.
    pub uniform_blur: f64,

    /// Shaped blur regions, applied in list order.
    pub regional_blurs: Vec<BlurRegion>,
}

/// A shaped area of the displayed video that is blurred.
///
/// Coordinates are percentages `[0, 100]` of the drawn video rectangle,
/// not of the full output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlurRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,

    #[serde(default)]
    pub shape: BlurShape,

    /// Blur radius in output pixels.
    pub intensity: f64,
}

/// Outline of a blur region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlurShape {
    #[default]
    Rectangle,
    /// Ellipse inscribed in the region's bounding box.
    Circle,
}

impl Clip {
    /// Create a clip over a file with default effects.
    pub fn from_file(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        source_duration_secs: f64,
    ) -> Self {
        Self {
            id: id.into(),
            source: MediaSource::File { path: path.into() },
            source_start_secs: 0.0,
            source_duration_secs,
            sequence_start_secs: 0.0,
            effects: EffectsDescriptor::default(),
        }
    }

    /// Duration this clip occupies in the output after speed remapping.
    pub fn output_duration_secs(&self) -> f64 {
        self.source_duration_secs / self.effects.speed
    }

    /// Whether any regional blur is attached, regardless of its geometry.
    pub fn has_regional_blur(&self) -> bool {
        !self.effects.regional_blurs.is_empty()
    }
}

impl EffectsDescriptor {
    /// Uniform blur radius that actually applies: regional blur supersedes it.
    pub fn effective_uniform_blur(&self) -> f64 {
        if self.regional_blurs.is_empty() && self.uniform_blur > 0.0 {
            self.uniform_blur
        } else {
            0.0
        }
    }
}

impl Default for EffectsDescriptor {
    fn default() -> Self {
        Self {
            speed: 1.0,
            uniform_blur: 0.0,
            regional_blurs: vec![],
        }
    }
}

impl BlurRegion {
    /// Region covering the whole displayed video.
    pub fn full_frame(shape: BlurShape, intensity: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            shape,
            intensity,
        }
    }
}

impl MediaSource {
    /// File path for file-backed sources.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            MediaSource::File { path } => Some(path),
            MediaSource::Memory { .. } => None,
        }
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaSource::File { path } => f.debug_struct("File").field("path", path).finish(),
            MediaSource::Memory { bytes } => f
                .debug_struct("Memory")
                .field("len", &bytes.len())
                .finish(),
        }
    }
}
