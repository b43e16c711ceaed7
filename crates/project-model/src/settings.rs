//! Export output settings.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::project::ProjectError;

/// Output parameters for one export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Output resolution (width x height in pixels).
    pub width: u32,
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Output format.
    pub format: ExportFormat,

    /// Quality in `[0, 100]`. Higher never produces worse output.
    pub quality: u8,
}

/// Output artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Animated GIF.
    Gif,
    /// H.264 in an MP4 container.
    Mp4,
    /// VP9 in a WebM container.
    Webm,
}

/// Largest width or height a GIF can describe.
pub const GIF_MAX_DIMENSION: u32 = u16::MAX as u32;

impl ExportSettings {
    /// Check the structural invariants of the settings.
    pub fn validate(&self) -> Result<(), ProjectError> {
        if self.width == 0 || self.height == 0 {
            return Err(ProjectError::validation(format!(
                "output dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        // GIF logical screen sizes are 16-bit.
        if self.format == ExportFormat::Gif
            && (self.width > GIF_MAX_DIMENSION || self.height > GIF_MAX_DIMENSION)
        {
            return Err(ProjectError::validation(format!(
                "gif dimensions {}x{} exceed {GIF_MAX_DIMENSION}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(ProjectError::validation("fps must be positive"));
        }
        if self.quality > 100 {
            return Err(ProjectError::validation(format!(
                "quality must be within 0-100, got {}",
                self.quality
            )));
        }
        Ok(())
    }
}

impl ExportFormat {
    /// Whether this format is a compressed video (as opposed to an animated image).
    pub fn is_video(self) -> bool {
        match self {
            ExportFormat::Gif => false,
            ExportFormat::Mp4 | ExportFormat::Webm => true,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Gif => "image/gif",
            ExportFormat::Mp4 => "video/mp4",
            ExportFormat::Webm => "video/webm",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Gif => "gif",
            ExportFormat::Mp4 => "mp4",
            ExportFormat::Webm => "webm",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ProjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gif" => Ok(ExportFormat::Gif),
            "mp4" => Ok(ExportFormat::Mp4),
            "webm" => Ok(ExportFormat::Webm),
            other => Err(ProjectError::validation(format!(
                "unsupported format '{other}', expected one of: gif, mp4, webm"
            ))),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ExportSettings {
        ExportSettings {
            width: 320,
            height: 240,
            fps: 10,
            format: ExportFormat::Gif,
            quality: 80,
        }
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("GIF".parse::<ExportFormat>().unwrap(), ExportFormat::Gif);
        assert_eq!(" webm ".parse::<ExportFormat>().unwrap(), ExportFormat::Webm);
        assert!("mov".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(ExportFormat::Gif.mime_type(), "image/gif");
        assert_eq!(ExportFormat::Mp4.mime_type(), "video/mp4");
        assert_eq!(ExportFormat::Webm.mime_type(), "video/webm");
        assert!(!ExportFormat::Gif.is_video());
        assert!(ExportFormat::Mp4.is_video());
    }

    #[test]
    fn test_validate_rejects_zero_fps_and_dimensions() {
        assert!(settings().validate().is_ok());
        assert!(ExportSettings { fps: 0, ..settings() }.validate().is_err());
        assert!(ExportSettings { width: 0, ..settings() }.validate().is_err());
        assert!(ExportSettings {
            quality: 101,
            ..settings()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_odd_dimensions_are_valid_for_every_format() {
        for format in [ExportFormat::Gif, ExportFormat::Mp4, ExportFormat::Webm] {
            let odd = ExportSettings {
                width: 321,
                height: 239,
                format,
                ..settings()
            };
            assert!(odd.validate().is_ok(), "{format}");
        }
    }

    #[test]
    fn test_gif_dimensions_are_16_bit() {
        let edge = ExportSettings {
            width: GIF_MAX_DIMENSION,
            height: 10,
            ..settings()
        };
        assert!(edge.validate().is_ok());

        let err = ExportSettings {
            width: 70_000,
            ..edge
        }
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("exceed"));

        // Video containers have no such limit.
        assert!(ExportSettings {
            width: 70_000,
            format: ExportFormat::Webm,
            ..edge
        }
        .validate()
        .is_ok());
    }
}
