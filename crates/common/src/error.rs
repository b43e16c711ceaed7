//! Error types shared across Montage crates.

use std::path::PathBuf;

/// Top-level error type for Montage operations.
#[derive(Debug, thiserror::Error)]
pub enum MontageError {
    /// Malformed clips or settings, rejected before any resource is allocated.
    #[error("Invalid export request: {message}")]
    Precondition { message: String },

    /// A source clip could not be opened or never became seekable.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// The external transcoding engine failed to start or exited abnormally.
    #[error("Engine error: {message}{}", format_diagnostics(.diagnostics))]
    Engine {
        message: String,
        diagnostics: Option<String>,
    },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MontageError.
pub type MontageResult<T> = Result<T, MontageError>;

fn format_diagnostics(diagnostics: &Option<String>) -> String {
    match diagnostics.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => format!(": {text}"),
        _ => String::new(),
    }
}

impl MontageError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine {
            message: msg.into(),
            diagnostics: None,
        }
    }

    /// Engine failure with the engine's own diagnostic output attached.
    pub fn engine_with_diagnostics(msg: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::Engine {
            message: msg.into(),
            diagnostics: Some(diagnostics.into()),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this error was raised before the job touched any resource.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }
}
