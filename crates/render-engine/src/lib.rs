//! Montage Render Engine
//!
//! Offline export pipeline that turns a clip sequence into one artifact:
//!
//! - **Timeline:** output frame index → (clip, source time)
//! - **Compositor:** letterboxing, uniform and regional blur
//! - **Decoders:** per-clip frame access with bounded seek retries
//! - **Backends:** animated GIF, ffmpeg filter graph, per-frame fallback
//! - **Export:** backend selection, progress and working-area lifetime

pub mod backend;
pub mod compositor;
pub mod decoder;
pub mod engine;
pub mod export;
pub mod frames;
pub mod gif_encoder;
pub mod progress;
pub mod timeline;
pub mod workspace;

pub use backend::BackendKind;
pub use export::*;
pub use progress::{ExportProgress, ExportStage, ProgressCallback};
