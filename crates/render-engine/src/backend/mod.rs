//! Render backends.
//!
//! | format   | regional blur | backend                      |
//! |----------|---------------|------------------------------|
//! | gif      | any           | [`RasterBackend`]            |
//! | mp4/webm | no            | [`FilterGraphBackend`]       |
//! | mp4/webm | yes           | [`FrameSequenceBackend`]     |
//!
//! Selection is static: a failing backend fails the job, it never hands
//! over to another one.

mod filter_graph;
mod frame_sequence;
mod raster;

pub use filter_graph::{build_filter_graph, FilterGraphBackend};
pub use frame_sequence::FrameSequenceBackend;
pub use raster::RasterBackend;

use std::sync::Arc;

use async_trait::async_trait;
use montage_common::error::MontageResult;
use montage_project_model::settings::ExportFormat;

use crate::decoder::{DecoderOpener, SeekPolicy};
use crate::engine::FfmpegEngine;
use crate::export::ExportJob;
use crate::progress::ProgressTracker;
use crate::workspace::Workspace;

/// Everything a backend borrows from the orchestrator for one job.
pub struct RenderContext<'a> {
    pub workspace: &'a Workspace,
    pub tracker: Arc<ProgressTracker>,
    pub engine: &'a FfmpegEngine,
    pub opener: &'a dyn DecoderOpener,
    pub seek_policy: &'a SeekPolicy,
}

/// Trait for render backends.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Produce the encoded artifact bytes for `job`.
    async fn render(&self, job: &ExportJob, ctx: &RenderContext<'_>) -> MontageResult<Vec<u8>>;

    /// Backend name.
    fn name(&self) -> &'static str;
}

/// Which backend serves a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Raster,
    FilterGraph,
    FrameSequence,
}

impl BackendKind {
    /// Choose a backend from the output format and whether any clip carries
    /// regional blurs (visible or not).
    pub fn select(format: ExportFormat, has_regional_blur: bool) -> Self {
        match (format, has_regional_blur) {
            (ExportFormat::Gif, _) => BackendKind::Raster,
            (ExportFormat::Mp4 | ExportFormat::Webm, false) => BackendKind::FilterGraph,
            (ExportFormat::Mp4 | ExportFormat::Webm, true) => BackendKind::FrameSequence,
        }
    }

    pub fn for_job(job: &ExportJob) -> Self {
        Self::select(job.settings().format, job.has_regional_blur())
    }

    /// Whether the backend needs the external transcoding engine.
    pub fn needs_engine(self) -> bool {
        !matches!(self, BackendKind::Raster)
    }

    pub fn create(self) -> Box<dyn RenderBackend> {
        match self {
            BackendKind::Raster => Box::new(RasterBackend),
            BackendKind::FilterGraph => Box::new(FilterGraphBackend),
            BackendKind::FrameSequence => Box::new(FrameSequenceBackend),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Raster => "raster",
            BackendKind::FilterGraph => "filter-graph",
            BackendKind::FrameSequence => "frame-sequence",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
