//! The shared decode → timeline → compositor frame loop.
//!
//! Both frame-based backends (animated image and per-frame video fallback)
//! run this loop and differ only in the [`FrameSink`] that receives each
//! composited raster.

use image::RgbaImage;
use montage_common::error::{MontageError, MontageResult};

use crate::compositor::{blank_frame, composite};
use crate::decoder::{seek_with_retry, ClipDecoder, DecoderOpener, SeekPolicy};
use crate::export::ExportJob;
use crate::progress::{ExportStage, ProgressBand, ProgressTracker};
use crate::workspace::Workspace;

/// Frames between cooperative yields to the runtime.
const YIELD_EVERY_FRAMES: u64 = 4;

/// Receives composited frames in increasing index order.
pub trait FrameSink: Send {
    fn accept(&mut self, index: u64, frame: RgbaImage) -> MontageResult<()>;
}

/// Writes every frame as a numbered PNG still in the job workspace.
#[derive(Debug)]
pub struct StillWriter<'a> {
    workspace: &'a Workspace,
    written: u64,
}

impl<'a> StillWriter<'a> {
    pub fn new(workspace: &'a Workspace) -> Self {
        Self {
            workspace,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl FrameSink for StillWriter<'_> {
    fn accept(&mut self, index: u64, frame: RgbaImage) -> MontageResult<()> {
        let path = self.workspace.frame_path(index);
        frame.save_with_format(&path, image::ImageFormat::Png)?;
        self.written += 1;
        Ok(())
    }
}

/// Counters from one pass of the frame loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_rendered: u64,
    /// Frames with no active clip.
    pub blank_frames: u64,
    /// Seeks that exhausted their retry budget.
    pub best_effort_seeks: u64,
}

/// Open one decoder per clip, in sequence order.
///
/// A clip that fails to open or never reports its frame size is fatal.
pub async fn preload_decoders(
    job: &ExportJob,
    workspace: &Workspace,
    opener: &dyn DecoderOpener,
    tracker: &ProgressTracker,
    band: ProgressBand,
) -> MontageResult<Vec<Box<dyn ClipDecoder>>> {
    let clips = job.clips();
    let mut decoders = Vec::with_capacity(clips.len());

    for (index, clip) in clips.iter().enumerate() {
        let source = workspace
            .materialize_source(index, clip)
            .map_err(|e| as_decode_error(&clip.id, e))?;
        let decoder = opener
            .open(clip, &source)
            .await
            .map_err(|e| as_decode_error(&clip.id, e))?;

        if !decoder.is_ready() {
            return Err(MontageError::decode(format!(
                "clip '{}' never reported its frame size",
                clip.id
            )));
        }

        let (width, height) = decoder.dimensions();
        tracing::info!(clip = %clip.id, index, width, height, "Decoder ready");
        decoders.push(decoder);
        tracker.report(
            band,
            (index + 1) as f64 / clips.len() as f64,
            ExportStage::Preparing,
        );
    }

    Ok(decoders)
}

/// Render every output frame of `job` into `sink`.
pub async fn render_frames(
    job: &ExportJob,
    decoders: &mut [Box<dyn ClipDecoder>],
    policy: &SeekPolicy,
    sink: &mut dyn FrameSink,
    tracker: &ProgressTracker,
    band: ProgressBand,
) -> MontageResult<RenderStats> {
    let timeline = job.timeline();
    let settings = job.settings();
    let total = timeline.total_frames();
    if decoders.len() != job.clips().len() {
        return Err(MontageError::render(format!(
            "{} decoders for {} clips",
            decoders.len(),
            job.clips().len()
        )));
    }

    let mut stats = RenderStats::default();
    for index in 0..total {
        let frame = match timeline.resolve(index) {
            Some(position) => {
                let clip = &job.clips()[position.clip_index];
                let decoder = decoders[position.clip_index].as_mut();
                let target = clip.source_start_secs + position.local_time_secs;

                let outcome = seek_with_retry(decoder, target, policy).await;
                if !outcome.reached() {
                    stats.best_effort_seeks += 1;
                }
                match decoder.current_frame() {
                    Some(decoded) => {
                        composite(decoded, &clip.effects, settings.width, settings.height)
                    }
                    None => blank_frame(settings.width, settings.height),
                }
            }
            None => {
                stats.blank_frames += 1;
                blank_frame(settings.width, settings.height)
            }
        };

        sink.accept(index, frame)?;
        stats.frames_rendered += 1;
        tracker.report_frames(band, stats.frames_rendered);

        if index % YIELD_EVERY_FRAMES == YIELD_EVERY_FRAMES - 1 {
            tokio::task::yield_now().await;
        }
    }

    tracing::info!(
        frames = stats.frames_rendered,
        blank = stats.blank_frames,
        best_effort_seeks = stats.best_effort_seeks,
        "Frame loop finished"
    );
    Ok(stats)
}

fn as_decode_error(clip_id: &str, error: MontageError) -> MontageError {
    match error {
        MontageError::Decode { .. } => error,
        other => MontageError::decode(format!("clip '{clip_id}' could not be opened: {other}")),
    }
}
