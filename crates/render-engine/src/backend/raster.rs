//! Animated GIF backend: frame loop into an in-memory GIF encoder.

use async_trait::async_trait;
use montage_common::error::{MontageError, MontageResult};

use super::{RenderBackend, RenderContext};
use crate::export::ExportJob;
use crate::frames::{preload_decoders, render_frames};
use crate::gif_encoder::GifEncoder;
use crate::progress::{ExportStage, ProgressBand};

const PRELOAD_BAND: ProgressBand = ProgressBand::new(0.0, 5.0);
const FRAMES_BAND: ProgressBand = ProgressBand::new(5.0, 80.0);
const ENCODE_BAND: ProgressBand = ProgressBand::new(80.0, 100.0);

#[derive(Debug, Clone, Copy, Default)]
pub struct RasterBackend;

#[async_trait]
impl RenderBackend for RasterBackend {
    async fn render(&self, job: &ExportJob, ctx: &RenderContext<'_>) -> MontageResult<Vec<u8>> {
        let settings = job.settings();
        let mut encoder =
            GifEncoder::new(settings.width, settings.height, settings.fps, settings.quality)?;

        let mut decoders =
            preload_decoders(job, ctx.workspace, ctx.opener, &ctx.tracker, PRELOAD_BAND).await?;
        render_frames(
            job,
            &mut decoders,
            ctx.seek_policy,
            &mut encoder,
            &ctx.tracker,
            FRAMES_BAND,
        )
        .await?;
        drop(decoders);

        tracing::info!(frames = encoder.frame_count(), "Compressing gif");
        let tracker = ctx.tracker.clone();
        tracker.report(ENCODE_BAND, 0.0, ExportStage::Encoding);
        tokio::task::spawn_blocking(move || {
            encoder.finish(|fraction| tracker.report(ENCODE_BAND, fraction, ExportStage::Encoding))
        })
        .await
        .map_err(|e| MontageError::encode(format!("gif encoder task failed: {e}")))?
    }

    fn name(&self) -> &'static str {
        "raster"
    }
}
