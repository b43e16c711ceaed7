//! Compressed-video fallback for clips with regional blurs.
//!
//! Frames are composited in-process, written as numbered PNG stills and
//! encoded by one engine run over the image sequence. The stills are
//! removed whether or not the run succeeds.

use async_trait::async_trait;
use montage_common::error::{MontageError, MontageResult};

use super::{RenderBackend, RenderContext};
use crate::engine::{base_args, codec_args, even_size_pad};
use crate::export::ExportJob;
use crate::frames::{preload_decoders, render_frames, StillWriter};
use crate::progress::{ExportStage, ProgressBand};

const PRELOAD_BAND: ProgressBand = ProgressBand::new(0.0, 5.0);
const FRAMES_BAND: ProgressBand = ProgressBand::new(5.0, 70.0);
const ENCODE_BAND: ProgressBand = ProgressBand::new(70.0, 100.0);

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSequenceBackend;

impl FrameSequenceBackend {
    async fn render_stills_and_encode(
        &self,
        job: &ExportJob,
        ctx: &RenderContext<'_>,
    ) -> MontageResult<Vec<u8>> {
        let settings = *job.settings();

        let mut decoders =
            preload_decoders(job, ctx.workspace, ctx.opener, &ctx.tracker, PRELOAD_BAND).await?;
        let mut writer = StillWriter::new(ctx.workspace);
        render_frames(
            job,
            &mut decoders,
            ctx.seek_policy,
            &mut writer,
            &ctx.tracker,
            FRAMES_BAND,
        )
        .await?;
        drop(decoders);

        let written = writer.written();
        if written == 0 {
            return Err(MontageError::render("no frames were rendered"));
        }

        let output = ctx.workspace.output_path(settings.format);
        let video_filter = match even_size_pad(&settings) {
            Some(pad) => format!("setsar=1,{pad}"),
            None => "setsar=1".to_string(),
        };
        let mut args = base_args();
        args.extend([
            "-framerate".to_string(),
            settings.fps.to_string(),
            "-start_number".to_string(),
            "0".to_string(),
            "-i".to_string(),
            ctx.workspace.frame_pattern().display().to_string(),
            "-vf".to_string(),
            video_filter,
        ]);
        args.extend(codec_args(&settings)?);
        args.push(output.display().to_string());

        tracing::info!(frames = written, "Encoding frame sequence");
        let tracker = &ctx.tracker;
        let expected = written as f64 / settings.fps as f64;
        tracker.report(ENCODE_BAND, 0.0, ExportStage::Encoding);
        ctx.engine
            .run(&args, expected, &|fraction| {
                tracker.report(ENCODE_BAND, fraction, ExportStage::Encoding)
            })
            .await?;

        Ok(tokio::fs::read(&output).await?)
    }
}

#[async_trait]
impl RenderBackend for FrameSequenceBackend {
    async fn render(&self, job: &ExportJob, ctx: &RenderContext<'_>) -> MontageResult<Vec<u8>> {
        let result = self.render_stills_and_encode(job, ctx).await;
        match ctx.workspace.remove_frames() {
            Ok(removed) => tracing::debug!(removed, "Removed intermediate stills"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove intermediate stills"),
        }
        result
    }

    fn name(&self) -> &'static str {
        "frame-sequence"
    }
}
