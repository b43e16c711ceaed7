//! Compressed-video backend driven by one declarative ffmpeg filter graph.
//!
//! The engine trims, retimes, scales, pads and concatenates the clips
//! itself; no frame passes through this process.

use std::path::PathBuf;

use async_trait::async_trait;
use montage_common::error::MontageResult;
use montage_project_model::clip::Clip;
use montage_project_model::settings::ExportSettings;

use super::{RenderBackend, RenderContext};
use crate::engine::{base_args, codec_args, even_size_pad};
use crate::export::ExportJob;
use crate::progress::{ExportStage, ProgressBand};

const ENCODE_BAND: ProgressBand = ProgressBand::new(0.0, 100.0);

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterGraphBackend;

#[async_trait]
impl RenderBackend for FilterGraphBackend {
    async fn render(&self, job: &ExportJob, ctx: &RenderContext<'_>) -> MontageResult<Vec<u8>> {
        let settings = *job.settings();
        let mut inputs: Vec<PathBuf> = Vec::with_capacity(job.clips().len());
        for (index, clip) in job.clips().iter().enumerate() {
            inputs.push(ctx.workspace.materialize_source(index, clip)?);
        }

        let graph = build_filter_graph(job.clips(), &settings);
        let output = ctx.workspace.output_path(settings.format);

        let mut args = base_args();
        for input in &inputs {
            args.push("-i".to_string());
            args.push(input.display().to_string());
        }
        args.extend([
            "-filter_complex".to_string(),
            graph,
            "-map".to_string(),
            "[vout]".to_string(),
        ]);
        args.extend(codec_args(&settings)?);
        args.push(output.display().to_string());

        tracing::info!(
            inputs = inputs.len(),
            duration_secs = job.timeline().total_duration_secs(),
            "Built filter graph plan"
        );

        let tracker = &ctx.tracker;
        let expected = job.timeline().total_duration_secs();
        tracker.report(ENCODE_BAND, 0.0, ExportStage::Encoding);
        ctx.engine
            .run(&args, expected, &|fraction| {
                tracker.report(ENCODE_BAND, fraction, ExportStage::Encoding)
            })
            .await?;

        Ok(tokio::fs::read(&output).await?)
    }

    fn name(&self) -> &'static str {
        "filter-graph"
    }
}

/// Build the `-filter_complex` graph for `clips`, producing `[vout]`.
///
/// Input `i` of the engine must be the source of `clips[i]`.
pub fn build_filter_graph(clips: &[Clip], settings: &ExportSettings) -> String {
    let (w, h, fps) = (settings.width, settings.height, settings.fps);
    let mut chains = Vec::with_capacity(clips.len() + 1);
    let mut labels = String::new();

    for (index, clip) in clips.iter().enumerate() {
        let mut filters = vec![
            format!(
                "trim=start={:.6}:duration={:.6}",
                clip.source_start_secs, clip.source_duration_secs
            ),
            format!("setpts=(PTS-STARTPTS)/{:.6}", clip.effects.speed),
            format!("scale={w}:{h}:force_original_aspect_ratio=decrease"),
        ];
        let blur = clip.effects.effective_uniform_blur();
        if blur > 0.0 {
            filters.push(format!("gblur=sigma={blur:.3}"));
        }
        filters.extend([
            format!("pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black"),
            format!("fps={fps}"),
            "setsar=1".to_string(),
            "format=yuv420p".to_string(),
        ]);

        chains.push(format!("[{index}:v]{}[v{index}]", filters.join(",")));
        labels.push_str(&format!("[v{index}]"));
    }

    let mut tail = format!("concat=n={}:v=1:a=0", clips.len());
    if let Some(pad) = even_size_pad(settings) {
        tail.push(',');
        tail.push_str(&pad);
    }
    chains.push(format!("{labels}{tail}[vout]"));
    chains.join(";")
}
