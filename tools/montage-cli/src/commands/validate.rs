//! Validate an export manifest.

use std::path::PathBuf;

use montage_common::config::AppConfig;
use montage_project_model::clip::MediaSource;
use montage_project_model::project::ExportManifest;
use montage_render_engine::ExportJob;

pub fn run(config: &AppConfig, path: PathBuf) -> anyhow::Result<()> {
    println!("Validating manifest: {}", path.display());

    let fallback = super::default_settings(&config.export)?;
    let manifest = ExportManifest::load_with_default_settings(&path, &fallback)
        .map_err(|e| anyhow::anyhow!("Failed to load manifest: {e}"))?;

    let settings = manifest.settings;
    println!("  Version: {}", manifest.version);
    println!("  Format: {}", settings.format);
    println!(
        "  Resolution: {}x{} @ {} fps",
        settings.width, settings.height, settings.fps
    );
    println!("  Quality: {}", settings.quality);
    println!("  Clips: {}", manifest.clips.len());
    for clip in &manifest.clips {
        let source = match &clip.source {
            MediaSource::File { path } => path.display().to_string(),
            MediaSource::Memory { bytes } => format!("<{} bytes in memory>", bytes.len()),
        };
        println!(
            "     {} {:.2}s from {:.2}s at {}x, {} blur region(s): {}",
            clip.id,
            clip.source_duration_secs,
            clip.source_start_secs,
            clip.effects.speed,
            clip.effects.regional_blurs.len(),
            source
        );
    }

    let issues = manifest.validate();
    if !issues.is_empty() {
        println!("\nValidation issues:");
        for issue in &issues {
            println!("  - {issue}");
        }
        anyhow::bail!("{} issue(s) found", issues.len());
    }

    let job = ExportJob::from_manifest(manifest)?;
    println!("  Output duration: {:.2}s", job.timeline().total_duration_secs());
    for (index, clip) in job.clips().iter().enumerate() {
        if let Some((start, end)) = job.timeline().clip_output_range(index) {
            println!("     {} plays {:.2}s - {:.2}s", clip.id, start, end);
        }
    }
    println!("  Frames: {}", job.total_frames());
    println!("  Backend: {}", job.backend_kind());
    println!("\nManifest is valid.");
    Ok(())
}
