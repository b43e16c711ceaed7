//! Export a manifest to a file.

use std::io::Write;
use std::path::PathBuf;

use montage_common::config::AppConfig;
use montage_project_model::project::ExportManifest;
use montage_project_model::settings::{ExportFormat, ExportSettings};
use montage_render_engine::{ExportJob, ExportProgress, Exporter, ProgressCallback};

/// Command-line values that replace the manifest's settings.
#[derive(Debug, Default)]
pub struct SettingsOverrides {
    pub format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub quality: Option<u8>,
}

impl SettingsOverrides {
    fn apply(&self, settings: &mut ExportSettings) -> anyhow::Result<()> {
        if let Some(format) = &self.format {
            settings.format = format
                .parse::<ExportFormat>()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        if let Some(width) = self.width {
            settings.width = width;
        }
        if let Some(height) = self.height {
            settings.height = height;
        }
        if let Some(fps) = self.fps {
            settings.fps = fps;
        }
        if let Some(quality) = self.quality {
            settings.quality = quality;
        }
        Ok(())
    }
}

pub async fn run(
    config: &AppConfig,
    manifest_path: PathBuf,
    output: PathBuf,
    overrides: SettingsOverrides,
) -> anyhow::Result<()> {
    println!("Exporting manifest: {}", manifest_path.display());

    let fallback = super::default_settings(&config.export)?;
    let mut manifest = ExportManifest::load_with_default_settings(&manifest_path, &fallback)
        .map_err(|e| anyhow::anyhow!("Failed to load manifest: {e}"))?;
    overrides.apply(&mut manifest.settings)?;

    let job = ExportJob::from_manifest(manifest)?;
    let settings = *job.settings();

    println!("  Output: {}", output.display());
    println!("  Format: {}", settings.format);
    println!("  Resolution: {}x{} @ {} fps", settings.width, settings.height, settings.fps);
    println!("  Clips: {}", job.clips().len());
    println!("  Frames: {}", job.total_frames());
    println!("  Backend: {}", job.backend_kind());

    let progress_cb: ProgressCallback = Box::new(|p: ExportProgress| {
        print!(
            "\r  Progress: {:>3}% [{:?}] ({}/{} frames)  ",
            p.percent, p.stage, p.frames_rendered, p.total_frames,
        );
        std::io::stdout().flush().ok();
    });

    let exporter = Exporter::from_config(config);
    let artifact = match exporter.run(&job, Some(progress_cb)).await {
        Ok(artifact) => artifact,
        Err(e) => {
            println!();
            return Err(anyhow::anyhow!("Export failed: {e}"));
        }
    };

    artifact.write_to(&output)?;
    println!(
        "\nExport complete: {} ({} bytes, {})",
        output.display(),
        artifact.len(),
        artifact.mime_type()
    );
    Ok(())
}
