pub mod check;
pub mod export;
pub mod validate;

use montage_common::config::ExportDefaults;
use montage_project_model::settings::{ExportFormat, ExportSettings};

/// Settings for manifests that carry none, from the `export` config section.
pub fn default_settings(defaults: &ExportDefaults) -> anyhow::Result<ExportSettings> {
    let format = defaults
        .format
        .parse::<ExportFormat>()
        .map_err(|e| anyhow::anyhow!("Invalid default export format in config: {e}"))?;
    Ok(ExportSettings {
        width: defaults.width,
        height: defaults.height,
        fps: defaults.fps,
        format,
        quality: defaults.quality,
    })
}
