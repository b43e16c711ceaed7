//! Per-job working area.
//!
//! Each export owns one exclusive temporary directory holding materialized
//! in-memory sources, intermediate frame stills and the encoded output.
//! The directory is removed when the workspace is dropped, so every exit
//! path of a job (success, error, cancellation) releases it.

use std::path::{Path, PathBuf};

use montage_common::error::{MontageError, MontageResult};
use montage_project_model::clip::{Clip, MediaSource};
use montage_project_model::settings::ExportFormat;
use tempfile::TempDir;

/// printf-style pattern of intermediate stills, as handed to ffmpeg.
pub const FRAME_PATTERN: &str = "frame_%06d.png";

const WORKSPACE_PREFIX: &str = "montage-job-";

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh working directory under `root`, or under the system
    /// temp directory when `root` is `None`.
    pub fn create(root: Option<&Path>) -> MontageResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => {
                if root.exists() && !root.is_dir() {
                    return Err(MontageError::config(format!(
                        "work_dir {} is not a directory",
                        root.display()
                    )));
                }
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        tracing::debug!(path = %path.display(), "Created job workspace");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the still for output frame `index`; matches [`FRAME_PATTERN`].
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.path.join(format!("frame_{index:06}.png"))
    }

    pub fn frame_pattern(&self) -> PathBuf {
        self.path.join(FRAME_PATTERN)
    }

    pub fn output_path(&self, format: ExportFormat) -> PathBuf {
        self.path.join(format!("output.{}", format.extension()))
    }

    /// Path the decoder and engine should read clip `index` from.
    ///
    /// File sources are used in place; memory sources are written into the
    /// workspace first.
    pub fn materialize_source(&self, index: usize, clip: &Clip) -> MontageResult<PathBuf> {
        match &clip.source {
            MediaSource::File { path } => {
                if !path.exists() {
                    return Err(MontageError::FileNotFound { path: path.clone() });
                }
                Ok(path.clone())
            }
            MediaSource::Memory { bytes } => {
                let path = self.path.join(format!("source_{index:03}.media"));
                if !path.exists() {
                    std::fs::write(&path, bytes)?;
                    tracing::debug!(
                        clip = %clip.id,
                        bytes = bytes.len(),
                        path = %path.display(),
                        "Materialized in-memory source"
                    );
                }
                Ok(path)
            }
        }
    }

    /// Delete every intermediate still. Safe to call repeatedly.
    pub fn remove_frames(&self) -> MontageResult<usize> {
        let entries = match std::fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if is_frame_still(&path) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove the whole working directory. Safe to call repeatedly.
    pub fn cleanup(&mut self) -> MontageResult<()> {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            dir.close()?;
            tracing::debug!(path = %path.display(), "Removed job workspace");
        }
        Ok(())
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.dir.is_none()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove job workspace");
        }
    }
}

fn is_frame_still(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with("frame_") && name.ends_with(".png"))
}
