//! Export jobs and the orchestrator.
//!
//! An [`ExportJob`] is a validated, sequence-ordered clip list plus output
//! settings. The [`Exporter`] picks the backend for it, owns the job's
//! working area and its progress counter, and turns the backend's bytes
//! into an [`ExportArtifact`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use montage_common::config::AppConfig;
use montage_common::error::{MontageError, MontageResult};
use montage_project_model::clip::Clip;
use montage_project_model::project::{validate_export, ExportManifest, ProjectError};
use montage_project_model::settings::{ExportFormat, ExportSettings};

use crate::backend::{BackendKind, RenderContext};
use crate::decoder::{DecoderOpener, FfmpegDecoderOpener, SeekPolicy};
use crate::engine::FfmpegEngine;
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::timeline::FrameTimeline;
use crate::workspace::Workspace;

/// A validated export request.
#[derive(Debug, Clone)]
pub struct ExportJob {
    clips: Vec<Clip>,
    settings: ExportSettings,
    timeline: FrameTimeline,
}

impl ExportJob {
    /// Validate `clips` and `settings` and order the clips by sequence
    /// position. Clips with equal positions keep their given order.
    pub fn new(mut clips: Vec<Clip>, settings: ExportSettings) -> MontageResult<Self> {
        validate_export(&clips, &settings).map_err(precondition_error)?;
        clips.sort_by(|a, b| a.sequence_start_secs.total_cmp(&b.sequence_start_secs));
        let timeline = FrameTimeline::new(&clips, settings.fps)?;
        Ok(Self {
            clips,
            settings,
            timeline,
        })
    }

    pub fn from_manifest(manifest: ExportManifest) -> MontageResult<Self> {
        Self::new(manifest.clips, manifest.settings)
    }

    /// Clips in sequence order.
    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub fn timeline(&self) -> &FrameTimeline {
        &self.timeline
    }

    pub fn total_frames(&self) -> u64 {
        self.timeline.total_frames()
    }

    /// Whether any clip carries a regional blur, visible or not.
    pub fn has_regional_blur(&self) -> bool {
        self.clips.iter().any(Clip::has_regional_blur)
    }

    pub fn backend_kind(&self) -> BackendKind {
        BackendKind::for_job(self)
    }
}

/// Encoded export output.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub format: ExportFormat,
}

impl ExportArtifact {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write the artifact to `path`, creating parent directories.
    pub fn write_to(&self, path: impl AsRef<Path>) -> MontageResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for ExportArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportArtifact")
            .field("format", &self.format)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Runs export jobs.
#[derive(Clone)]
pub struct Exporter {
    engine: FfmpegEngine,
    opener: Arc<dyn DecoderOpener>,
    seek_policy: SeekPolicy,
    work_root: Option<PathBuf>,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl Exporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            engine: FfmpegEngine::from_config(&config.engine),
            opener: Arc::new(FfmpegDecoderOpener::from_config(&config.engine)),
            seek_policy: SeekPolicy::from(&config.seek),
            work_root: config.engine.work_dir.clone(),
        }
    }

    pub fn with_decoder_opener(mut self, opener: impl DecoderOpener + 'static) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    pub fn with_engine(mut self, engine: FfmpegEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_seek_policy(mut self, policy: SeekPolicy) -> Self {
        self.seek_policy = policy;
        self
    }

    /// Create job working areas under `root` instead of the system temp dir.
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Validate and run one export.
    pub async fn export(
        &self,
        clips: Vec<Clip>,
        settings: ExportSettings,
        progress: Option<ProgressCallback>,
    ) -> MontageResult<ExportArtifact> {
        let job = ExportJob::new(clips, settings)?;
        self.run(&job, progress).await
    }

    /// Run an already validated job.
    ///
    /// `progress` sees non-decreasing percentages and 100 only when the
    /// returned artifact is complete. The job's working area is removed on
    /// every exit path.
    pub async fn run(
        &self,
        job: &ExportJob,
        progress: Option<ProgressCallback>,
    ) -> MontageResult<ExportArtifact> {
        let kind = job.backend_kind();
        let settings = job.settings();
        tracing::info!(
            format = %settings.format,
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            clips = job.clips().len(),
            total_frames = job.total_frames(),
            backend = %kind,
            "Starting export"
        );

        if kind.needs_engine() {
            let engine = self.engine.clone();
            let available = tokio::task::spawn_blocking(move || engine.is_available())
                .await
                .unwrap_or(false);
            if !available {
                return Err(MontageError::unsupported(format!(
                    "{} export needs ffmpeg, which could not be started at '{}'",
                    settings.format,
                    self.engine.binary().display()
                )));
            }
        }

        let tracker = Arc::new(ProgressTracker::new(progress));
        tracker.set_total_frames(job.total_frames());

        let mut workspace = Workspace::create(self.work_root.as_deref())?;
        let backend = kind.create();
        let started = std::time::Instant::now();
        let result = {
            let ctx = RenderContext {
                workspace: &workspace,
                tracker: tracker.clone(),
                engine: &self.engine,
                opener: self.opener.as_ref(),
                seek_policy: &self.seek_policy,
            };
            backend.render(job, &ctx).await
        };

        if let Err(e) = workspace.cleanup() {
            tracing::warn!(error = %e, "Failed to remove job workspace");
        }

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(backend = backend.name(), error = %e, "Export failed");
                return Err(e);
            }
        };
        if bytes.is_empty() {
            return Err(MontageError::encode(format!(
                "{} backend produced an empty artifact",
                backend.name()
            )));
        }

        tracker.complete();
        tracing::info!(
            backend = backend.name(),
            bytes = bytes.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Export finished"
        );
        Ok(ExportArtifact {
            bytes,
            format: settings.format,
        })
    }
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("engine", &self.engine)
            .field("seek_policy", &self.seek_policy)
            .field("work_root", &self.work_root)
            .finish_non_exhaustive()
    }
}

/// Export `clips` with the default engine configuration.
///
/// This is the main entry point for rendering.
pub async fn export(
    clips: Vec<Clip>,
    settings: ExportSettings,
    progress: Option<ProgressCallback>,
) -> MontageResult<ExportArtifact> {
    Exporter::new().export(clips, settings, progress).await
}

fn precondition_error(error: ProjectError) -> MontageError {
    match error {
        ProjectError::ValidationError { message } => MontageError::precondition(message),
        other => MontageError::precondition(other.to_string()),
    }
}
