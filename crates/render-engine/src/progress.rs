//! Export progress reporting.
//!
//! Every job exposes one integer percentage that never goes backwards and
//! only reaches 100 once the artifact is complete. Backends report into
//! fixed bands of the 0–100 scale (for example frame generation 5–80 and
//! compression 80–100) and the tracker maps and clamps those reports.

use std::sync::Mutex;

/// Export progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportProgress {
    /// Overall progress in `[0, 100]`.
    pub percent: u8,

    /// Frames rendered so far (frame-based backends only).
    pub frames_rendered: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Current stage.
    pub stage: ExportStage,
}

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Preparing,
    Rendering,
    Encoding,
    Complete,
}

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send + Sync>;

/// A sub-range of the 0–100 progress scale owned by one pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressBand {
    start: f64,
    end: f64,
}

impl ProgressBand {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Map a phase-local fraction in `[0, 1]` onto the overall scale.
    pub fn map(&self, fraction: f64) -> f64 {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.start + (self.end - self.start) * fraction
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackerState {
    percent: u8,
    frames_rendered: u64,
    total_frames: u64,
    stage: ExportStage,
}

/// Monotonic progress counter shared by the orchestrator and its backend.
pub struct ProgressTracker {
    callback: Option<ProgressCallback>,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            state: Mutex::new(TrackerState {
                percent: 0,
                frames_rendered: 0,
                total_frames: 0,
                stage: ExportStage::Preparing,
            }),
        }
    }

    pub fn set_total_frames(&self, total_frames: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.total_frames = total_frames;
        }
    }

    /// Current overall percentage.
    pub fn percent(&self) -> u8 {
        self.state.lock().map(|s| s.percent).unwrap_or(0)
    }

    /// Report a phase-local fraction within `band`.
    pub fn report(&self, band: ProgressBand, fraction: f64, stage: ExportStage) {
        self.update(band.map(fraction), stage, None);
    }

    /// Report that `frames_rendered` frames are done within `band`.
    pub fn report_frames(&self, band: ProgressBand, frames_rendered: u64) {
        let total = self.state.lock().map(|s| s.total_frames).unwrap_or(0);
        let fraction = if total == 0 {
            1.0
        } else {
            frames_rendered as f64 / total as f64
        };
        self.update(band.map(fraction), ExportStage::Rendering, Some(frames_rendered));
    }

    /// Mark the job complete: the only way to reach 100.
    pub fn complete(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.percent = 100;
        state.stage = ExportStage::Complete;
        state.frames_rendered = state.frames_rendered.max(state.total_frames);
        self.emit(&state);
    }

    fn update(&self, percent: f64, stage: ExportStage, frames_rendered: Option<u64>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        // 100 is reserved for `complete`.
        let percent = percent.floor().clamp(0.0, 99.0) as u8;
        let advanced = percent > state.percent
            || stage != state.stage
            || frames_rendered.is_some_and(|f| f > state.frames_rendered);
        if !advanced {
            return;
        }

        state.percent = state.percent.max(percent);
        state.stage = stage;
        if let Some(frames) = frames_rendered {
            state.frames_rendered = state.frames_rendered.max(frames);
        }
        self.emit(&state);
    }

    fn emit(&self, state: &TrackerState) {
        if let Some(cb) = &self.callback {
            cb(ExportProgress {
                percent: state.percent,
                frames_rendered: state.frames_rendered,
                total_frames: state.total_frames,
                stage: state.stage,
            });
        }
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("percent", &self.percent())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
