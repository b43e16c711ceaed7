//! Frame timeline: maps output frame indices to clip-local source times.
//!
//! Each clip occupies `source_duration / speed` seconds of output. Clips are
//! laid end to end in sequence order and every clip owns the half-open
//! interval `[start, start + output_duration)`, so a frame that lands exactly
//! on a boundary belongs to the later clip.

use montage_common::error::{MontageError, MontageResult};
use montage_project_model::clip::Clip;

/// Safety margin kept between a seek target and the end of a clip's source
/// range so decoders are never asked for a frame at end-of-stream.
pub const END_OF_STREAM_MARGIN_SECS: f64 = 0.01;

/// Slack absorbing floating-point drift when comparing against boundaries.
const BOUNDARY_EPSILON_SECS: f64 = 1e-9;

/// Where an output frame comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePosition {
    /// Index of the active clip in sequence order.
    pub clip_index: usize,
    /// Time within the clip's trimmed source range, in seconds.
    pub local_time_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    output_start: f64,
    output_end: f64,
    speed: f64,
    source_duration: f64,
}

/// Precomputed output layout of a clip sequence at a fixed frame rate.
#[derive(Debug, Clone)]
pub struct FrameTimeline {
    fps: u32,
    segments: Vec<Segment>,
}

impl FrameTimeline {
    /// Build the timeline for `clips` (already in sequence order) at `fps`.
    pub fn new(clips: &[Clip], fps: u32) -> MontageResult<Self> {
        if fps == 0 {
            return Err(MontageError::precondition("fps must be positive"));
        }

        let mut segments = Vec::with_capacity(clips.len());
        let mut cursor = 0.0f64;
        for (index, clip) in clips.iter().enumerate() {
            let speed = clip.effects.speed;
            let source_duration = clip.source_duration_secs;
            if !(speed.is_finite() && speed > 0.0) {
                return Err(MontageError::precondition(format!(
                    "clip {index} has non-positive speed {speed}"
                )));
            }
            if !(source_duration.is_finite() && source_duration > 0.0) {
                return Err(MontageError::precondition(format!(
                    "clip {index} has non-positive duration {source_duration}"
                )));
            }

            let output_end = cursor + source_duration / speed;
            segments.push(Segment {
                output_start: cursor,
                output_end,
                speed,
                source_duration,
            });
            cursor = output_end;
        }

        Ok(Self { fps, segments })
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Total output duration in seconds.
    pub fn total_duration_secs(&self) -> f64 {
        self.segments.last().map(|s| s.output_end).unwrap_or(0.0)
    }

    /// Number of output frames: `ceil(total_duration * fps)`.
    pub fn total_frames(&self) -> u64 {
        let exact = self.total_duration_secs() * self.fps as f64;
        (exact - BOUNDARY_EPSILON_SECS).ceil().max(0.0) as u64
    }

    /// Output interval `(start, end)` of a clip, in seconds.
    pub fn clip_output_range(&self, clip_index: usize) -> Option<(f64, f64)> {
        self.segments
            .get(clip_index)
            .map(|s| (s.output_start, s.output_end))
    }

    /// Resolve an output frame to its clip and clip-local source time.
    ///
    /// Returns `None` past the end of the last clip.
    pub fn resolve(&self, frame_index: u64) -> Option<FramePosition> {
        if frame_index >= self.total_frames() {
            return None;
        }
        let global_time = frame_index as f64 / self.fps as f64;

        // The last frame may sit a rounding error past the final boundary.
        let idx = self
            .segments
            .partition_point(|s| s.output_end - BOUNDARY_EPSILON_SECS <= global_time)
            .min(self.segments.len() - 1);
        let segment = &self.segments[idx];

        let latest = (segment.source_duration - END_OF_STREAM_MARGIN_SECS).max(0.0);
        let local = ((global_time - segment.output_start) * segment.speed).clamp(0.0, latest);

        Some(FramePosition {
            clip_index: idx,
            local_time_secs: local,
        })
    }
}

/// Map a global frame index to `(clip, local source time)` in one call.
///
/// Malformed input (zero fps, non-positive durations or speeds) yields `None`;
/// export jobs reject such input up front through [`FrameTimeline::new`].
pub fn frame_to_source(frame_index: u64, fps: u32, clips: &[Clip]) -> Option<FramePosition> {
    FrameTimeline::new(clips, fps).ok()?.resolve(frame_index)
}
