//! Animated GIF assembly.
//!
//! Frames are buffered as composited RGBA rasters. On finish every frame is
//! palette-quantized on the rayon pool, then the stream is written in frame
//! order with an infinite loop count.

use std::sync::atomic::{AtomicUsize, Ordering};

use gif::{Encoder, Frame, Repeat};
use image::RgbaImage;
use montage_common::error::{MontageError, MontageResult};
use rayon::prelude::*;

use crate::frames::FrameSink;

/// Share of finishing progress spent on quantization; the rest is writing.
const QUANTIZE_SHARE: f64 = 0.9;

pub struct GifEncoder {
    width: u16,
    height: u16,
    delay_cs: u16,
    speed: i32,
    frames: Vec<RgbaImage>,
}

impl GifEncoder {
    /// Prepare an encoder for `width x height` frames shown `1/fps` seconds
    /// each. `quality` in `[0, 100]` trades quantizer speed for palette
    /// accuracy.
    pub fn new(width: u32, height: u32, fps: u32, quality: u8) -> MontageResult<Self> {
        let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(MontageError::precondition(format!(
                "gif dimensions {width}x{height} exceed 65535"
            )));
        };
        if w == 0 || h == 0 || fps == 0 {
            return Err(MontageError::precondition(
                "gif needs non-zero dimensions and fps",
            ));
        }

        Ok(Self {
            width: w,
            height: h,
            delay_cs: frame_delay_cs(fps),
            speed: quantizer_speed(quality),
            frames: Vec::new(),
        })
    }

    pub fn push_frame(&mut self, frame: RgbaImage) -> MontageResult<()> {
        if frame.dimensions() != (self.width as u32, self.height as u32) {
            return Err(MontageError::encode(format!(
                "frame is {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Quantize and write all buffered frames.
    ///
    /// `on_progress` receives a fraction in `[0, 1]` and may be called from
    /// pool threads.
    pub fn finish(self, on_progress: impl Fn(f64) + Sync) -> MontageResult<Vec<u8>> {
        let total = self.frames.len();
        if total == 0 {
            return Err(MontageError::encode("no frames to encode"));
        }

        let started = std::time::Instant::now();
        let (width, height, speed, delay_cs) = (self.width, self.height, self.speed, self.delay_cs);
        let quantized = AtomicUsize::new(0);
        let frames: Vec<Frame<'static>> = self
            .frames
            .into_par_iter()
            .map(|image| {
                let mut pixels = image.into_raw();
                let mut frame = Frame::from_rgba_speed(width, height, &mut pixels, speed);
                frame.delay = delay_cs;
                let done = quantized.fetch_add(1, Ordering::Relaxed) + 1;
                on_progress(QUANTIZE_SHARE * done as f64 / total as f64);
                frame
            })
            .collect();

        tracing::debug!(
            frames = total,
            speed,
            elapsed_ms = started.elapsed().as_millis(),
            "Quantized gif frames"
        );

        let mut bytes = Vec::new();
        {
            let mut encoder = Encoder::new(&mut bytes, width, height, &[])
                .map_err(|e| MontageError::encode(format!("gif header: {e}")))?;
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(|e| MontageError::encode(format!("gif loop extension: {e}")))?;
            for (index, frame) in frames.iter().enumerate() {
                encoder
                    .write_frame(frame)
                    .map_err(|e| MontageError::encode(format!("gif frame {index}: {e}")))?;
                let written = (index + 1) as f64 / total as f64;
                on_progress(QUANTIZE_SHARE + (1.0 - QUANTIZE_SHARE) * written);
            }
            encoder.into_inner()?;
        }

        tracing::info!(
            frames = total,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Encoded gif"
        );
        Ok(bytes)
    }
}

impl FrameSink for GifEncoder {
    fn accept(&mut self, _index: u64, frame: RgbaImage) -> MontageResult<()> {
        self.push_frame(frame)
    }
}

impl std::fmt::Debug for GifEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GifEncoder")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("delay_cs", &self.delay_cs)
            .field("frames", &self.frames.len())
            .finish()
    }
}

/// GIF frame delay for `fps`, in hundredths of a second (at least 1).
fn frame_delay_cs(fps: u32) -> u16 {
    (100.0 / fps as f64).round().clamp(1.0, u16::MAX as f64) as u16
}

/// NeuQuant sampling speed: 1 is slowest and best, 30 fastest.
fn quantizer_speed(quality: u8) -> i32 {
    30 - (quality.min(100) as i32 * 29) / 100
}
