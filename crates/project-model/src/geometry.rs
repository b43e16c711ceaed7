//! Letterbox fitting and blur-region resolution.
//!
//! Source frames are scaled to fit inside the output canvas with their
//! aspect ratio preserved and centered; the remaining bars are black. Blur
//! regions are resolved against the drawn video rectangle.

use serde::{Deserialize, Serialize};

use crate::clip::{BlurRegion, BlurShape};

/// Integer pixel rectangle on the output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Scale-to-fit placement of a source frame on the output canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Uniform scale applied to the source.
    pub scale: f64,
    /// Left edge of the drawn video (fractional pixels).
    pub offset_x: f64,
    /// Top edge of the drawn video (fractional pixels).
    pub offset_y: f64,
    pub draw_width: f64,
    pub draw_height: f64,
    canvas_width: u32,
    canvas_height: u32,
}

impl Letterbox {
    /// Fit a `src_w x src_h` frame into a `target_w x target_h` canvas.
    ///
    /// Returns `None` if any dimension is zero.
    pub fn fit(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> Option<Self> {
        if src_w == 0 || src_h == 0 || target_w == 0 || target_h == 0 {
            return None;
        }

        let scale = (target_w as f64 / src_w as f64).min(target_h as f64 / src_h as f64);
        let draw_width = src_w as f64 * scale;
        let draw_height = src_h as f64 * scale;

        Some(Self {
            scale,
            offset_x: (target_w as f64 - draw_width) / 2.0,
            offset_y: (target_h as f64 - draw_height) / 2.0,
            draw_width,
            draw_height,
            canvas_width: target_w,
            canvas_height: target_h,
        })
    }

    /// The drawn video rectangle snapped to whole pixels, centered so the
    /// left/right (top/bottom) bars differ by at most one pixel.
    pub fn pixel_bounds(&self) -> PixelRect {
        let width = (self.draw_width.round() as u32).clamp(1, self.canvas_width);
        let height = (self.draw_height.round() as u32).clamp(1, self.canvas_height);
        PixelRect {
            x: (self.canvas_width - width) / 2,
            y: (self.canvas_height - height) / 2,
            width,
            height,
        }
    }

    /// Resolve a percentage-based blur region to canvas pixels.
    ///
    /// The result is clipped to the drawn video; `None` when nothing of the
    /// region remains visible.
    pub fn resolve_region(&self, region: &BlurRegion) -> Option<ResolvedRegion> {
        if !(region.width > 0.0 && region.height > 0.0) {
            return None;
        }

        let video = self.pixel_bounds();
        let vw = video.width as f64;
        let vh = video.height as f64;

        let left = video.x as f64 + region.x / 100.0 * vw;
        let top = video.y as f64 + region.y / 100.0 * vh;
        let right = left + region.width / 100.0 * vw;
        let bottom = top + region.height / 100.0 * vh;

        let x0 = left.round().max(video.x as f64);
        let y0 = top.round().max(video.y as f64);
        let x1 = right.round().min(video.right() as f64);
        let y1 = bottom.round().min(video.bottom() as f64);
        if !(x1 > x0 && y1 > y0) {
            return None;
        }

        Some(ResolvedRegion {
            shape: region.shape,
            intensity: region.intensity,
            bounds: PixelRect::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32),
            center: ((left + right) / 2.0, (top + bottom) / 2.0),
            radii: ((right - left) / 2.0, (bottom - top) / 2.0),
        })
    }
}

/// A blur region mapped onto canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRegion {
    pub shape: BlurShape,
    pub intensity: f64,
    /// Visible bounding box, clipped to the drawn video.
    pub bounds: PixelRect,
    /// Center of the unclipped region.
    pub center: (f64, f64),
    /// Half extents of the unclipped region.
    pub radii: (f64, f64),
}

impl ResolvedRegion {
    /// Whether the canvas pixel `(px, py)` lies inside the region's shape.
    pub fn covers(&self, px: u32, py: u32) -> bool {
        if !self.bounds.contains(px, py) {
            return false;
        }
        match self.shape {
            BlurShape::Rectangle => true,
            BlurShape::Circle => {
                let dx = (px as f64 + 0.5 - self.center.0) / self.radii.0;
                let dy = (py as f64 + 0.5 - self.center.1) / self.radii.1;
                dx * dx + dy * dy <= 1.0
            }
        }
    }
}
