//! Frame compositor: letterboxes a decoded frame and applies blur effects.
//!
//! This is the single compositing path shared by every frame-based backend,
//! so animated-image and fallback-video exports produce identical rasters.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use montage_project_model::clip::EffectsDescriptor;
use montage_project_model::geometry::{Letterbox, PixelRect, ResolvedRegion};

/// Letterbox bar color. Always opaque so both encoding backends agree.
pub const LETTERBOX_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Extra margin (in sigmas) kept around a region when blurring only its
/// neighbourhood instead of the whole frame.
const BLUR_MARGIN_SIGMAS: f64 = 4.0;

/// An opaque black frame at the target size.
pub fn blank_frame(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, LETTERBOX_COLOR)
}

/// Composite one decoded frame into a `target_width x target_height` raster.
///
/// A frame with zero width or height (decoder not ready yet) produces the
/// black canvas.
pub fn composite(
    frame: &RgbaImage,
    effects: &EffectsDescriptor,
    target_width: u32,
    target_height: u32,
) -> RgbaImage {
    let mut canvas = blank_frame(target_width, target_height);
    let Some(letterbox) = Letterbox::fit(frame.width(), frame.height(), target_width, target_height)
    else {
        return canvas;
    };

    let video = letterbox.pixel_bounds();
    let scaled = if frame.dimensions() == (video.width, video.height) {
        frame.clone()
    } else {
        imageops::resize(frame, video.width, video.height, FilterType::Triangle)
    };

    // Regional blur supersedes uniform blur.
    let uniform = effects.effective_uniform_blur();
    let content = if uniform > 0.0 {
        gaussian_blur(&scaled, uniform)
    } else {
        scaled
    };
    imageops::overlay(&mut canvas, &content, video.x as i64, video.y as i64);

    for region in &effects.regional_blurs {
        let Some(resolved) = letterbox.resolve_region(region) else {
            continue;
        };
        apply_region_blur(&mut canvas, &content, video, &resolved);
    }

    canvas
}

/// Blur a copy of the drawn video around `region` and copy the pixels that
/// fall inside the region's shape onto the canvas.
fn apply_region_blur(
    canvas: &mut RgbaImage,
    content: &RgbaImage,
    video: PixelRect,
    region: &ResolvedRegion,
) {
    if !(region.intensity > 0.0) {
        return;
    }
    let sigma = clamp_sigma(region.intensity, content);

    // Region bounds in content coordinates, grown by the kernel reach.
    let extent = content.width().max(content.height()) as f64;
    let margin = ((sigma * BLUR_MARGIN_SIGMAS).ceil() + 1.0).min(extent) as u32;
    let local_x0 = (region.bounds.x - video.x).saturating_sub(margin);
    let local_y0 = (region.bounds.y - video.y).saturating_sub(margin);
    let local_x1 = (region.bounds.right() - video.x + margin).min(content.width());
    let local_y1 = (region.bounds.bottom() - video.y + margin).min(content.height());

    let patch = imageops::crop_imm(
        content,
        local_x0,
        local_y0,
        local_x1 - local_x0,
        local_y1 - local_y0,
    )
    .to_image();
    let blurred = gaussian_blur(&patch, sigma);

    for py in region.bounds.y..region.bounds.bottom() {
        for px in region.bounds.x..region.bounds.right() {
            if !region.covers(px, py) {
                continue;
            }
            let src = blurred.get_pixel(px - video.x - local_x0, py - video.y - local_y0);
            canvas.put_pixel(px, py, *src);
        }
    }
}

/// Cap `sigma` at the larger side of `image`; wider kernels look the same.
fn clamp_sigma(sigma: f64, image: &RgbaImage) -> f64 {
    sigma.min(image.width().max(image.height()).max(1) as f64)
}

/// Gaussian blur with a frame-relative sigma ceiling. The result is opaque.
fn gaussian_blur(image: &RgbaImage, sigma: f64) -> RgbaImage {
    if !(sigma > 0.0) || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let sigma = clamp_sigma(sigma, image);
    let mut blurred = imageproc::filter::gaussian_blur_f32(image, sigma as f32);
    for pixel in blurred.pixels_mut() {
        pixel.0[3] = 255;
    }
    blurred
}
