//! Crop-to-fill compositing of a photo under a frame overlay.

use super::{ComposeError, Frame, FrameLibrary};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbImage, RgbaImage};

/// Background shown wherever neither the photo nor the overlay is opaque.
const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Composites `frame` over `image`.
///
/// The image is scaled to cover the frame's transparent window while
/// keeping its aspect ratio, center-cropped to the window and then blended
/// under the overlay. The output has the overlay's dimensions and is a pure
/// function of the inputs.
pub fn compose(image: &RgbImage, frame: &Frame) -> Result<RgbImage, ComposeError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ComposeError::EmptyImage);
    }

    let (frame_width, frame_height) = frame.overlay().dimensions();
    let window = frame.window();
    let fitted = crop_to_fill(image, window.width, window.height);

    let mut canvas = RgbaImage::from_pixel(frame_width, frame_height, BACKGROUND);
    let fitted = DynamicImage::ImageRgb8(fitted).to_rgba8();
    imageops::replace(&mut canvas, &fitted, i64::from(window.x), i64::from(window.y));
    imageops::overlay(&mut canvas, frame.overlay(), 0, 0);

    Ok(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

/// Scales `image` to cover `width` x `height` and crops the center.
fn crop_to_fill(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = image.dimensions();
    let scale = f64::max(
        f64::from(width) / f64::from(src_w),
        f64::from(height) / f64::from(src_h),
    );
    let scaled_w = ((f64::from(src_w) * scale).round() as u32).max(width);
    let scaled_h = ((f64::from(src_h) * scale).round() as u32).max(height);

    let scaled = imageops::resize(image, scaled_w, scaled_h, FilterType::Lanczos3);
    let x = (scaled_w - width) / 2;
    let y = (scaled_h - height) / 2;
    imageops::crop_imm(&scaled, x, y, width, height).to_image()
}

/// Composites captured photos with frames from a [`FrameLibrary`].
pub struct FrameCompositor {
    library: FrameLibrary,
}

impl FrameCompositor {
    pub fn new(library: FrameLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &FrameLibrary {
        &self.library
    }

    /// Composites `image` with the frame named `frame_name`.
    pub fn compose(&self, image: &RgbImage, frame_name: &str) -> Result<RgbImage, ComposeError> {
        let frame = self.library.get(frame_name)?;
        let composed = compose(image, &frame)?;
        tracing::debug!(
            frame = frame_name,
            width = composed.width(),
            height = composed.height(),
            "Photo composited"
        );
        Ok(composed)
    }
}
