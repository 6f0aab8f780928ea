//! Captured image type with capture metadata.

use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::time::Instant;

/// A single image delivered by the camera, either a preview frame or a still.
///
/// The pixel buffer is owned; the session hands it to the compositor and
/// the storage layer by reference or by moving it.
#[derive(Clone)]
pub struct CapturedImage {
    /// RGB pixel data.
    image: RgbImage,
    /// Capture timestamp.
    timestamp: Instant,
    /// Monotonic sequence number assigned by the camera.
    sequence: u64,
}

impl CapturedImage {
    /// Wraps an RGB image.
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Builds an image from a raw interleaved RGB buffer.
    ///
    /// Returns `None` if the buffer size does not match the dimensions.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(|image| Self::new(image, sequence))
    }

    #[inline]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the horizontally mirrored image (selfie view).
    pub fn mirrored(self) -> Self {
        Self {
            image: image::imageops::flip_horizontal(&self.image),
            ..self
        }
    }

    /// Encodes the image as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        encode_png(&self.image)
    }
}

/// Encodes an RGB image as PNG bytes.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}

impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_creation() {
        let image = CapturedImage::from_rgb(vec![0u8; 64 * 48 * 3], 64, 48, 1).unwrap();

        assert_eq!(image.width(), 64);
        assert_eq!(image.height(), 48);
        assert_eq!(image.sequence(), 1);
    }

    #[test]
    fn test_image_invalid_size() {
        assert!(CapturedImage::from_rgb(vec![0u8; 100], 64, 48, 1).is_none());
    }

    #[test]
    fn test_mirror_flips_columns() {
        let mut raw = RgbImage::new(2, 1);
        raw.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        raw.put_pixel(1, 0, image::Rgb([0, 0, 255]));

        let mirrored = CapturedImage::new(raw, 1).mirrored();
        assert_eq!(mirrored.image().get_pixel(0, 0).0, [0, 0, 255]);
        assert_eq!(mirrored.image().get_pixel(1, 0).0, [255, 0, 0]);
    }

    #[test]
    fn test_png_encoding_decodes_back() {
        let image = CapturedImage::new(RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30])), 1);
        let png = image.to_png().unwrap();

        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(2, 1).0, [10, 20, 30]);
    }
}
