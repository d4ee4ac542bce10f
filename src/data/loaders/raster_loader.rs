//! Loader for standard image formats (PNG, JPEG, BMP, TIFF, WebP).
//!
//! Converts RGB images to 3-band data.

use ndarray::Array3;

use crate::data::MultiImage;
use crate::data::loader::{LoadError, SpectralLoader};
use crate::geometry::Rect;

/// Nominal center wavelengths of the R, G and B channels (nm).
const RGB_WAVELENGTHS: [f32; 3] = [630.0, 532.0, 465.0];

/// Loader for standard image formats.
///
/// Extracts RGB channels as 3 separate bands normalized to 0.0-1.0.
pub struct RasterLoader;

impl SpectralLoader for RasterLoader {
    fn id(&self) -> &'static str {
        "image"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["png", "jpg", "jpeg", "bmp", "tiff", "tif", "webp"]
    }

    fn can_load(&self, data: &[u8]) -> bool {
        if data.len() < 8 {
            return false;
        }

        // PNG
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return true;
        }

        // JPEG
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return true;
        }

        // BMP
        if data.starts_with(b"BM") {
            return true;
        }

        // TIFF, little and big endian
        if data.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || data.starts_with(&[0x4D, 0x4D, 0x00, 0x2A])
        {
            return true;
        }

        // WebP: RIFF....WEBP
        data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP"
    }

    fn load(&self, data: &[u8]) -> Result<MultiImage, LoadError> {
        let img = image::load_from_memory(data)
            .map_err(|e| LoadError::decode(self.id(), format!("Failed to decode image: {}", e)))?
            .to_rgb8();

        let width = img.width() as usize;
        let height = img.height() as usize;
        let pixels = Array3::from_shape_fn((height, width, 3), |(row, col, band)| {
            f32::from(img.get_pixel(col as u32, row as u32)[band]) / 255.0
        });

        log::trace!("RasterLoader: loaded {}x{} image as 3 bands (RGB)", width, height);

        Ok(MultiImage::new(
            pixels,
            RGB_WAVELENGTHS.to_vec(),
            Rect::from_size(width as i32, height as i32),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_magic_detection() {
        let loader = RasterLoader;
        assert!(loader.can_load(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]));
        assert!(loader.can_load(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46]));
        assert!(!loader.can_load(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]));
    }

    #[test]
    fn test_load_png_roundtrip() {
        let mut rgb = image::RgbImage::new(4, 2);
        rgb.put_pixel(3, 1, image::Rgb([255, 0, 51]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(rgb)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let img = RasterLoader.load(&bytes).unwrap();
        assert_eq!((img.width(), img.height(), img.num_bands()), (4, 2, 3));
        let spectrum = img.spectrum(1, 3);
        assert!((spectrum[0] - 1.0).abs() < f32::EPSILON);
        assert!((spectrum[2] - 0.2).abs() < 1e-6);
        assert_eq!(img.wavelengths().len(), 3);
    }
}
