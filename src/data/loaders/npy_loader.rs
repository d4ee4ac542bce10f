//! Loader for NumPy `.npy` files.
//!
//! Supports multi-band data stored as NumPy arrays in several layouts and
//! data types.

use std::io::Cursor;

use ndarray::{Array3, ArrayD, Ix2, Ix3};
use ndarray_npy::ReadNpyExt;

use crate::data::MultiImage;
use crate::data::loader::{LoadError, SpectralLoader};
use crate::geometry::Rect;

/// Largest leading/trailing dimension still treated as a band axis.
const MAX_BAND_AXIS: usize = 512;

/// Loader for NumPy `.npy` files.
///
/// **Expected array shapes** (row-major, numpy convention):
/// - 2D `(H, W)`: single band
/// - 3D `(B, H, W)`: bands first (common for hyperspectral cubes)
/// - 3D `(H, W, B)`: channels last (common in image processing)
///
/// Supported data types: `f32`, `f64`, `u8`, `u16`, `i16`, `i32`.
/// Integer values are normalized to 0.0-1.0 based on data type.
pub struct NpyLoader;

/// Band axis position of a 3D array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    BandsFirst,
    BandsLast,
}

impl NpyLoader {
    /// NumPy magic bytes: \x93NUMPY
    const MAGIC: &'static [u8] = &[0x93, b'N', b'U', b'M', b'P', b'Y'];

    /// Guess where the band axis is.
    ///
    /// The band axis is the smaller of the two outer axes. Ties and oversized
    /// candidates fall back to bands first.
    fn guess_layout(shape: &[usize]) -> Layout {
        let (first, last) = (shape[0], shape[2]);
        if last < first && last <= MAX_BAND_AXIS {
            Layout::BandsLast
        } else {
            if first > MAX_BAND_AXIS {
                log::warn!(
                    "NpyLoader: ambiguous 3D shape {:?}, assuming (bands, height, width)",
                    shape
                );
            }
            Layout::BandsFirst
        }
    }

    /// Convert a decoded array into a `(height, width, bands)` image.
    fn array_to_image<T>(array: ArrayD<T>) -> Result<MultiImage, LoadError>
    where
        T: NumericConvert + Copy,
    {
        let shape = array.shape().to_vec();
        log::debug!("NpyLoader: array shape = {:?}", shape);

        let pixels: Array3<f32> = match shape.len() {
            2 => {
                let plane = array
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| LoadError::decode("npy", e.to_string()))?;
                plane.map(|v| v.to_normalized_f32()).insert_axis(ndarray::Axis(2))
            }
            3 => {
                let cube = array
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| LoadError::decode("npy", e.to_string()))?;
                let cube = match Self::guess_layout(&shape) {
                    Layout::BandsFirst => cube.permuted_axes([1, 2, 0]),
                    Layout::BandsLast => cube,
                };
                cube.map(|v| v.to_normalized_f32())
            }
            n => {
                return Err(LoadError::decode(
                    "npy",
                    format!("Unsupported array dimensions: {} (expected 2 or 3)", n),
                ));
            }
        };

        let (height, width, bands) = pixels.dim();
        log::info!(
            "NpyLoader: loaded {}x{} with {} bands",
            width,
            height,
            bands
        );

        Ok(MultiImage::new(
            pixels.as_standard_layout().into_owned(),
            Vec::new(),
            Rect::from_size(width as i32, height as i32),
        ))
    }
}

impl SpectralLoader for NpyLoader {
    fn id(&self) -> &'static str {
        "npy"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["npy"]
    }

    fn can_load(&self, data: &[u8]) -> bool {
        data.len() >= Self::MAGIC.len() && data.starts_with(Self::MAGIC)
    }

    fn load(&self, data: &[u8]) -> Result<MultiImage, LoadError> {
        let mut cursor = Cursor::new(data);

        // Try different numeric types in order of likelihood
        if let Ok(array) = ArrayD::<f32>::read_npy(&mut cursor) {
            return Self::array_to_image(array);
        }

        cursor.set_position(0);
        if let Ok(array) = ArrayD::<f64>::read_npy(&mut cursor) {
            return Self::array_to_image(array);
        }

        cursor.set_position(0);
        if let Ok(array) = ArrayD::<u8>::read_npy(&mut cursor) {
            return Self::array_to_image(array);
        }

        cursor.set_position(0);
        if let Ok(array) = ArrayD::<u16>::read_npy(&mut cursor) {
            return Self::array_to_image(array);
        }

        cursor.set_position(0);
        if let Ok(array) = ArrayD::<i16>::read_npy(&mut cursor) {
            return Self::array_to_image(array);
        }

        cursor.set_position(0);
        if let Ok(array) = ArrayD::<i32>::read_npy(&mut cursor) {
            return Self::array_to_image(array);
        }

        Err(LoadError::decode(
            self.id(),
            "Failed to read NumPy array: unsupported dtype or invalid format",
        ))
    }

    fn priority(&self) -> i32 {
        // Checked before generic images
        10
    }
}

/// Conversion of numeric sample types to normalized f32.
trait NumericConvert {
    fn to_normalized_f32(self) -> f32;
}

impl NumericConvert for f32 {
    fn to_normalized_f32(self) -> f32 {
        self
    }
}

impl NumericConvert for f64 {
    fn to_normalized_f32(self) -> f32 {
        self as f32
    }
}

impl NumericConvert for u8 {
    fn to_normalized_f32(self) -> f32 {
        f32::from(self) / 255.0
    }
}

impl NumericConvert for u16 {
    fn to_normalized_f32(self) -> f32 {
        f32::from(self) / 65535.0
    }
}

impl NumericConvert for i16 {
    fn to_normalized_f32(self) -> f32 {
        // Map -32768..32767 to 0..1
        (f32::from(self) + 32768.0) / 65535.0
    }
}

impl NumericConvert for i32 {
    fn to_normalized_f32(self) -> f32 {
        ((self as f64 + 2_147_483_648.0) / 4_294_967_295.0) as f32
    }
}
