//! Multi-band image buffers.

use std::sync::{Arc, PoisonError, RwLock};

use ndarray::{Array3, ArrayView1, ArrayView2, Axis, Slice};

use crate::geometry::Rect;

/// A multi-band image covering `roi` of the source image.
///
/// Pixels are stored as `(row, column, band)` so every pixel spectrum is
/// contiguous. Values are normalized to roughly 0.0-1.0 by the loaders;
/// derived representations may leave that range.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiImage {
    pixels: Array3<f32>,
    /// Center wavelength per band in nm (empty when unknown)
    wavelengths: Vec<f32>,
    /// Region of the source image this buffer covers
    roi: Rect,
}

impl MultiImage {
    /// Create an image. `pixels` must have shape `(roi.height, roi.width, bands)`.
    pub fn new(pixels: Array3<f32>, wavelengths: Vec<f32>, roi: Rect) -> Self {
        debug_assert_eq!(pixels.dim().0, roi.height.max(0) as usize);
        debug_assert_eq!(pixels.dim().1, roi.width.max(0) as usize);
        Self {
            pixels,
            wavelengths,
            roi,
        }
    }

    /// An image with no pixels and no bands.
    pub fn empty() -> Self {
        Self {
            pixels: Array3::zeros((0, 0, 0)),
            wavelengths: Vec::new(),
            roi: Rect::default(),
        }
    }

    /// Create a full-size image from per-band planes stored row-major.
    pub fn from_bands(bands: &[Vec<f32>], width: usize, height: usize) -> Self {
        let mut pixels = Array3::zeros((height, width, bands.len()));
        for (b, band) in bands.iter().enumerate() {
            for (i, &value) in band.iter().take(width * height).enumerate() {
                pixels[[i / width, i % width, b]] = value;
            }
        }
        Self::new(
            pixels,
            Vec::new(),
            Rect::from_size(width as i32, height as i32),
        )
    }

    /// Replace band wavelengths.
    pub fn with_wavelengths(mut self, wavelengths: Vec<f32>) -> Self {
        self.wavelengths = wavelengths;
        self
    }

    /// Assign evenly spaced wavelengths if the image carries none.
    pub fn with_default_wavelengths(self, start_nm: f32, end_nm: f32) -> Self {
        if self.wavelengths.len() == self.num_bands() {
            return self;
        }
        let wavelengths = linspace(start_nm, end_nm, self.num_bands());
        self.with_wavelengths(wavelengths)
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn num_bands(&self) -> usize {
        self.pixels.dim().2
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn roi(&self) -> Rect {
        self.roi
    }

    pub fn wavelengths(&self) -> &[f32] {
        &self.wavelengths
    }

    pub fn pixels(&self) -> &Array3<f32> {
        &self.pixels
    }

    /// Spectrum at buffer-local coordinates.
    pub fn spectrum(&self, row: usize, col: usize) -> ArrayView1<'_, f32> {
        self.pixels.index_axis(Axis(0), row).index_axis_move(Axis(0), col)
    }

    /// One band plane.
    pub fn band(&self, band: usize) -> ArrayView2<'_, f32> {
        self.pixels.index_axis(Axis(2), band)
    }

    /// Copy of `region` (source image coordinates), which must lie inside this
    /// buffer's ROI.
    pub fn crop(&self, region: &Rect) -> MultiImage {
        let local = region.intersect(&self.roi).relative_to(&self.roi);
        let pixels = self
            .pixels
            .slice_axis(Axis(0), Slice::from(local.y as usize..local.bottom() as usize))
            .slice_axis_move(Axis(1), Slice::from(local.x as usize..local.right() as usize))
            .to_owned();
        MultiImage {
            pixels,
            wavelengths: self.wavelengths.clone(),
            roi: region.intersect(&self.roi),
        }
    }

    /// Minimum and maximum over all values, `(0, 0)` for an empty image.
    pub fn value_range(&self) -> (f32, f32) {
        let mut iter = self.pixels.iter().copied();
        let Some(first) = iter.next() else {
            return (0.0, 0.0);
        };
        iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)))
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f32, end: f32, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f32;
            (0..n).map(|i| start + step * i as f32).collect()
        }
    }
}

/// A replaceable image buffer shared with the worker thread.
///
/// Writers publish a whole new image; readers take a snapshot `Arc` and keep
/// reading that version even if a newer one is published meanwhile.
#[derive(Debug, Clone)]
pub struct SharedImage {
    slot: Arc<RwLock<Arc<MultiImage>>>,
}

impl SharedImage {
    pub fn new(image: MultiImage) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Arc::new(image))),
        }
    }

    /// Snapshot of the current version.
    pub fn load(&self) -> Arc<MultiImage> {
        let guard = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Publish a new version.
    pub fn replace(&self, image: Arc<MultiImage>) {
        let mut guard = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = image;
    }

    /// Whether both handles refer to the same slot.
    pub fn same_slot(&self, other: &SharedImage) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Default for SharedImage {
    fn default() -> Self {
        Self::new(MultiImage::empty())
    }
}
