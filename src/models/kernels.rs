//! Pixel kernels behind the reference models.
//!
//! Every function here is pure: it takes image buffers and returns new ones.
//! Per-pixel kernels ([`normalize`], [`gradient`], [`resample_spectrum`])
//! can be evaluated on any sub-region independently, which is what makes
//! incremental ROI updates possible. [`pca`] depends on the whole region.

use std::f32::consts::FRAC_PI_2;

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};

use crate::data::{MultiImage, linspace};

const EPSILON: f32 = 1e-6;
const POWER_ITERATIONS: usize = 100;

/// Per-pixel L2-normalized spectra.
pub fn normalize(img: &MultiImage) -> MultiImage {
    let mut pixels = img.pixels().clone();
    for mut spectrum in pixels.lanes_mut(Axis(2)) {
        let norm = spectrum.dot(&spectrum).sqrt();
        if norm > EPSILON {
            spectrum.mapv_inplace(|v| v / norm);
        }
    }
    MultiImage::new(pixels, img.wavelengths().to_vec(), img.roi())
}

/// Spectral gradient: log-ratio of adjacent bands.
///
/// Produces `bands - 1` bands placed at the midpoints of adjacent band
/// wavelengths. A single-band image yields one zero band.
pub fn gradient(img: &MultiImage) -> MultiImage {
    let (height, width, bands) = img.pixels().dim();
    if bands < 2 {
        return MultiImage::new(
            Array3::zeros((height, width, 1)),
            img.wavelengths().to_vec(),
            img.roi(),
        );
    }

    let src = img.pixels();
    let pixels = Array3::from_shape_fn((height, width, bands - 1), |(r, c, b)| {
        (src[[r, c, b + 1]].max(0.0) + EPSILON).ln() - (src[[r, c, b]].max(0.0) + EPSILON).ln()
    });
    let wavelengths = img
        .wavelengths()
        .windows(2)
        .map(|w| (w[0] + w[1]) / 2.0)
        .collect();
    MultiImage::new(pixels, wavelengths, img.roi())
}

/// Resample every spectrum to `bands` bands by linear interpolation over the
/// band index.
pub fn resample_spectrum(img: &MultiImage, bands: usize) -> MultiImage {
    let (height, width, source_bands) = img.pixels().dim();
    if bands == source_bands || source_bands == 0 || bands == 0 {
        return img.clone();
    }

    let positions = linspace(0.0, (source_bands - 1) as f32, bands);
    let src = img.pixels();
    let pixels = Array3::from_shape_fn((height, width, bands), |(r, c, b)| {
        let pos = positions[b];
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(source_bands - 1);
        let t = pos - lo as f32;
        src[[r, c, lo]] * (1.0 - t) + src[[r, c, hi]] * t
    });

    let wavelengths = match (img.wavelengths().first(), img.wavelengths().last()) {
        (Some(&start), Some(&end)) => linspace(start, end, bands),
        _ => Vec::new(),
    };
    MultiImage::new(pixels, wavelengths, img.roi())
}

/// Spectra of an image as an `(pixels, bands)` matrix.
fn spectra_matrix(img: &MultiImage) -> Array2<f32> {
    let (height, width, bands) = img.pixels().dim();
    img.pixels()
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((height * width, bands))
        .unwrap_or_else(|_| Array2::zeros((height * width, bands)))
}

/// Dominant eigenvector of a symmetric matrix.
fn power_iteration(matrix: &Array2<f32>) -> (f32, Array1<f32>) {
    let n = matrix.nrows();
    // Alternating signs converge better than a constant start vector
    let mut v = Array1::from_shape_fn(n, |i| if i % 2 == 0 { 1.0 } else { -1.0 });
    v /= (n as f32).sqrt();

    let mut eigenvalue = 0.0;
    for _ in 0..POWER_ITERATIONS {
        let mv = matrix.dot(&v);
        eigenvalue = v.dot(&mv);
        let norm = mv.dot(&mv).sqrt();
        if norm < EPSILON {
            break;
        }
        v = mv / norm;
    }
    (eigenvalue, v)
}

/// Principal axes of the rows of `data`: the mean and up to `components`
/// unit eigenvectors of the covariance, strongest first.
pub fn principal_axes(data: &Array2<f32>, components: usize) -> (Array1<f32>, Vec<Array1<f32>>) {
    let dim = data.ncols();
    let Some(mean) = data.mean_axis(Axis(0)) else {
        return (Array1::zeros(dim), Vec::new());
    };
    let centered = data - &mean;
    let mut cov = centered.t().dot(&centered) / data.nrows().max(1) as f32;

    let mut axes = Vec::with_capacity(components.min(dim));
    for _ in 0..components.min(dim) {
        let (eigenvalue, eigenvector) = power_iteration(&cov);
        let outer = eigenvector
            .view()
            .insert_axis(Axis(1))
            .dot(&eigenvector.view().insert_axis(Axis(0)));
        cov = cov - outer * eigenvalue;
        axes.push(eigenvector);
    }
    (mean, axes)
}

/// Projection of every spectrum onto the first `components` principal axes
/// of the image.
pub fn pca(img: &MultiImage, components: usize) -> MultiImage {
    let (height, width, _) = img.pixels().dim();
    let data = spectra_matrix(img);
    let (mean, axes) = principal_axes(&data, components);

    let centered = &data - &mean;
    let mut projected = Array2::zeros((data.nrows(), axes.len()));
    for (k, axis) in axes.iter().enumerate() {
        projected.column_mut(k).assign(&centered.dot(axis));
    }

    let bands = axes.len();
    let pixels = projected
        .into_shape_with_order((height, width, bands))
        .unwrap_or_else(|_| Array3::zeros((height, width, bands)));
    MultiImage::new(pixels, Vec::new(), img.roi())
}

/// Spectral angle between two spectra in radians, `π/2` when either is zero.
pub fn spectral_angle(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    let na = a.dot(&a).sqrt();
    let nb = b.dot(&b).sqrt();
    if na < EPSILON || nb < EPSILON {
        return FRAC_PI_2;
    }
    (a.dot(&b) / (na * nb)).clamp(-1.0, 1.0).acos()
}

/// Euclidean distance between two spectra.
pub fn spectral_distance(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    Zip::from(a)
        .and(b)
        .fold(0.0, |acc, &x, &y| acc + (x - y) * (x - y))
        .sqrt()
}

/// Linear min-max stretch of one band plane to 8 bit.
pub fn band_to_gray(band: ArrayView2<'_, f32>) -> GrayImage {
    let (height, width) = band.dim();
    let (lo, hi) = min_max(band.iter().copied());
    let scale = if hi - lo > EPSILON { 255.0 / (hi - lo) } else { 0.0 };
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([((band[[y as usize, x as usize]] - lo) * scale).round() as u8])
    })
}

/// Stretch three planes of `(height, width, 3)` data to RGB, each channel
/// independently.
fn stretch_rgb(channels: &Array3<f32>) -> RgbImage {
    let (height, width, _) = channels.dim();
    let ranges: Vec<(f32, f32)> = (0..3)
        .map(|c| min_max(channels.index_axis(Axis(2), c).iter().copied()))
        .collect();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let mut rgb = [0u8; 3];
        for (c, value) in rgb.iter_mut().enumerate() {
            let (lo, hi) = ranges[c];
            let v = channels[[y as usize, x as usize, c]];
            *value = if hi - lo > EPSILON {
                ((v - lo) / (hi - lo) * 255.0).round() as u8
            } else {
                0
            };
        }
        Rgb(rgb)
    })
}

fn min_max(values: impl Iterator<Item = f32>) -> (f32, f32) {
    values.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Piecewise Gaussian fit of the CIE 1931 color matching functions.
fn cie_xyz(nm: f32) -> [f32; 3] {
    let g = |x: f32, mu: f32, s1: f32, s2: f32| {
        let t = (x - mu) / if x < mu { s1 } else { s2 };
        (-0.5 * t * t).exp()
    };
    let x = 1.056 * g(nm, 599.8, 37.9, 31.0) + 0.362 * g(nm, 442.0, 16.0, 26.7)
        - 0.065 * g(nm, 501.1, 20.4, 26.2);
    let y = 0.821 * g(nm, 568.8, 46.9, 40.5) + 0.286 * g(nm, 530.9, 16.3, 31.1);
    let z = 1.217 * g(nm, 437.0, 11.8, 36.0) + 0.681 * g(nm, 459.0, 26.0, 13.8);
    [x, y, z]
}

fn srgb_gamma(linear: f32) -> f32 {
    let v = linear.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// True-color rendering: integrate spectra against the CIE observer and map
/// XYZ to sRGB. Bands without wavelengths are spread over the visible range.
pub fn true_color(img: &MultiImage) -> RgbImage {
    let (height, width, bands) = img.pixels().dim();
    let wavelengths = if img.wavelengths().len() == bands {
        img.wavelengths().to_vec()
    } else {
        linspace(400.0, 700.0, bands)
    };
    let weights: Vec<[f32; 3]> = wavelengths.iter().map(|&nm| cie_xyz(nm)).collect();
    // White point: a flat unit spectrum maps to Y = 1
    let y_white: f32 = weights.iter().map(|w| w[1]).sum::<f32>().max(EPSILON);

    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let spectrum = img.spectrum(y as usize, x as usize);
        let mut xyz = [0.0f32; 3];
        for (value, w) in spectrum.iter().zip(&weights) {
            for k in 0..3 {
                xyz[k] += value * w[k];
            }
        }
        let [cx, cy, cz] = xyz.map(|v| v / y_white);
        let r = 3.2406 * cx - 1.5372 * cy - 0.4986 * cz;
        let g = -0.9689 * cx + 1.8758 * cy + 0.0415 * cz;
        let b = 0.0557 * cx - 0.2040 * cy + 1.0570 * cz;
        Rgb([r, g, b].map(|c| (srgb_gamma(c) * 255.0).round() as u8))
    })
}

/// First three principal components as RGB.
pub fn pca_color(img: &MultiImage) -> RgbImage {
    let projected = pca(img, 3);
    let (height, width, bands) = projected.pixels().dim();
    let mut channels = Array3::zeros((height, width, 3));
    for c in 0..bands.min(3) {
        channels
            .index_axis_mut(Axis(2), c)
            .assign(&projected.band(c));
    }
    stretch_rgb(&channels)
}

/// Similarity to three reference spectra (brightest pixel, darkest pixel,
/// mean spectrum), as RGB.
pub fn angle_color(img: &MultiImage) -> RgbImage {
    let (height, width, bands) = img.pixels().dim();
    let data = spectra_matrix(img);
    if data.nrows() == 0 {
        return RgbImage::new(width as u32, height as u32);
    }

    let energy: Vec<f32> = data.rows().into_iter().map(|s| s.dot(&s)).collect();
    let brightest = argmax(&energy, |a, b| a > b);
    let darkest = argmax(&energy, |a, b| a < b);
    let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(bands));
    let references = [
        data.row(brightest).to_owned(),
        data.row(darkest).to_owned(),
        mean,
    ];

    let channels = Array3::from_shape_fn((height, width, 3), |(r, c, k)| {
        1.0 - spectral_angle(img.spectrum(r, c), references[k].view()) / FRAC_PI_2
    });
    stretch_rgb(&channels)
}

fn argmax(values: &[f32], better: impl Fn(f32, f32) -> bool) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if better(v, values[best]) {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn image(pixels: Array3<f32>) -> MultiImage {
        let (h, w, _) = pixels.dim();
        MultiImage::new(pixels, Vec::new(), Rect::from_size(w as i32, h as i32))
    }

    #[test]
    fn test_normalize_unit_length() {
        let img = image(Array3::from_shape_fn((2, 2, 3), |(r, c, b)| (r + c + b + 1) as f32));
        let nrm = normalize(&img);
        let s = nrm.spectrum(1, 1);
        assert!((s.dot(&s) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_gradient_band_count() {
        let img = image(Array3::from_elem((2, 3, 5), 0.5)).with_wavelengths(vec![
            400.0, 450.0, 500.0, 550.0, 600.0,
        ]);
        let grad = gradient(&img);
        assert_eq!(grad.num_bands(), 4);
        assert_eq!(grad.wavelengths()[0], 425.0);
        // constant spectrum has zero gradient
        assert!(grad.pixels().iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_resample_linear() {
        let img = image(Array3::from_shape_fn((1, 1, 3), |(_, _, b)| b as f32 * 2.0));
        let resampled = resample_spectrum(&img, 5);
        assert_eq!(
            resampled.spectrum(0, 0).to_vec(),
            vec![0.0, 1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_principal_axis_follows_variance() {
        // points spread along (1, 1, 0)
        let data = Array2::from_shape_fn((20, 3), |(i, b)| match b {
            0 | 1 => i as f32,
            _ => 0.0,
        });
        let (_, axes) = principal_axes(&data, 1);
        let axis = &axes[0];
        assert!((axis[0].abs() - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
        assert!(axis[2].abs() < 1e-3);
    }

    #[test]
    fn test_spectral_angle() {
        let a = Array1::from(vec![1.0, 0.0]);
        let b = Array1::from(vec![0.0, 2.0]);
        assert!((spectral_angle(a.view(), b.view()) - FRAC_PI_2).abs() < 1e-6);
        assert!(spectral_angle(a.view(), a.view()).abs() < 1e-3);
        assert!((spectral_distance(a.view(), b.view()) - 5.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_band_to_gray_stretches() {
        let band = Array2::from_shape_fn((1, 3), |(_, c)| c as f32);
        let gray = band_to_gray(band.view());
        assert_eq!(gray.get_pixel(0, 0)[0], 0);
        assert_eq!(gray.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn test_true_color_flat_spectrum_is_neutral() {
        let img = image(Array3::from_elem((1, 1, 31), 0.5))
            .with_default_wavelengths(400.0, 700.0);
        let rgb = true_color(&img);
        let px = rgb.get_pixel(0, 0);
        let spread = px.0.iter().max().unwrap() - px.0.iter().min().unwrap();
        assert!(spread < 60, "{:?}", px);
    }
}
