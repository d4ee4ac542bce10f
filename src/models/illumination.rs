//! Reference illumination model: black-body illuminants and their
//! application to the source image.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use specula_tasks::{QueueHandle, TaskOutcome};

use super::IlluminationModel;
use crate::data::{MultiImage, SharedImage};
use crate::geometry::Rect;
use crate::notify::{Mailbox, Notification, RequestSink};

const PLANCK: f64 = 6.626_070_15e-34;
const LIGHT_SPEED: f64 = 2.997_924_58e8;
const BOLTZMANN: f64 = 1.380_649e-23;

/// Relative spectral power of a black body at `temperature` Kelvin, sampled
/// at `wavelengths` (nm) and scaled to a maximum of 1.
pub fn planck_illuminant(temperature: u32, wavelengths: &[f32]) -> Vec<f32> {
    let t = f64::from(temperature.max(1));
    let radiance: Vec<f64> = wavelengths
        .iter()
        .map(|&nm| {
            let lambda = f64::from(nm) * 1e-9;
            let c1 = 2.0 * PLANCK * LIGHT_SPEED * LIGHT_SPEED / lambda.powi(5);
            c1 / ((PLANCK * LIGHT_SPEED / (lambda * BOLTZMANN * t)).exp() - 1.0)
        })
        .collect();
    let peak = radiance.iter().copied().fold(0.0, f64::max);
    if peak <= 0.0 || !peak.is_finite() {
        return vec![1.0; wavelengths.len()];
    }
    radiance.iter().map(|&r| (r / peak) as f32).collect()
}

/// Scale every band by `to[b] / from[b]`.
fn reilluminate(image: &MultiImage, from: Option<&[f32]>, to: Option<&[f32]>) -> MultiImage {
    let bands = image.num_bands();
    let factors: Vec<f32> = (0..bands)
        .map(|b| {
            let divisor = from.and_then(|c| c.get(b)).copied().unwrap_or(1.0);
            let factor = to.and_then(|c| c.get(b)).copied().unwrap_or(1.0);
            if divisor > f32::EPSILON {
                factor / divisor
            } else {
                factor
            }
        })
        .collect();

    let mut pixels = image.pixels().clone();
    for mut spectrum in pixels.lanes_mut(ndarray::Axis(2)) {
        for (value, factor) in spectrum.iter_mut().zip(&factors) {
            *value *= factor;
        }
    }
    MultiImage::new(pixels, image.wavelengths().to_vec(), image.roi())
}

#[derive(Default)]
struct IlluminationState {
    roi: Rect,
    /// Illuminant applied to the source image, `None` for the original data
    current: Option<u32>,
    cache: HashMap<u32, Arc<Vec<f32>>>,
    /// Wavelengths the cached curves were sampled at
    sampled_at: Vec<f32>,
}

/// Reference [`IlluminationModel`].
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Illumination {
    queue: QueueHandle,
    mailbox: Mailbox,
    requests: RequestSink,
    full: SharedImage,
    state: Rc<RefCell<IlluminationState>>,
}

impl Illumination {
    pub fn new(queue: QueueHandle, mailbox: Mailbox, full: SharedImage) -> Self {
        Self {
            queue,
            requests: RequestSink::new(mailbox.clone()),
            mailbox,
            full,
            state: Rc::new(RefCell::new(IlluminationState::default())),
        }
    }

    /// Illuminant curve for the bands of the source image, cached per
    /// temperature.
    pub fn illuminant(&self, temperature: u32) -> Arc<Vec<f32>> {
        let wavelengths = self.full.load().wavelengths().to_vec();
        let mut state = self.state.borrow_mut();
        if state.sampled_at != wavelengths {
            state.cache.clear();
            state.sampled_at = wavelengths;
        }
        let IlluminationState {
            cache, sampled_at, ..
        } = &mut *state;
        Arc::clone(
            cache
                .entry(temperature)
                .or_insert_with(|| Arc::new(planck_illuminant(temperature, sampled_at))),
        )
    }

    /// Post the curve of `temperature` for display.
    pub fn show_illuminant(&self, temperature: u32) {
        let curve = self.illuminant(temperature);
        self.mailbox
            .post(Notification::IlluminantCurve { temperature, curve });
    }

    pub fn current(&self) -> Option<u32> {
        self.state.borrow().current
    }

    pub fn roi(&self) -> Rect {
        self.state.borrow().roi
    }

    /// Replace illuminant `from` by `to` in the source image, then request
    /// that all ROI data is rebuilt.
    pub fn apply_illuminant(&self, from: Option<u32>, to: Option<u32>) {
        let from_curve = from.map(|t| self.illuminant(t));
        let to_curve = to.map(|t| self.illuminant(t));
        let full = self.full.clone();
        let state = Rc::clone(&self.state);
        let requests = self.requests.clone();
        let mailbox = self.mailbox.clone();

        log::info!("Applying illuminant {:?} -> {:?}", from, to);
        self.queue.submit(
            "apply illuminant",
            move |token| {
                let image = full.load();
                let result = reilluminate(
                    &image,
                    from_curve.as_deref().map(Vec::as_slice),
                    to_curve.as_deref().map(Vec::as_slice),
                );
                token.check()?;
                full.replace(Arc::new(result));
                Ok(to_curve)
            },
            move |outcome| match outcome {
                TaskOutcome::Finished(curve) => {
                    state.borrow_mut().current = to;
                    requests.invalidate_roi();
                    if let (Some(temperature), Some(curve)) = (to, curve) {
                        mailbox.post(Notification::IlluminantCurve { temperature, curve });
                    }
                }
                TaskOutcome::Failed(e) => log::warn!("Applying illuminant failed: {}", e),
                TaskOutcome::Cancelled => log::debug!("Applying illuminant cancelled"),
            },
        );
    }
}

impl IlluminationModel for Illumination {
    fn set_roi(&mut self, roi: Rect) {
        log::trace!("Illumination ROI {}", roi);
        self.state.borrow_mut().roi = roi;
    }
}
