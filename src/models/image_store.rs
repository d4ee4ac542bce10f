//! Reference image model: full source image plus one ROI buffer per
//! representation, filled by background tasks.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array3, Axis, Slice};
use specula_tasks::{CancelToken, QueueHandle, TaskError, TaskOutcome};
use web_time::Instant;

use super::{ImageModel, kernels};
use crate::constants::PCA_COMPONENTS;
use crate::data::{LoadError, LoaderRegistry, MultiImage, SharedImage};
use crate::geometry::{Rect, rect_complement};
use crate::model::Representation;
use crate::notify::{Mailbox, Notification};
use crate::subscription::ImageBandId;

/// Whether a representation can be computed region by region.
fn is_pixelwise(repr: Representation) -> bool {
    !matches!(repr, Representation::ImgPca | Representation::GradPca)
}

/// Compute `repr` for `region` from its basis buffer.
fn derive_region(
    repr: Representation,
    source: &MultiImage,
    region: &Rect,
    bands: Option<usize>,
) -> MultiImage {
    let input = source.crop(region);
    match repr {
        Representation::Img => match bands {
            Some(n) => kernels::resample_spectrum(&input, n),
            None => input,
        },
        Representation::Nrm => kernels::normalize(&input),
        Representation::Grad => kernels::gradient(&input),
        Representation::ImgPca | Representation::GradPca => kernels::pca(&input, PCA_COMPONENTS),
    }
}

/// Copy `piece` into `target`, which covers `origin`.
fn paste(target: &mut Array3<f32>, origin: &Rect, piece: &MultiImage) {
    let local = piece.roi().relative_to(origin);
    target
        .slice_axis_mut(Axis(0), Slice::from(local.y as usize..local.bottom() as usize))
        .slice_axis_move(Axis(1), Slice::from(local.x as usize..local.right() as usize))
        .assign(piece.pixels());
}

/// Build `repr` for `roi`, copying the overlap with `previous` when allowed.
fn build_representation(
    repr: Representation,
    source: &MultiImage,
    previous: &MultiImage,
    roi: Rect,
    bands: Option<usize>,
    incremental: bool,
    token: &CancelToken,
) -> Result<MultiImage, TaskError> {
    if source.roi().intersect(&roi) != roi {
        return Err(TaskError::failed(format!(
            "{} basis covers {}, not {}",
            repr,
            source.roi(),
            roi
        )));
    }

    let overlap = previous.roi().intersect(&roi);
    if !incremental || !is_pixelwise(repr) || overlap.is_empty() {
        return Ok(derive_region(repr, source, &roi, bands));
    }

    let mut pieces = Vec::new();
    for region in rect_complement(&roi, &overlap) {
        token.check()?;
        pieces.push(derive_region(repr, source, &region, bands));
    }
    if pieces
        .iter()
        .any(|piece| piece.num_bands() != previous.num_bands())
    {
        log::debug!("{}: band count changed, recomputing {}", repr, roi);
        return Ok(derive_region(repr, source, &roi, bands));
    }

    let mut pixels = Array3::zeros((
        roi.height as usize,
        roi.width as usize,
        previous.num_bands(),
    ));
    paste(&mut pixels, &roi, &previous.crop(&overlap));
    for piece in &pieces {
        paste(&mut pixels, &roi, piece);
    }
    log::trace!(
        "{}: reused {} of {} pixels",
        repr,
        overlap.area(),
        roi.area()
    );
    Ok(MultiImage::new(pixels, previous.wavelengths().to_vec(), roi))
}

/// Reference [`ImageModel`].
pub struct ImageStore {
    queue: QueueHandle,
    mailbox: Mailbox,
    loaders: LoaderRegistry,
    /// Wavelengths assigned to images without metadata (nm)
    spectrum_range: (f32, f32),
    full: SharedImage,
    slots: HashMap<Representation, SharedImage>,
    roi: Rect,
    bands: Option<usize>,
    /// Slots holding data that may be reused by the next spawn
    valid: HashSet<Representation>,
    /// ROI each representation was last spawned for
    spawned: HashMap<Representation, Rect>,
}

impl ImageStore {
    pub fn new(queue: QueueHandle, mailbox: Mailbox, spectrum_range: (f32, f32)) -> Self {
        let slots = Representation::all()
            .iter()
            .map(|repr| (*repr, SharedImage::default()))
            .collect();
        Self {
            queue,
            mailbox,
            loaders: LoaderRegistry::new(),
            spectrum_range,
            full: SharedImage::default(),
            slots,
            roi: Rect::default(),
            bands: None,
            valid: HashSet::new(),
            spawned: HashMap::new(),
        }
    }

    /// Replace the source image, dropping all ROI data. Returns its extent.
    pub fn set_full_image(&mut self, image: MultiImage) -> Rect {
        let (start, end) = self.spectrum_range;
        let image = image.with_default_wavelengths(start, end);
        let extent = image.roi();
        self.full.replace(Arc::new(image));
        self.invalidate_roi();
        extent
    }

    /// Band count override currently in effect.
    pub fn band_override(&self) -> Option<usize> {
        self.bands
    }

    fn slot(&self, repr: Representation) -> SharedImage {
        self.slots.get(&repr).cloned().unwrap_or_default()
    }
}

impl ImageModel for ImageStore {
    fn load_image(&mut self, path: &Path) -> Result<Rect, LoadError> {
        let image = self.loaders.load_file(path)?;
        Ok(self.set_full_image(image))
    }

    fn image(&self, repr: Representation) -> SharedImage {
        self.slot(repr)
    }

    fn full_image(&self) -> SharedImage {
        self.full.clone()
    }

    fn roi(&self) -> Rect {
        self.roi
    }

    fn invalidate_roi(&mut self) {
        log::debug!("Invalidating cached ROI data");
        self.valid.clear();
        self.spawned.clear();
    }

    fn spawn(&mut self, repr: Representation, roi: Rect, bands: Option<usize>) {
        if let Some(n) = bands {
            if self.bands != Some(n) {
                log::info!("Rescaling spectrum to {} bands", n);
                self.bands = Some(n);
                self.valid.clear();
                self.spawned.clear();
            }
        }

        let source = match repr.basis() {
            None => self.full.clone(),
            Some(basis) => {
                if self.spawned.get(&basis) != Some(&roi) {
                    log::debug!("{} needs {} for {}, spawning it first", repr, basis, roi);
                    self.spawn(basis, roi, None);
                }
                self.slot(basis)
            }
        };

        let incremental = self.valid.contains(&repr);
        self.valid.insert(repr);
        self.spawned.insert(repr, roi);
        self.roi = roi;

        let target = self.slot(repr);
        let band_count = if repr == Representation::Img {
            self.bands
        } else {
            None
        };
        let mailbox = self.mailbox.clone();
        self.queue.submit(
            format!("spawn {} {}", repr, roi),
            move |token| {
                let started = Instant::now();
                let previous = target.load();
                let basis = source.load();
                let image = build_representation(
                    repr,
                    &basis,
                    &previous,
                    roi,
                    band_count,
                    incremental,
                    token,
                )?;
                token.check()?;
                target.replace(Arc::new(image));
                log::trace!("{} for {} took {:?}", repr, roi, started.elapsed());
                Ok(())
            },
            move |outcome| match outcome {
                TaskOutcome::Finished(()) => mailbox.post(Notification::ImageUpdated(repr)),
                TaskOutcome::Failed(e) => log::warn!("Computing {} failed: {}", repr, e),
                TaskOutcome::Cancelled => log::debug!("Computing {} cancelled", repr),
            },
        );
    }

    fn compute_band(&mut self, repr: Representation, band: usize) {
        let slot = self.slot(repr);
        let mailbox = self.mailbox.clone();
        let id = ImageBandId::new(repr, band);
        self.queue.submit(
            format!("band {}:{}", repr, band),
            move |_token| {
                let image = slot.load();
                if band >= image.num_bands() {
                    return Err(TaskError::failed(format!(
                        "band {} out of range ({} bands)",
                        band,
                        image.num_bands()
                    )));
                }
                Ok(Arc::new(kernels::band_to_gray(image.band(band))))
            },
            move |outcome| match outcome {
                TaskOutcome::Finished(image) => mailbox.post(Notification::BandReady { id, image }),
                TaskOutcome::Failed(e) => log::warn!("Band {}:{} failed: {}", repr, band, e),
                TaskOutcome::Cancelled => {}
            },
        );
    }
}
