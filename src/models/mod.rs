//! Collaborators driven by the controller.
//!
//! The controller only sees the traits below. Each trait has one reference
//! implementation in this module tree that runs its work on the background
//! task queue and reports back through the [`Mailbox`](crate::notify::Mailbox).

use std::path::Path;
use std::sync::Arc;

use ndarray::Array2;

use crate::data::{LoadError, SharedImage};
use crate::geometry::Rect;
use crate::model::{FalseColoring, LabelId, Representation};

mod clustering;
mod dist_view;
mod false_color;
mod illumination;
mod image_store;
pub mod kernels;
mod labeling;
mod segmentation;
#[cfg(test)]
mod test_support;

pub use clustering::Clustering;
pub use dist_view::{BinSet, DatasetHandle, DistViewStore};
pub use false_color::FalseColorCache;
pub use illumination::{Illumination, planck_illuminant};
pub use image_store::ImageStore;
pub use labeling::{LabelMap, LabelingStore, UNLABELED};
pub use segmentation::GraphSegmentation;

/// Source image and its per-representation ROI buffers.
///
/// Emits `ImageUpdated(repr)` whenever a spawned representation is published.
pub trait ImageModel {
    /// Load the source image, returning its extent.
    fn load_image(&mut self, path: &Path) -> Result<Rect, LoadError>;

    /// Buffer slot of a representation for the current ROI.
    fn image(&self, repr: Representation) -> SharedImage;

    /// Slot holding the full source image.
    fn full_image(&self) -> SharedImage;

    /// ROI the cached representation data was last spawned for.
    fn roi(&self) -> Rect;

    /// Forget all cached ROI data; the next spawn recomputes from scratch.
    fn invalidate_roi(&mut self);

    /// Compute `repr` for `roi` in the background, reusing cached overlap
    /// where possible. `bands` overrides the spectral band count.
    fn spawn(&mut self, repr: Representation, roi: Rect, bands: Option<usize>);

    /// Compute one band of `repr` for display.
    fn compute_band(&mut self, repr: Representation, band: usize);
}

/// Distribution view datasets, one per representation, split by label.
///
/// Emits `DistViewUpdated(repr)` after each rebuild or incremental update.
pub trait DistViewModel {
    /// Dataset currently describing `repr`. It may still be filling; the
    /// matching `DistViewUpdated` marks it complete.
    fn dataset(&self, repr: Representation) -> Option<DatasetHandle>;

    /// Rebuild the dataset of `repr` from `image`.
    fn set_image(&mut self, repr: Representation, image: SharedImage, roi: Rect);

    /// Add the pixels of the `add` regions to `dataset` (or rebuild when
    /// there is none) and make it current for `repr`.
    fn add_image(
        &mut self,
        repr: Representation,
        dataset: Option<DatasetHandle>,
        add: &[Rect],
        roi: Rect,
    );

    /// Remove the pixels of the `sub` regions from the dataset of `repr`,
    /// returning the dataset for a following [`add_image`](Self::add_image).
    fn sub_image(&mut self, repr: Representation, sub: &[Rect], roi: Rect)
    -> Option<DatasetHandle>;

    /// The whole labeling was replaced.
    fn update_labels(&mut self, labels: Arc<LabelMap>);

    /// Labels changed inside `region` only.
    fn update_labels_partially(&mut self, labels: Arc<LabelMap>, region: Rect);
}

/// False-color renderings.
pub trait FalseColorModel {
    /// Deliver a rendering of `variant`, from cache unless `recalc` is set.
    fn request_coloring(&mut self, variant: FalseColoring, recalc: bool);

    /// Abort a running or queued computation of `variant`.
    fn cancel_computation(&mut self, variant: FalseColoring);

    /// Drop renderings computed from `repr`.
    fn process_image_update(&mut self, repr: Representation);
}

/// Pixel labeling of the source image.
pub trait LabelingModel {
    fn set_dimensions(&mut self, width: usize, height: usize);
    fn update_roi(&mut self, roi: Rect);
    fn alter_label(&mut self, label: LabelId, mask: &Array2<bool>, negate: bool);
    fn add_label(&mut self) -> LabelId;
    /// Snapshot of the label of every source image pixel.
    fn label_mask(&self) -> Arc<LabelMap>;
}

pub trait IlluminationModel {
    fn set_roi(&mut self, roi: Rect);
}

/// Receives `ImageUpdated` after the false-color model and band views.
pub trait ImageUpdateListener {
    fn process_image_update(&mut self, repr: Representation);
}
