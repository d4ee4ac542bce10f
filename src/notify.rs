//! Typed notifications between models, the controller and views.
//!
//! Models never call back into the controller. They post a [`Notification`]
//! into the shared [`Mailbox`]; the controller drains it on the interactive
//! thread, routes what it has to act on and hands the rest to the views.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use image::{GrayImage, RgbImage};
use ndarray::Array2;

use crate::geometry::Rect;
use crate::model::{FalseColoring, LabelId, Representation};
use crate::subscription::ImageBandId;

/// Something that happened, or something a model asks the controller to do.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A representation buffer was (re)published for the current ROI.
    ImageUpdated(Representation),
    /// The distribution dataset of a representation changed.
    DistViewUpdated(Representation),
    /// A scalar band image is ready for display.
    BandReady { id: ImageBandId, image: Arc<GrayImage> },
    /// A false-color rendering is ready.
    ColoringReady {
        variant: FalseColoring,
        image: Arc<RgbImage>,
    },
    /// A false-color rendering is being recomputed; views should show a
    /// busy state until the matching `ColoringReady`.
    ColoringPending(FalseColoring),
    /// The whole labeling changed (new ROI, new label).
    LabelingChanged,
    /// Pixels inside `region` changed label.
    PartialLabelUpdate { region: Rect },
    /// Relative spectral power of the current illuminant, one value per band.
    IlluminantCurve { temperature: u32, curve: Arc<Vec<f32>> },
    SegmentationDone { pixels: usize },
    ClusteringDone { clusters: usize },
    /// Addressed to the controller, never forwarded to views.
    Request(Request),
}

/// Actions models may request from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Rebuild all ROI data from the full image.
    InvalidateRoi,
    /// Apply `label` to the pixels set in `mask` (ROI coordinates), or clear
    /// it from them when `negate` is set.
    AlterLabel {
        label: LabelId,
        mask: Array2<bool>,
        negate: bool,
    },
}

/// FIFO of notifications shared by everything living on the interactive
/// thread.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    queue: Rc<RefCell<VecDeque<Notification>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, notification: Notification) {
        log::trace!("Posting {:?}", NotificationKind(&notification));
        self.queue.borrow_mut().push_back(notification);
    }

    pub fn pop(&self) -> Option<Notification> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

/// Capability to send [`Request`]s to the controller.
#[derive(Debug, Clone)]
pub struct RequestSink {
    mailbox: Mailbox,
}

impl RequestSink {
    pub fn new(mailbox: Mailbox) -> Self {
        Self { mailbox }
    }

    pub fn invalidate_roi(&self) {
        self.mailbox.post(Notification::Request(Request::InvalidateRoi));
    }

    pub fn alter_label(&self, label: LabelId, mask: Array2<bool>, negate: bool) {
        self.mailbox
            .post(Notification::Request(Request::AlterLabel { label, mask, negate }));
    }
}

/// Short description for trace logging; payloads can be large.
struct NotificationKind<'a>(&'a Notification);

impl std::fmt::Debug for NotificationKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Notification::ImageUpdated(repr) => write!(f, "ImageUpdated({})", repr),
            Notification::DistViewUpdated(repr) => write!(f, "DistViewUpdated({})", repr),
            Notification::BandReady { id, .. } => write!(f, "BandReady({}:{})", id.repr, id.band),
            Notification::ColoringReady { variant, .. } => write!(f, "ColoringReady({})", variant),
            Notification::ColoringPending(variant) => write!(f, "ColoringPending({})", variant),
            Notification::LabelingChanged => f.write_str("LabelingChanged"),
            Notification::PartialLabelUpdate { region } => {
                write!(f, "PartialLabelUpdate({})", region)
            }
            Notification::IlluminantCurve { temperature, .. } => {
                write!(f, "IlluminantCurve({}K)", temperature)
            }
            Notification::SegmentationDone { pixels } => write!(f, "SegmentationDone({})", pixels),
            Notification::ClusteringDone { clusters } => write!(f, "ClusteringDone({})", clusters),
            Notification::Request(Request::InvalidateRoi) => f.write_str("Request(InvalidateRoi)"),
            Notification::Request(Request::AlterLabel { label, .. }) => {
                write!(f, "Request(AlterLabel {})", label)
            }
        }
    }
}
