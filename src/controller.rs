//! The controller: owns the ROI and the subscriptions, decides what the
//! models compute and in which order, and routes their notifications.
//!
//! ## ROI updates
//!
//! [`Controller::update_roi`] is the single entry point for ROI changes:
//!
//! 1. resolve the target ROI (clamped to the image)
//! 2. if reuse was requested, compute the `sub`/`add` regions between the
//!    cached ROI and the target; fall back to a full rebuild when patching
//!    is not profitable
//! 3. full rebuild: cancel queued work and invalidate the cached ROI data
//! 4. recycle pass: take the distribution datasets apart (`sub_image`)
//! 5. metadata pass: labeling and illumination learn the new ROI
//! 6. payload pass: spawn every subscribed representation, basis first, and
//!    feed its distribution view
//!
//! All model work ends up on the background queue, which runs tasks in
//! submission order, so a representation always sees its basis computed for
//! the same ROI.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use specula_tasks::{QueueError, QueueHandle, TaskQueue};

use crate::config::{AppConfig, RoiConfig};
use crate::constants::WORKER_THREAD_NAME;
use crate::data::LoadError;
use crate::geometry::{Rect, rect_transform};
use crate::model::{FalseColoring, LabelId, Representation};
use crate::models::{
    Clustering, DatasetHandle, DistViewModel, DistViewStore, FalseColorCache, FalseColorModel,
    GraphSegmentation, Illumination, IlluminationModel, ImageModel, ImageStore,
    ImageUpdateListener, LabelingModel, LabelingStore,
};
use crate::notify::{Mailbox, Notification, Request, RequestSink};
use crate::subscription::{ImageBandId, SubscriberId, Subscriptions};

/// Why the controller could not be created.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to start background worker: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to load image: {0}")]
    Load(#[from] LoadError),

    #[error("Image has no pixels ({0})")]
    EmptyImage(Rect),
}

/// Models the controller drives.
pub struct Collaborators {
    pub image: Box<dyn ImageModel>,
    pub dist_view: Box<dyn DistViewModel>,
    pub false_color: Box<dyn FalseColorModel>,
    pub labeling: Box<dyn LabelingModel>,
    pub illumination: Box<dyn IlluminationModel>,
    /// Notified of image updates after bands and false colors
    pub listeners: Vec<Box<dyn ImageUpdateListener>>,
}

/// User-triggered analysis tools sharing state with the collaborators.
#[derive(Clone)]
pub struct Tools {
    pub illumination: Illumination,
    pub segmentation: GraphSegmentation,
    pub clustering: Clustering,
}

/// What an [`Controller::update_roi`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiUpdate {
    pub roi: Rect,
    /// Whether cached data was patched instead of rebuilt
    pub incremental: bool,
    pub sub: Vec<Rect>,
    pub add: Vec<Rect>,
}

/// Initial ROI for an image: the whole extent, or for images larger than
/// `area_limit` pixels a centered window of at most `max_side` per side.
pub fn initial_roi(extent: Rect, area_limit: i64, max_side: i32) -> Rect {
    if extent.area() <= area_limit {
        return extent;
    }
    let width = extent.width.min(max_side);
    let height = extent.height.min(max_side);
    Rect::new(
        extent.x + (extent.width - width) / 2,
        extent.y + (extent.height - height) / 2,
        width,
        height,
    )
}

pub struct Controller {
    roi: Rect,
    extent: Rect,
    subs: Subscriptions,
    next_subscriber: u64,
    threshold: f64,
    image: Box<dyn ImageModel>,
    dist_view: Box<dyn DistViewModel>,
    false_color: Box<dyn FalseColorModel>,
    labeling: Box<dyn LabelingModel>,
    illumination: Box<dyn IlluminationModel>,
    listeners: Vec<Box<dyn ImageUpdateListener>>,
    tools: Option<Tools>,
    mailbox: Mailbox,
    // Declared last so the worker is joined after everything else is gone.
    queue: TaskQueue,
}

impl Controller {
    /// Start the worker, load `path` and build the reference models.
    pub fn new(config: &AppConfig, path: &Path) -> Result<Self, StartupError> {
        let queue = TaskQueue::spawn(WORKER_THREAD_NAME)?;
        let mailbox = Mailbox::new();
        let handle = queue.handle().clone();

        let spectrum = (
            config.illumination.spectrum_start_nm,
            config.illumination.spectrum_end_nm,
        );
        let mut image = ImageStore::new(handle.clone(), mailbox.clone(), spectrum);
        let extent = image.load_image(path)?;
        if extent.is_empty() {
            return Err(StartupError::EmptyImage(extent));
        }

        let img_slot = image.image(Representation::Img);
        let tools = Tools {
            illumination: Illumination::new(handle.clone(), mailbox.clone(), image.full_image()),
            segmentation: GraphSegmentation::new(
                handle.clone(),
                mailbox.clone(),
                img_slot.clone(),
                config.segmentation.spectral_threshold,
            ),
            clustering: Clustering::new(
                handle.clone(),
                mailbox.clone(),
                img_slot,
                config.clustering.clusters,
                config.clustering.iterations,
            ),
        };
        let collaborators = Collaborators {
            false_color: Box::new(FalseColorCache::new(handle.clone(), mailbox.clone(), &image)),
            dist_view: Box::new(DistViewStore::new(
                handle.clone(),
                mailbox.clone(),
                config.dist_view.bins,
            )),
            labeling: Box::new(LabelingStore::new(mailbox.clone())),
            illumination: Box::new(tools.illumination.clone()),
            listeners: vec![
                Box::new(tools.segmentation.clone()),
                Box::new(tools.clustering.clone()),
            ],
            image: Box::new(image),
        };

        let mut controller =
            Self::with_collaborators(queue, mailbox, collaborators, extent, &config.roi);
        controller.tools = Some(tools);
        Ok(controller)
    }

    /// Assemble a controller around existing models and run the startup
    /// sequence: initial label, initial ROI, permanent `Img` subscription.
    pub fn with_collaborators(
        queue: TaskQueue,
        mailbox: Mailbox,
        collaborators: Collaborators,
        extent: Rect,
        roi_config: &RoiConfig,
    ) -> Self {
        assert!(
            Representation::dependency_order_is_valid(),
            "representation order places a derived representation before its basis"
        );

        let roi = initial_roi(
            extent,
            roi_config.initial_area_limit,
            roi_config.initial_max_side,
        );
        let mut controller = Self {
            roi,
            extent,
            subs: Subscriptions::new(),
            next_subscriber: SubscriberId::CONTROLLER.raw() + 1,
            threshold: roi_config.incremental_threshold,
            image: collaborators.image,
            dist_view: collaborators.dist_view,
            false_color: collaborators.false_color,
            labeling: collaborators.labeling,
            illumination: collaborators.illumination,
            listeners: collaborators.listeners,
            tools: None,
            mailbox,
            queue,
        };

        log::info!("Image extent {}, initial ROI {}", extent, roi);
        controller
            .labeling
            .set_dimensions(extent.width as usize, extent.height as usize);
        controller.labeling.add_label();
        controller.update_roi(false, Some(roi), None);
        controller.subscribe_representation(SubscriberId::CONTROLLER, Representation::Img);
        controller
    }

    pub fn roi(&self) -> Rect {
        self.roi
    }

    pub fn extent(&self) -> Rect {
        self.extent
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subs
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn queue(&self) -> &QueueHandle {
        self.queue.handle()
    }

    /// Distribution view dataset of `repr`, possibly still being filled.
    pub fn dataset(&self, repr: Representation) -> Option<DatasetHandle> {
        self.dist_view.dataset(repr)
    }

    /// Analysis tools, present when built by [`Controller::new`].
    pub fn tools(&self) -> Option<&Tools> {
        self.tools.as_ref()
    }

    /// Capability for views that need to request label changes or ROI
    /// invalidation.
    pub fn request_sink(&self) -> RequestSink {
        RequestSink::new(self.mailbox.clone())
    }

    /// Fresh identity for a new view.
    pub fn register_subscriber(&mut self) -> SubscriberId {
        let id = SubscriberId::new(self.next_subscriber);
        self.next_subscriber += 1;
        id
    }

    fn clamp_to_image(&self, candidate: Rect) -> Option<Rect> {
        let clamped = candidate.intersect(&self.extent);
        (!clamped.is_empty()).then_some(clamped)
    }

    /// Move the ROI and recompute what is subscribed. See the module docs.
    pub fn update_roi(
        &mut self,
        reuse: bool,
        candidate: Option<Rect>,
        bands: Option<usize>,
    ) -> RoiUpdate {
        let roi = match candidate {
            None => self.roi,
            Some(candidate) => match self.clamp_to_image(candidate) {
                Some(roi) => roi,
                None => {
                    log::warn!(
                        "ROI {} does not overlap image {}, keeping {}",
                        candidate,
                        self.extent,
                        self.roi
                    );
                    self.roi
                }
            },
        };
        self.roi = roi;

        let mut update = RoiUpdate {
            roi,
            incremental: false,
            sub: Vec::new(),
            add: Vec::new(),
        };
        if reuse {
            let diff = rect_transform(&self.image.roi(), &roi, self.threshold);
            if diff.profitable {
                update.incremental = true;
                update.sub = diff.sub;
                update.add = diff.add;
            } else {
                log::debug!("Incremental update to {} not profitable", roi);
            }
        }

        if !update.incremental {
            self.queue.handle().cancel_all();
            self.image.invalidate_roi();
        }

        let subscribed: Vec<Representation> = Representation::all()
            .iter()
            .copied()
            .filter(|repr| self.subs.repr.is_subscribed(*repr))
            .collect();

        let mut recycled = HashMap::new();
        if update.incremental {
            for &repr in &subscribed {
                recycled.insert(repr, self.dist_view.sub_image(repr, &update.sub, roi));
            }
        }

        self.labeling.update_roi(roi);
        self.illumination.set_roi(roi);

        for repr in subscribed {
            self.image.spawn(repr, roi, bands);
            if update.incremental {
                let dataset = recycled.remove(&repr).flatten();
                self.dist_view.add_image(repr, dataset, &update.add, roi);
            } else {
                self.dist_view.set_image(repr, self.image.image(repr), roi);
            }
        }

        log::debug!(
            "ROI {} ({}, -{} +{} region(s))",
            roi,
            if update.incremental { "incremental" } else { "full" },
            update.sub.len(),
            update.add.len()
        );
        update
    }

    /// User pan/resize.
    pub fn spawn_roi(&mut self, roi: Rect) -> RoiUpdate {
        self.update_roi(true, Some(roi), None)
    }

    /// Rebuild everything for the current ROI.
    pub fn invalidate_roi(&mut self) -> RoiUpdate {
        self.update_roi(false, None, None)
    }

    /// Resample the spectrum to `bands` bands and rebuild.
    pub fn rescale_spectrum(&mut self, bands: usize) -> RoiUpdate {
        log::debug!("Spectrum rescale to {} bands requested", bands);
        self.queue.handle().cancel_all();
        self.update_roi(false, None, Some(bands))
    }

    pub fn subscribe_representation(&mut self, subscriber: SubscriberId, repr: Representation) {
        if self.subs.repr.subscribe(subscriber, repr) {
            log::debug!("{} is live, computing it for {}", repr, self.roi);
            self.image.spawn(repr, self.roi, None);
            self.dist_view
                .set_image(repr, self.image.image(repr), self.roi);
        }
    }

    pub fn unsubscribe_representation(&mut self, subscriber: SubscriberId, repr: Representation) {
        self.subs.repr.unsubscribe(subscriber, repr);
    }

    pub fn subscribe_image_band(
        &mut self,
        subscriber: SubscriberId,
        repr: Representation,
        band: usize,
    ) {
        self.subscribe_representation(subscriber, repr);
        if self
            .subs
            .image_band
            .subscribe(subscriber, ImageBandId::new(repr, band))
        {
            self.image.compute_band(repr, band);
        }
    }

    pub fn unsubscribe_image_band(
        &mut self,
        subscriber: SubscriberId,
        repr: Representation,
        band: usize,
    ) {
        self.subs
            .image_band
            .unsubscribe(subscriber, ImageBandId::new(repr, band));
        self.unsubscribe_representation(subscriber, repr);
    }

    pub fn subscribe_false_coloring(&mut self, subscriber: SubscriberId, variant: FalseColoring) {
        self.subscribe_representation(subscriber, variant.basis());
        if self.subs.false_color.subscribe(subscriber, variant) {
            self.false_color.request_coloring(variant, false);
        }
    }

    pub fn unsubscribe_false_coloring(&mut self, subscriber: SubscriberId, variant: FalseColoring) {
        self.subs.false_color.unsubscribe(subscriber, variant);
        if !self.subs.false_color.is_subscribed(variant) {
            self.false_color.cancel_computation(variant);
        }
        self.unsubscribe_representation(subscriber, variant.basis());
    }

    /// Recompute a false coloring that somebody is looking at.
    pub fn recalc_false_coloring(&mut self, variant: FalseColoring) {
        if self.subs.false_color.is_subscribed(variant) {
            self.false_color.request_coloring(variant, true);
        }
    }

    pub fn add_label(&mut self) -> LabelId {
        self.labeling.add_label()
    }

    /// Log which representations are currently subscribed.
    pub fn debug_subscriptions(&self) {
        for repr in Representation::all() {
            log::debug!(
                "{}: {} ({} subscriber(s))",
                repr,
                if self.subs.repr.is_subscribed(*repr) {
                    "subscribed"
                } else {
                    "not subscribed"
                },
                self.subs.repr.subscriber_count(*repr)
            );
        }
    }

    fn process_image_update(&mut self, repr: Representation, events: &mut Vec<Notification>) {
        // The false-color model drops stale renderings before new requests.
        self.false_color.process_image_update(repr);

        let bands = self.subs.image_band.topics_where(|id| id.repr == repr);
        for id in bands {
            self.image.compute_band(repr, id.band);
        }

        let variants = self
            .subs
            .false_color
            .topics_where(|variant| variant.is_based_on(repr));
        for variant in variants {
            events.push(Notification::ColoringPending(variant));
            self.false_color.request_coloring(variant, false);
        }

        for listener in &mut self.listeners {
            listener.process_image_update(repr);
        }
        events.push(Notification::ImageUpdated(repr));
    }

    fn route(&mut self, notification: Notification, events: &mut Vec<Notification>) {
        match notification {
            Notification::ImageUpdated(repr) => self.process_image_update(repr, events),
            Notification::Request(Request::InvalidateRoi) => {
                self.invalidate_roi();
            }
            Notification::Request(Request::AlterLabel {
                label,
                mask,
                negate,
            }) => self.labeling.alter_label(label, &mask, negate),
            Notification::LabelingChanged => {
                self.dist_view.update_labels(self.labeling.label_mask());
                events.push(Notification::LabelingChanged);
            }
            Notification::PartialLabelUpdate { region } => {
                self.dist_view
                    .update_labels_partially(self.labeling.label_mask(), region);
                events.push(Notification::PartialLabelUpdate { region });
            }
            other => events.push(other),
        }
    }

    /// Run finished task callbacks and route everything they posted.
    ///
    /// Never blocks. Returns the notifications meant for views, in order.
    pub fn process_pending(&mut self) -> Vec<Notification> {
        let mut events = Vec::new();
        loop {
            self.queue.handle().dispatch_completions();
            let Some(notification) = self.mailbox.pop() else {
                break;
            };
            self.route(notification, &mut events);
        }
        events
    }

    /// Keep processing until no task is outstanding, waiting up to `wait`
    /// at a time for the worker.
    pub fn run_until_idle(&mut self, wait: Duration) -> Vec<Notification> {
        let mut events = self.process_pending();
        while !self.queue.handle().is_idle() {
            self.queue.handle().dispatch_completions_timeout(wait);
            events.extend(self.process_pending());
        }
        events
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let cancelled = self.queue.handle().cancel_all();
        log::info!("Controller shutting down ({} task(s) cancelled)", cancelled);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use ndarray::Array2;

    use super::*;
    use crate::data::SharedImage;
    use crate::models::{BinSet, LabelMap};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Spawn(Representation, Rect, Option<usize>),
        Invalidate,
        ComputeBand(Representation, usize),
        SetImage(Representation, Rect),
        AddImage(Representation, bool, Vec<Rect>, Rect),
        SubImage(Representation, Vec<Rect>, Rect),
        UpdateLabels,
        UpdateLabelsPartially(Rect),
        RequestColoring(FalseColoring, bool),
        CancelColoring(FalseColoring),
        ColorImageUpdate(Representation),
        SetDimensions(usize, usize),
        UpdateRoi(Rect),
        AlterLabel(LabelId, bool),
        AddLabel,
        SetRoi(Rect),
        Listener(Representation),
    }

    type Log = Rc<RefCell<Vec<Call>>>;

    struct MockImage {
        log: Log,
        roi: Rect,
    }

    impl ImageModel for MockImage {
        fn load_image(&mut self, _path: &Path) -> Result<Rect, LoadError> {
            Ok(Rect::default())
        }
        fn image(&self, _repr: Representation) -> SharedImage {
            SharedImage::default()
        }
        fn full_image(&self) -> SharedImage {
            SharedImage::default()
        }
        fn roi(&self) -> Rect {
            self.roi
        }
        fn invalidate_roi(&mut self) {
            self.log.borrow_mut().push(Call::Invalidate);
        }
        fn spawn(&mut self, repr: Representation, roi: Rect, bands: Option<usize>) {
            self.roi = roi;
            self.log.borrow_mut().push(Call::Spawn(repr, roi, bands));
        }
        fn compute_band(&mut self, repr: Representation, band: usize) {
            self.log.borrow_mut().push(Call::ComputeBand(repr, band));
        }
    }

    struct MockDistView {
        log: Log,
    }

    impl DistViewModel for MockDistView {
        fn dataset(&self, _repr: Representation) -> Option<DatasetHandle> {
            None
        }
        fn set_image(&mut self, repr: Representation, _image: SharedImage, roi: Rect) {
            self.log.borrow_mut().push(Call::SetImage(repr, roi));
        }
        fn add_image(
            &mut self,
            repr: Representation,
            dataset: Option<DatasetHandle>,
            add: &[Rect],
            roi: Rect,
        ) {
            self.log
                .borrow_mut()
                .push(Call::AddImage(repr, dataset.is_some(), add.to_vec(), roi));
        }
        fn sub_image(
            &mut self,
            repr: Representation,
            sub: &[Rect],
            roi: Rect,
        ) -> Option<DatasetHandle> {
            self.log
                .borrow_mut()
                .push(Call::SubImage(repr, sub.to_vec(), roi));
            Some(DatasetHandle::new(BinSet::new(4, (0.0, 1.0))))
        }
        fn update_labels(&mut self, _labels: Arc<LabelMap>) {
            self.log.borrow_mut().push(Call::UpdateLabels);
        }
        fn update_labels_partially(&mut self, _labels: Arc<LabelMap>, region: Rect) {
            self.log
                .borrow_mut()
                .push(Call::UpdateLabelsPartially(region));
        }
    }

    struct MockFalseColor {
        log: Log,
    }

    impl FalseColorModel for MockFalseColor {
        fn request_coloring(&mut self, variant: FalseColoring, recalc: bool) {
            self.log
                .borrow_mut()
                .push(Call::RequestColoring(variant, recalc));
        }
        fn cancel_computation(&mut self, variant: FalseColoring) {
            self.log.borrow_mut().push(Call::CancelColoring(variant));
        }
        fn process_image_update(&mut self, repr: Representation) {
            self.log.borrow_mut().push(Call::ColorImageUpdate(repr));
        }
    }

    struct MockLabeling {
        log: Log,
    }

    impl LabelingModel for MockLabeling {
        fn set_dimensions(&mut self, width: usize, height: usize) {
            self.log
                .borrow_mut()
                .push(Call::SetDimensions(width, height));
        }
        fn update_roi(&mut self, roi: Rect) {
            self.log.borrow_mut().push(Call::UpdateRoi(roi));
        }
        fn alter_label(&mut self, label: LabelId, _mask: &Array2<bool>, negate: bool) {
            self.log.borrow_mut().push(Call::AlterLabel(label, negate));
        }
        fn add_label(&mut self) -> LabelId {
            self.log.borrow_mut().push(Call::AddLabel);
            1
        }
        fn label_mask(&self) -> Arc<LabelMap> {
            Arc::new(Array2::zeros((0, 0)))
        }
    }

    struct MockIllumination {
        log: Log,
    }

    impl IlluminationModel for MockIllumination {
        fn set_roi(&mut self, roi: Rect) {
            self.log.borrow_mut().push(Call::SetRoi(roi));
        }
    }

    struct MockListener {
        log: Log,
    }

    impl ImageUpdateListener for MockListener {
        fn process_image_update(&mut self, repr: Representation) {
            self.log.borrow_mut().push(Call::Listener(repr));
        }
    }

    const A: SubscriberId = SubscriberId::new(1);
    const B: SubscriberId = SubscriberId::new(2);

    fn controller(width: i32, height: i32) -> (Controller, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let collaborators = Collaborators {
            image: Box::new(MockImage {
                log: log.clone(),
                roi: Rect::default(),
            }),
            dist_view: Box::new(MockDistView { log: log.clone() }),
            false_color: Box::new(MockFalseColor { log: log.clone() }),
            labeling: Box::new(MockLabeling { log: log.clone() }),
            illumination: Box::new(MockIllumination { log: log.clone() }),
            listeners: vec![Box::new(MockListener { log: log.clone() })],
        };
        let queue = TaskQueue::spawn("test-controller").unwrap();
        let controller = Controller::with_collaborators(
            queue,
            Mailbox::new(),
            collaborators,
            Rect::from_size(width, height),
            &RoiConfig::default(),
        );
        (controller, log)
    }

    fn take(log: &Log) -> Vec<Call> {
        std::mem::take(&mut *log.borrow_mut())
    }

    fn spawned(calls: &[Call]) -> Vec<Representation> {
        calls
            .iter()
            .filter_map(|c| match c {
                Call::Spawn(repr, ..) => Some(*repr),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_roi() {
        assert_eq!(
            initial_roi(Rect::from_size(1000, 1000), 262_144, 512),
            Rect::new(244, 244, 512, 512)
        );
        assert_eq!(
            initial_roi(Rect::from_size(400, 400), 262_144, 512),
            Rect::from_size(400, 400)
        );
        assert_eq!(
            initial_roi(Rect::from_size(2000, 300), 262_144, 512),
            Rect::new(744, 0, 512, 300)
        );
    }

    #[test]
    fn test_startup_sequence() {
        let (controller, log) = controller(1000, 1000);
        let roi = Rect::new(244, 244, 512, 512);
        assert_eq!(controller.roi(), roi);
        assert_eq!(
            take(&log),
            vec![
                Call::SetDimensions(1000, 1000),
                Call::AddLabel,
                Call::Invalidate,
                Call::UpdateRoi(roi),
                Call::SetRoi(roi),
                Call::Spawn(Representation::Img, roi, None),
                Call::SetImage(Representation::Img, roi),
            ]
        );
        assert!(
            controller
                .subscriptions()
                .repr
                .is_subscribed(Representation::Img)
        );
    }

    #[test]
    fn test_first_grad_subscriber_spawns_once() {
        let (mut controller, log) = controller(1000, 1000);
        let roi = controller.roi();
        take(&log);

        controller.subscribe_representation(A, Representation::Grad);
        assert_eq!(
            take(&log),
            vec![
                Call::Spawn(Representation::Grad, roi, None),
                Call::SetImage(Representation::Grad, roi),
            ]
        );

        controller.subscribe_representation(B, Representation::Grad);
        controller.subscribe_representation(A, Representation::Grad);
        assert!(take(&log).is_empty());
    }

    #[test]
    fn test_update_follows_representation_order() {
        let (mut controller, log) = controller(300, 300);
        controller.subscribe_representation(A, Representation::GradPca);
        controller.subscribe_representation(A, Representation::Nrm);
        controller.subscribe_representation(B, Representation::Grad);
        take(&log);

        controller.spawn_roi(Rect::new(10, 0, 290, 300));
        let calls = take(&log);
        assert_eq!(
            spawned(&calls),
            vec![
                Representation::Img,
                Representation::Nrm,
                Representation::Grad,
                Representation::GradPca
            ]
        );

        // every recycle precedes the metadata pass, which precedes every spawn
        let last_sub = calls
            .iter()
            .rposition(|c| matches!(c, Call::SubImage(..)))
            .unwrap();
        let meta = calls
            .iter()
            .position(|c| matches!(c, Call::UpdateRoi(_)))
            .unwrap();
        let first_spawn = calls
            .iter()
            .position(|c| matches!(c, Call::Spawn(..)))
            .unwrap();
        assert!(last_sub < meta && meta < first_spawn);

        // each spawn is directly followed by its distribution update
        for (i, call) in calls.iter().enumerate() {
            if let Call::Spawn(repr, ..) = call {
                assert!(matches!(&calls[i + 1], Call::AddImage(r, true, ..) if r == repr));
            }
        }
    }

    #[test]
    fn test_pan_replays_only_the_difference() {
        let (mut controller, log) = controller(200, 100);
        controller.spawn_roi(Rect::new(0, 0, 100, 100));
        take(&log);

        let new = Rect::new(50, 0, 100, 100);
        let update = controller.spawn_roi(new);
        assert!(update.incremental);
        assert_eq!(update.sub, vec![Rect::new(0, 0, 50, 100)]);
        assert_eq!(update.add, vec![Rect::new(100, 0, 50, 100)]);

        let calls = take(&log);
        assert!(!calls.contains(&Call::Invalidate));
        assert!(calls.contains(&Call::SubImage(
            Representation::Img,
            vec![Rect::new(0, 0, 50, 100)],
            new
        )));
        assert!(calls.contains(&Call::AddImage(
            Representation::Img,
            true,
            vec![Rect::new(100, 0, 50, 100)],
            new
        )));
    }

    #[test]
    fn test_idempotent_update_has_empty_diff() {
        let (mut controller, log) = controller(500, 400);
        take(&log);

        let update = controller.update_roi(true, None, None);
        assert!(update.incremental);
        assert!(update.sub.is_empty() && update.add.is_empty());
        assert_eq!(update.roi, controller.roi());
        assert!(!take(&log).contains(&Call::Invalidate));
    }

    #[test]
    fn test_disjoint_move_rebuilds() {
        let (mut controller, log) = controller(1000, 1000);
        take(&log);

        let target = Rect::new(0, 0, 100, 100);
        let update = controller.spawn_roi(target);
        assert!(!update.incremental);
        let calls = take(&log);
        assert_eq!(calls[0], Call::Invalidate);
        assert!(calls.contains(&Call::SetImage(Representation::Img, target)));
        assert!(!calls.iter().any(|c| matches!(c, Call::SubImage(..))));
    }

    #[test]
    fn test_roi_is_clamped_or_rejected() {
        let (mut controller, _log) = controller(200, 100);
        controller.spawn_roi(Rect::new(150, 50, 100, 100));
        assert_eq!(controller.roi(), Rect::new(150, 50, 50, 50));

        controller.spawn_roi(Rect::new(5000, 5000, 10, 10));
        assert_eq!(controller.roi(), Rect::new(150, 50, 50, 50));
    }

    #[test]
    fn test_rescale_spectrum_passes_band_count() {
        let (mut controller, log) = controller(100, 100);
        take(&log);

        controller.rescale_spectrum(5);
        let calls = take(&log);
        assert_eq!(calls[0], Call::Invalidate);
        assert!(calls.contains(&Call::Spawn(
            Representation::Img,
            controller.roi(),
            Some(5)
        )));
    }

    #[test]
    fn test_band_subscription_cascades() {
        let (mut controller, log) = controller(100, 100);
        take(&log);

        controller.subscribe_image_band(A, Representation::Grad, 2);
        assert_eq!(
            take(&log),
            vec![
                Call::Spawn(Representation::Grad, controller.roi(), None),
                Call::SetImage(Representation::Grad, controller.roi()),
                Call::ComputeBand(Representation::Grad, 2),
            ]
        );

        controller.unsubscribe_image_band(A, Representation::Grad, 2);
        let subs = controller.subscriptions();
        assert!(!subs.repr.is_subscribed(Representation::Grad));
        assert!(subs.image_band.is_empty());
    }

    #[test]
    fn test_false_coloring_cascade_and_cancel() {
        let (mut controller, log) = controller(100, 100);
        take(&log);

        controller.subscribe_false_coloring(A, FalseColoring::PcaGrad);
        let calls = take(&log);
        assert_eq!(spawned(&calls), vec![Representation::Grad]);
        assert_eq!(
            calls.last(),
            Some(&Call::RequestColoring(FalseColoring::PcaGrad, false))
        );

        controller.subscribe_false_coloring(B, FalseColoring::PcaGrad);
        controller.unsubscribe_false_coloring(A, FalseColoring::PcaGrad);
        assert!(take(&log).is_empty());

        controller.unsubscribe_false_coloring(B, FalseColoring::PcaGrad);
        assert_eq!(
            take(&log),
            vec![Call::CancelColoring(FalseColoring::PcaGrad)]
        );
        assert!(
            !controller
                .subscriptions()
                .repr
                .is_subscribed(Representation::Grad)
        );
    }

    #[test]
    fn test_recalc_only_when_subscribed() {
        let (mut controller, log) = controller(100, 100);
        take(&log);

        controller.recalc_false_coloring(FalseColoring::Som);
        assert!(take(&log).is_empty());

        controller.subscribe_false_coloring(A, FalseColoring::Som);
        take(&log);
        controller.recalc_false_coloring(FalseColoring::Som);
        assert_eq!(
            take(&log),
            vec![Call::RequestColoring(FalseColoring::Som, true)]
        );
    }

    #[test]
    fn test_image_update_routing() {
        let (mut controller, log) = controller(100, 100);
        controller.subscribe_image_band(A, Representation::Img, 0);
        controller.subscribe_false_coloring(A, FalseColoring::Cmf);
        controller.subscribe_false_coloring(B, FalseColoring::Cmf);
        controller.subscribe_false_coloring(A, FalseColoring::Pca);
        controller.subscribe_false_coloring(A, FalseColoring::PcaGrad);
        take(&log);

        controller
            .mailbox()
            .post(Notification::ImageUpdated(Representation::Img));
        let events = controller.process_pending();
        let calls = take(&log);

        assert_eq!(calls[0], Call::ColorImageUpdate(Representation::Img));
        assert_eq!(
            calls.last(),
            Some(&Call::Listener(Representation::Img))
        );
        let count = |call: Call| calls.iter().filter(|c| **c == call).count();
        assert_eq!(count(Call::ComputeBand(Representation::Img, 0)), 1);
        assert_eq!(count(Call::RequestColoring(FalseColoring::Cmf, false)), 1);
        assert_eq!(count(Call::RequestColoring(FalseColoring::Pca, false)), 1);
        assert_eq!(count(Call::RequestColoring(FalseColoring::PcaGrad, false)), 0);

        let pending: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, Notification::ColoringPending(_)))
            .collect();
        assert_eq!(pending.len(), 2);
        assert!(matches!(
            events.last(),
            Some(Notification::ImageUpdated(Representation::Img))
        ));
    }

    #[test]
    fn test_model_requests_are_routed() {
        let (mut controller, log) = controller(100, 100);
        take(&log);

        let sink = controller.request_sink();
        sink.alter_label(1, Array2::from_elem((2, 2), true), true);
        sink.invalidate_roi();
        let events = controller.process_pending();

        assert!(events.is_empty());
        let calls = take(&log);
        assert_eq!(calls[0], Call::AlterLabel(1, true));
        assert_eq!(calls[1], Call::Invalidate);
        assert!(calls.contains(&Call::SetImage(Representation::Img, controller.roi())));
    }

    #[test]
    fn test_view_notifications_pass_through() {
        let (mut controller, _log) = controller(100, 100);
        controller
            .mailbox()
            .post(Notification::DistViewUpdated(Representation::Img));
        controller.mailbox().post(Notification::ClusteringDone { clusters: 3 });
        let events = controller.process_pending();
        assert!(matches!(
            events.as_slice(),
            [
                Notification::DistViewUpdated(Representation::Img),
                Notification::ClusteringDone { clusters: 3 }
            ]
        ));
    }

    #[test]
    fn test_label_changes_reach_distribution_views() {
        let (mut controller, log) = controller(100, 100);
        take(&log);

        let region = Rect::new(3, 4, 5, 6);
        controller.mailbox().post(Notification::LabelingChanged);
        controller
            .mailbox()
            .post(Notification::PartialLabelUpdate { region });
        let events = controller.process_pending();

        assert_eq!(
            take(&log),
            vec![Call::UpdateLabels, Call::UpdateLabelsPartially(region)]
        );
        assert!(matches!(
            events.as_slice(),
            [
                Notification::LabelingChanged,
                Notification::PartialLabelUpdate { region: r }
            ] if *r == region
        ));
    }

    fn temp_npy(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("specula-{}-{}.npy", name, std::process::id()))
    }

    fn write_npy<A: ndarray_npy::WritableElement, D: ndarray::Dimension>(
        path: &Path,
        array: &ndarray::Array<A, D>,
    ) {
        use ndarray_npy::WriteNpyExt;
        let file = std::fs::File::create(path).unwrap();
        array.write_npy(file).unwrap();
    }

    #[test]
    fn test_panning_a_loaded_image_keeps_datasets_exact() {
        let pixels = ndarray::Array3::from_shape_fn((20, 40, 3), |(r, c, b)| {
            0.1 + (r * 7 + c * 3 + b) as f32 / 100.0
        });
        let path = temp_npy("pan");
        write_npy(&path, &pixels);
        let full = crate::data::MultiImage::new(pixels, Vec::new(), Rect::from_size(40, 20));

        let config = AppConfig::default();
        let mut controller = Controller::new(&config, &path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(controller.extent(), Rect::from_size(40, 20));
        controller.run_until_idle(Duration::from_millis(50));

        // full update, then a pan queued behind it before anything ran
        controller.update_roi(false, Some(Rect::new(5, 0, 20, 20)), None);
        let update = controller.spawn_roi(Rect::new(10, 0, 20, 20));
        assert!(update.incremental);
        controller.run_until_idle(Duration::from_millis(50));

        let c = Rect::new(15, 0, 20, 20);
        assert!(controller.spawn_roi(c).incremental);
        controller.run_until_idle(Duration::from_millis(50));

        let dataset = controller.dataset(Representation::Img).unwrap();
        let published = dataset.lock();
        let mut expected = BinSet::new(config.dist_view.bins, published.range());
        expected.add_region(&full, &c, &LabelMap::zeros((0, 0)));
        assert_eq!(*published, expected);
    }

    #[test]
    fn test_startup_rejects_images_without_pixels() {
        let path = temp_npy("empty");
        write_npy(&path, &Array2::<f32>::zeros((0, 5)));
        let result = Controller::new(&AppConfig::default(), &path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(StartupError::Load(LoadError::Degenerate { .. }) | StartupError::EmptyImage(_))
        ));
    }

    #[test]
    fn test_startup_reports_missing_file() {
        let result = Controller::new(&AppConfig::default(), Path::new("/nonexistent/cube.npy"));
        assert!(matches!(result, Err(StartupError::Load(LoadError::Io { .. }))));
    }

    #[test]
    fn test_register_subscriber_is_unique() {
        let (mut controller, _log) = controller(10, 10);
        let a = controller.register_subscriber();
        let b = controller.register_subscriber();
        assert_ne!(a, b);
        assert_ne!(a, SubscriberId::CONTROLLER);
    }
}
