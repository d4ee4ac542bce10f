//! Reference distribution view: quantized spectra counted per bin and label.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ndarray::{Array2, ArrayView1};
use specula_tasks::{QueueHandle, TaskOutcome};

use super::labeling::{LabelMap, label_at};
use super::DistViewModel;
use crate::data::{MultiImage, SharedImage};
use crate::geometry::Rect;
use crate::model::{LabelId, Representation};
use crate::notify::{Mailbox, Notification};

/// Histogram of quantized spectra over a region, one set of bins per label.
///
/// The value range is fixed when the set is created so that regions can be
/// added and removed later with identical quantization.
#[derive(Debug, Clone, PartialEq)]
pub struct BinSet {
    bins: HashMap<LabelId, HashMap<Vec<u8>, u32>>,
    levels: u32,
    range: (f32, f32),
    total: u64,
}

impl BinSet {
    /// Empty set with `levels` quantization steps (2-256) over `range`.
    pub fn new(levels: u32, range: (f32, f32)) -> Self {
        Self {
            bins: HashMap::new(),
            levels: levels.clamp(2, 256),
            range,
            total: 0,
        }
    }

    /// Quantized bin key of a spectrum.
    pub fn key(&self, spectrum: ArrayView1<'_, f32>) -> Vec<u8> {
        let (lo, hi) = self.range;
        let span = (hi - lo).max(f32::EPSILON);
        let top = (self.levels - 1) as f32;
        spectrum
            .iter()
            .map(|&v| (((v - lo) / span).clamp(0.0, 1.0) * top).round() as u8)
            .collect()
    }

    /// Count every pixel of `image` inside `region` under its label.
    pub fn add_region(&mut self, image: &MultiImage, region: &Rect, labels: &LabelMap) {
        self.visit(image, region, |bins, (row, col), key| {
            bins.insert(label_at(labels, row, col), key);
        });
    }

    /// Remove every pixel of `image` inside `region`.
    pub fn sub_region(&mut self, image: &MultiImage, region: &Rect, labels: &LabelMap) {
        self.visit(image, region, |bins, (row, col), key| {
            bins.remove(label_at(labels, row, col), &key);
        });
    }

    /// Move the pixels of `region` whose label differs between `old` and
    /// `new` to their new label.
    pub fn relabel_region(
        &mut self,
        image: &MultiImage,
        region: &Rect,
        old: &LabelMap,
        new: &LabelMap,
    ) {
        self.visit(image, region, |bins, (row, col), key| {
            let (from, to) = (label_at(old, row, col), label_at(new, row, col));
            if from != to {
                bins.remove(from, &key);
                bins.insert(to, key);
            }
        });
    }

    fn insert(&mut self, label: LabelId, key: Vec<u8>) {
        *self.bins.entry(label).or_default().entry(key).or_insert(0) += 1;
        self.total += 1;
    }

    fn remove(&mut self, label: LabelId, key: &[u8]) {
        let Some(set) = self.bins.get_mut(&label) else {
            return;
        };
        let Some(count) = set.get_mut(key) else {
            return;
        };
        self.total -= 1;
        *count -= 1;
        if *count == 0 {
            set.remove(key);
            if set.is_empty() {
                self.bins.remove(&label);
            }
        }
    }

    /// Visit the pixels of `region`, passing absolute `(row, col)`.
    fn visit(
        &mut self,
        image: &MultiImage,
        region: &Rect,
        mut f: impl FnMut(&mut Self, (i32, i32), Vec<u8>),
    ) {
        let roi = image.roi();
        let local = region.intersect(&roi).relative_to(&roi);
        for row in local.y..local.bottom() {
            for col in local.x..local.right() {
                let key = self.key(image.spectrum(row as usize, col as usize));
                f(self, (roi.y + row, roi.x + col), key);
            }
        }
    }

    /// Number of occupied bins over all labels.
    pub fn len(&self) -> usize {
        self.bins.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Number of pixels counted.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Pixels in bin `key`, all labels together.
    pub fn count(&self, key: &[u8]) -> u32 {
        self.bins
            .values()
            .map(|set| set.get(key).copied().unwrap_or(0))
            .sum()
    }

    /// Pixels carrying `label`.
    pub fn label_total(&self, label: LabelId) -> u64 {
        self.bins
            .get(&label)
            .map_or(0, |set| set.values().map(|&c| u64::from(c)).sum())
    }

    /// Labels with at least one pixel, ascending.
    pub fn labels(&self) -> Vec<LabelId> {
        let mut labels: Vec<LabelId> = self.bins.keys().copied().collect();
        labels.sort_unstable();
        labels
    }

    pub fn range(&self) -> (f32, f32) {
        self.range
    }
}

/// Shared, lockable dataset passed between the controller's passes.
#[derive(Debug, Clone)]
pub struct DatasetHandle(Arc<Mutex<BinSet>>);

impl DatasetHandle {
    pub fn new(bins: BinSet) -> Self {
        Self(Arc::new(Mutex::new(bins)))
    }

    pub fn lock(&self) -> MutexGuard<'_, BinSet> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn same_dataset(&self, other: &DatasetHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Reference [`DistViewModel`].
///
/// A dataset becomes current for its representation as soon as the work
/// filling it is queued. Work on one dataset runs in submission order, so
/// a following `sub_image` always sees the regions of the latest ROI.
pub struct DistViewStore {
    queue: QueueHandle,
    mailbox: Mailbox,
    levels: u32,
    datasets: Rc<RefCell<HashMap<Representation, DatasetHandle>>>,
    /// Image slot each representation's dataset is built from
    sources: HashMap<Representation, SharedImage>,
    /// Labels the queued work counts with
    labels: Arc<LabelMap>,
}

impl DistViewStore {
    pub fn new(queue: QueueHandle, mailbox: Mailbox, levels: u32) -> Self {
        Self {
            queue,
            mailbox,
            levels,
            datasets: Rc::new(RefCell::new(HashMap::new())),
            sources: HashMap::new(),
            labels: Arc::new(Array2::zeros((0, 0))),
        }
    }

    fn register(&self, repr: Representation, dataset: DatasetHandle) {
        self.datasets.borrow_mut().insert(repr, dataset);
    }

    /// Callback announcing `dataset`. A dataset whose work did not finish is
    /// dropped so the next update rebuilds it.
    fn announce(
        &self,
        repr: Representation,
        dataset: DatasetHandle,
    ) -> impl FnOnce(TaskOutcome<()>) + 'static {
        let datasets = Rc::clone(&self.datasets);
        let mailbox = self.mailbox.clone();
        move |outcome| {
            match outcome {
                TaskOutcome::Finished(()) => {
                    mailbox.post(Notification::DistViewUpdated(repr));
                    return;
                }
                TaskOutcome::Failed(e) => log::warn!("Distribution of {} failed: {}", repr, e),
                TaskOutcome::Cancelled => log::debug!("Distribution of {} cancelled", repr),
            }
            let mut datasets = datasets.borrow_mut();
            if datasets
                .get(&repr)
                .is_some_and(|current| current.same_dataset(&dataset))
            {
                datasets.remove(&repr);
            }
        }
    }

    fn rebuild(&mut self, repr: Representation, image: SharedImage, roi: Rect) {
        self.sources.insert(repr, image.clone());
        let levels = self.levels;
        let labels = Arc::clone(&self.labels);
        let dataset = DatasetHandle::new(BinSet::new(levels, (0.0, 1.0)));
        self.register(repr, dataset.clone());

        let on_complete = self.announce(repr, dataset.clone());
        self.queue.submit(
            format!("bins {} {}", repr, roi),
            move |token| {
                let snapshot = image.load();
                token.check()?;
                let mut bins = BinSet::new(levels, snapshot.value_range());
                bins.add_region(&snapshot, &roi, &labels);
                *dataset.lock() = bins;
                Ok(())
            },
            on_complete,
        );
    }

    fn relabel(&mut self, labels: Arc<LabelMap>, region: Rect) {
        if Arc::ptr_eq(&self.labels, &labels) {
            return;
        }
        let old = std::mem::replace(&mut self.labels, labels);
        let current: Vec<(Representation, DatasetHandle)> = self
            .datasets
            .borrow()
            .iter()
            .map(|(repr, dataset)| (*repr, dataset.clone()))
            .collect();

        for (repr, dataset) in current {
            let Some(source) = self.sources.get(&repr).cloned() else {
                continue;
            };
            let old = Arc::clone(&old);
            let new = Arc::clone(&self.labels);
            let on_complete = self.announce(repr, dataset.clone());
            self.queue.submit(
                format!("labels {} {}", repr, region),
                move |token| {
                    token.check()?;
                    let snapshot = source.load();
                    dataset
                        .lock()
                        .relabel_region(&snapshot, &region, &old, &new);
                    Ok(())
                },
                on_complete,
            );
        }
    }
}

impl DistViewModel for DistViewStore {
    fn dataset(&self, repr: Representation) -> Option<DatasetHandle> {
        self.datasets.borrow().get(&repr).cloned()
    }

    fn set_image(&mut self, repr: Representation, image: SharedImage, roi: Rect) {
        self.rebuild(repr, image, roi);
    }

    fn add_image(
        &mut self,
        repr: Representation,
        dataset: Option<DatasetHandle>,
        add: &[Rect],
        roi: Rect,
    ) {
        let Some(source) = self.sources.get(&repr).cloned() else {
            log::warn!("No image for {} distribution, skipping update", repr);
            return;
        };
        let Some(dataset) = dataset else {
            self.rebuild(repr, source, roi);
            return;
        };
        self.register(repr, dataset.clone());

        let add = add.to_vec();
        let labels = Arc::clone(&self.labels);
        let on_complete = self.announce(repr, dataset.clone());
        self.queue.submit(
            format!("bins +{} {}", add.len(), repr),
            move |token| {
                let snapshot = source.load();
                let mut bins = dataset.lock();
                for region in &add {
                    token.check()?;
                    bins.add_region(&snapshot, region, &labels);
                }
                Ok(())
            },
            on_complete,
        );
    }

    fn sub_image(
        &mut self,
        repr: Representation,
        sub: &[Rect],
        _roi: Rect,
    ) -> Option<DatasetHandle> {
        let dataset = self.dataset(repr)?;
        let source = self.sources.get(&repr).cloned()?;

        let sub = sub.to_vec();
        let labels = Arc::clone(&self.labels);
        let handle = dataset.clone();
        self.queue.submit(
            format!("bins -{} {}", sub.len(), repr),
            move |token| {
                let snapshot = source.load();
                let mut bins = handle.lock();
                for region in &sub {
                    token.check()?;
                    bins.sub_region(&snapshot, region, &labels);
                }
                Ok(())
            },
            move |outcome: TaskOutcome<()>| {
                if let TaskOutcome::Failed(e) = outcome {
                    log::warn!("Removing regions from {} failed: {}", repr, e);
                }
            },
        );
        Some(dataset)
    }

    fn update_labels(&mut self, labels: Arc<LabelMap>) {
        let (rows, cols) = labels.dim();
        let (old_rows, old_cols) = self.labels.dim();
        let everything = Rect::from_size(cols.max(old_cols) as i32, rows.max(old_rows) as i32);
        self.relabel(labels, everything);
    }

    fn update_labels_partially(&mut self, labels: Arc<LabelMap>, region: Rect) {
        self.relabel(labels, region);
    }
}
