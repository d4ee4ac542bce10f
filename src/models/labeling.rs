//! Reference labeling model: one label index per source image pixel.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2, Axis, Slice};

use super::LabelingModel;
use crate::geometry::Rect;
use crate::model::{Label, LabelId, default_label_color};
use crate::notify::{Mailbox, Notification};

/// Label 0 marks unlabeled pixels.
pub const UNLABELED: LabelId = 0;

/// Label per pixel of the full image, `(row, col)`.
pub type LabelMap = Array2<LabelId>;

/// Label of absolute pixel `(row, col)`; pixels outside `labels` are unlabeled.
pub fn label_at(labels: &LabelMap, row: i32, col: i32) -> LabelId {
    if row < 0 || col < 0 {
        return UNLABELED;
    }
    labels
        .get((row as usize, col as usize))
        .copied()
        .unwrap_or(UNLABELED)
}

pub struct LabelingStore {
    mailbox: Mailbox,
    /// Shared with consumers as a snapshot; copied on write
    mask: Arc<LabelMap>,
    labels: Vec<Label>,
    roi: Rect,
}

impl LabelingStore {
    pub fn new(mailbox: Mailbox) -> Self {
        Self {
            mailbox,
            mask: Arc::new(Array2::zeros((0, 0))),
            labels: vec![Label::new(UNLABELED, default_label_color(UNLABELED))],
            roi: Rect::default(),
        }
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn roi(&self) -> Rect {
        self.roi
    }

    /// Labels of the current ROI.
    pub fn roi_mask(&self) -> ArrayView2<'_, LabelId> {
        let area = self.roi.intersect(&self.extent());
        self.mask
            .slice_axis(Axis(0), Slice::from(area.y as usize..area.bottom() as usize))
            .slice_axis_move(Axis(1), Slice::from(area.x as usize..area.right() as usize))
    }

    /// Number of pixels carrying `label` in the whole image.
    pub fn pixel_count(&self, label: LabelId) -> usize {
        self.mask.iter().filter(|&&l| l == label).count()
    }

    fn extent(&self) -> Rect {
        let (height, width) = self.mask.dim();
        Rect::from_size(width as i32, height as i32)
    }
}

impl LabelingModel for LabelingStore {
    fn set_dimensions(&mut self, width: usize, height: usize) {
        log::debug!("Labeling dimensions {}x{}", width, height);
        self.mask = Arc::new(Array2::zeros((height, width)));
        self.mailbox.post(Notification::LabelingChanged);
    }

    fn update_roi(&mut self, roi: Rect) {
        self.roi = roi;
        self.mailbox.post(Notification::LabelingChanged);
    }

    fn alter_label(&mut self, label: LabelId, mask: &Array2<bool>, negate: bool) {
        let area = self.roi.intersect(&self.extent());
        let (rows, cols) = mask.dim();
        if rows != area.height as usize || cols != area.width as usize {
            log::warn!(
                "Ignoring label mask of {}x{} for ROI {}",
                cols,
                rows,
                area
            );
            return;
        }

        let mut target = Arc::make_mut(&mut self.mask)
            .slice_axis_mut(Axis(0), Slice::from(area.y as usize..area.bottom() as usize))
            .slice_axis_move(Axis(1), Slice::from(area.x as usize..area.right() as usize));
        let mut changed = 0usize;
        ndarray::Zip::from(&mut target)
            .and(mask)
            .for_each(|current, &selected| {
                if !selected {
                    return;
                }
                if negate {
                    if *current == label {
                        *current = UNLABELED;
                        changed += 1;
                    }
                } else if *current != label {
                    *current = label;
                    changed += 1;
                }
            });

        log::debug!("Label {}: {} pixel(s) changed", label, changed);
        self.mailbox
            .post(Notification::PartialLabelUpdate { region: area });
    }

    fn add_label(&mut self) -> LabelId {
        let id = self.labels.iter().map(|l| l.id).max().unwrap_or(UNLABELED) + 1;
        self.labels.push(Label::new(id, default_label_color(id)));
        log::info!("Added label {}", id);
        self.mailbox.post(Notification::LabelingChanged);
        id
    }

    fn label_mask(&self) -> Arc<LabelMap> {
        Arc::clone(&self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::collect;
    use super::*;

    #[test]
    fn test_add_label_numbers_sequentially() {
        let mut labeling = LabelingStore::new(Mailbox::new());
        assert_eq!(labeling.add_label(), 1);
        assert_eq!(labeling.add_label(), 2);
        assert_eq!(labeling.labels().len(), 3);
        assert_ne!(labeling.labels()[1].color, labeling.labels()[2].color);
    }

    #[test]
    fn test_alter_label_in_roi_coordinates() {
        let mailbox = Mailbox::new();
        let mut labeling = LabelingStore::new(mailbox.clone());
        labeling.set_dimensions(10, 8);
        labeling.update_roi(Rect::new(2, 3, 4, 2));
        collect(&mailbox);

        let mut mask = Array2::from_elem((2, 4), false);
        mask[[1, 3]] = true;
        labeling.alter_label(1, &mask, false);

        assert_eq!(labeling.roi_mask()[[1, 3]], 1);
        assert_eq!(labeling.pixel_count(1), 1);
        assert!(matches!(
            collect(&mailbox).as_slice(),
            [Notification::PartialLabelUpdate { region }] if *region == Rect::new(2, 3, 4, 2)
        ));

        labeling.alter_label(1, &mask, true);
        assert_eq!(labeling.pixel_count(1), 0);
    }

    #[test]
    fn test_negate_leaves_other_labels() {
        let mut labeling = LabelingStore::new(Mailbox::new());
        labeling.set_dimensions(2, 2);
        labeling.update_roi(Rect::new(0, 0, 2, 2));
        let all = Array2::from_elem((2, 2), true);
        labeling.alter_label(2, &all, false);
        labeling.alter_label(1, &all, true);
        assert_eq!(labeling.pixel_count(2), 4);
    }

    #[test]
    fn test_mismatched_mask_is_ignored() {
        let mut labeling = LabelingStore::new(Mailbox::new());
        labeling.set_dimensions(4, 4);
        labeling.update_roi(Rect::new(0, 0, 4, 4));
        labeling.alter_label(1, &Array2::from_elem((2, 2), true), false);
        assert_eq!(labeling.pixel_count(1), 0);
    }

    #[test]
    fn test_label_mask_snapshot_is_stable() {
        let mut labeling = LabelingStore::new(Mailbox::new());
        labeling.set_dimensions(3, 2);
        labeling.update_roi(Rect::new(0, 0, 3, 2));
        let before = labeling.label_mask();
        labeling.update_roi(Rect::new(0, 0, 3, 2));
        assert!(Arc::ptr_eq(&before, &labeling.label_mask()));

        labeling.alter_label(1, &Array2::from_elem((2, 3), true), false);
        let after = labeling.label_mask();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.iter().filter(|&&l| l == 1).count(), 0);
        assert_eq!(label_at(&after, 1, 2), 1);
        assert_eq!(label_at(&after, 5, 5), UNLABELED);
    }
}
