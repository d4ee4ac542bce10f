//! Reference graph segmentation: seeded region growing on the pixel grid.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use ndarray::Array2;
use specula_tasks::{CancelToken, QueueHandle, TaskError, TaskOutcome};

use super::{ImageUpdateListener, kernels};
use crate::data::{MultiImage, SharedImage};
use crate::model::{LabelId, Representation};
use crate::notify::{Mailbox, Notification, RequestSink};

/// Grow regions from `seeds` (ROI `(row, col)`) across 4-neighbours whose
/// spectra differ by at most `threshold`.
fn grow_regions(
    image: &MultiImage,
    seeds: &[(usize, usize)],
    threshold: f32,
    token: &CancelToken,
) -> Result<Array2<bool>, TaskError> {
    let (height, width) = (image.height(), image.width());
    let mut mask = Array2::from_elem((height, width), false);
    let mut frontier: VecDeque<(usize, usize)> = seeds
        .iter()
        .copied()
        .filter(|&(r, c)| r < height && c < width)
        .collect();
    for &(r, c) in &frontier {
        mask[[r, c]] = true;
    }

    let mut visited = 0usize;
    while let Some((r, c)) = frontier.pop_front() {
        visited += 1;
        if visited % 4096 == 0 {
            token.check()?;
        }
        let here = image.spectrum(r, c);
        let neighbours = [
            (r.wrapping_sub(1), c),
            (r + 1, c),
            (r, c.wrapping_sub(1)),
            (r, c + 1),
        ];
        for (nr, nc) in neighbours {
            if nr >= height || nc >= width || mask[[nr, nc]] {
                continue;
            }
            if kernels::spectral_distance(here, image.spectrum(nr, nc)) <= threshold {
                mask[[nr, nc]] = true;
                frontier.push_back((nr, nc));
            }
        }
    }
    Ok(mask)
}

#[derive(Default)]
struct SegmentationState {
    last: Option<Arc<Array2<bool>>>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct GraphSegmentation {
    queue: QueueHandle,
    mailbox: Mailbox,
    requests: RequestSink,
    source: SharedImage,
    threshold: f32,
    state: Rc<RefCell<SegmentationState>>,
}

impl GraphSegmentation {
    /// Segment the buffer in `source`, normally the `Img` slot.
    pub fn new(queue: QueueHandle, mailbox: Mailbox, source: SharedImage, threshold: f32) -> Self {
        Self {
            queue,
            requests: RequestSink::new(mailbox.clone()),
            mailbox,
            source,
            threshold,
            state: Rc::new(RefCell::new(SegmentationState::default())),
        }
    }

    /// Result of the last run, dropped when the image changes.
    pub fn last_result(&self) -> Option<Arc<Array2<bool>>> {
        self.state.borrow().last.clone()
    }

    /// Segment from `seeds` and ask for the segment to be labeled `label`.
    pub fn segment(&self, label: LabelId, seeds: Vec<(usize, usize)>) {
        let source = self.source.clone();
        let threshold = self.threshold;
        let requests = self.requests.clone();
        let mailbox = self.mailbox.clone();
        let state = Rc::clone(&self.state);

        self.queue.submit(
            format!("segment label {}", label),
            move |token| {
                let image = source.load();
                grow_regions(&image, &seeds, threshold, token)
            },
            move |outcome| match outcome {
                TaskOutcome::Finished(mask) => {
                    let pixels = mask.iter().filter(|&&m| m).count();
                    log::info!("Segmentation grew {} pixel(s)", pixels);
                    state.borrow_mut().last = Some(Arc::new(mask.clone()));
                    requests.alter_label(label, mask, false);
                    mailbox.post(Notification::SegmentationDone { pixels });
                }
                TaskOutcome::Failed(e) => log::warn!("Segmentation failed: {}", e),
                TaskOutcome::Cancelled => log::debug!("Segmentation cancelled"),
            },
        );
    }
}

impl ImageUpdateListener for GraphSegmentation {
    fn process_image_update(&mut self, repr: Representation) {
        if repr == Representation::Img && self.state.borrow_mut().last.take().is_some() {
            log::debug!("Image changed, dropping segmentation result");
        }
    }
}
