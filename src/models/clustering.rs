//! Reference clustering: k-means over the spectra of the ROI.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use specula_tasks::{CancelToken, QueueHandle, TaskError, TaskOutcome};

use super::{ImageUpdateListener, kernels};
use crate::data::{MultiImage, SharedImage};
use crate::model::Representation;
use crate::notify::{Mailbox, Notification};

/// Cluster index per ROI pixel, `(row, col)`.
pub type Assignments = Array2<u16>;

fn kmeans(
    image: &MultiImage,
    clusters: usize,
    iterations: usize,
    token: &CancelToken,
) -> Result<Assignments, TaskError> {
    let (height, width, bands) = image.pixels().dim();
    let count = height * width;
    if count == 0 {
        return Ok(Array2::zeros((height, width)));
    }
    let k = clusters.clamp(1, count.min(usize::from(u16::MAX)));
    let spectrum = move |i: usize| image.spectrum(i / width, i % width);

    // Evenly spaced pixels as initial centers
    let mut centers: Vec<Array1<f32>> = (0..k).map(|j| spectrum(j * count / k).to_owned()).collect();
    let mut labels = vec![0u16; count];

    for iteration in 0..iterations.max(1) {
        token.check()?;
        let mut changed = false;
        for (i, label) in labels.iter_mut().enumerate() {
            let s = spectrum(i);
            let nearest = centers
                .iter()
                .enumerate()
                .map(|(j, c)| (j, kernels::spectral_distance(s, c.view())))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(j, _)| j as u16)
                .unwrap_or(0);
            if *label != nearest {
                *label = nearest;
                changed = true;
            }
        }

        let mut sums = vec![Array1::<f32>::zeros(bands); k];
        let mut sizes = vec![0usize; k];
        for (i, &label) in labels.iter().enumerate() {
            sums[label as usize] += &spectrum(i);
            sizes[label as usize] += 1;
        }
        for ((center, sum), size) in centers.iter_mut().zip(sums).zip(sizes) {
            if size > 0 {
                *center = sum / size as f32;
            }
        }

        if !changed && iteration > 0 {
            log::trace!("k-means converged after {} iteration(s)", iteration + 1);
            break;
        }
    }

    Array2::from_shape_vec((height, width), labels).map_err(|e| TaskError::failed(e.to_string()))
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Clustering {
    queue: QueueHandle,
    mailbox: Mailbox,
    source: SharedImage,
    clusters: usize,
    iterations: usize,
    result: Rc<RefCell<Option<Arc<Assignments>>>>,
}

impl Clustering {
    pub fn new(
        queue: QueueHandle,
        mailbox: Mailbox,
        source: SharedImage,
        clusters: usize,
        iterations: usize,
    ) -> Self {
        Self {
            queue,
            mailbox,
            source,
            clusters,
            iterations,
            result: Rc::new(RefCell::new(None)),
        }
    }

    pub fn assignments(&self) -> Option<Arc<Assignments>> {
        self.result.borrow().clone()
    }

    /// Cluster the current buffer in the background.
    pub fn run(&self) {
        let source = self.source.clone();
        let (clusters, iterations) = (self.clusters, self.iterations);
        let result = Rc::clone(&self.result);
        let mailbox = self.mailbox.clone();

        self.queue.submit(
            format!("k-means k={}", clusters),
            move |token| kmeans(&source.load(), clusters, iterations, token),
            move |outcome| match outcome {
                TaskOutcome::Finished(assignments) => {
                    let found = assignments.iter().copied().max().map_or(0, |m| m as usize + 1);
                    *result.borrow_mut() = Some(Arc::new(assignments));
                    mailbox.post(Notification::ClusteringDone { clusters: found });
                }
                TaskOutcome::Failed(e) => log::warn!("Clustering failed: {}", e),
                TaskOutcome::Cancelled => log::debug!("Clustering cancelled"),
            },
        );
    }
}

impl ImageUpdateListener for Clustering {
    fn process_image_update(&mut self, repr: Representation) {
        if repr == Representation::Img {
            self.result.borrow_mut().take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{collect, drain};
    use super::*;
    use crate::geometry::Rect;
    use ndarray::Array3;
    use specula_tasks::TaskQueue;

    fn stripes() -> MultiImage {
        // three vertical stripes with distinct spectra
        let pixels = Array3::from_shape_fn((4, 9, 3), |(_, c, b)| {
            let stripe = c / 3;
            if b == stripe { 1.0 } else { 0.0 }
        });
        MultiImage::new(pixels, Vec::new(), Rect::from_size(9, 4))
    }

    #[test]
    fn test_kmeans_separates_stripes() {
        let labels = kmeans(&stripes(), 3, 10, &CancelToken::new()).unwrap();
        for col in 0..9 {
            for row in 0..4 {
                assert_eq!(labels[[row, col]], labels[[0, (col / 3) * 3]]);
            }
        }
        assert_ne!(labels[[0, 0]], labels[[0, 3]]);
        assert_ne!(labels[[0, 3]], labels[[0, 6]]);
        assert_ne!(labels[[0, 0]], labels[[0, 6]]);
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            kmeans(&stripes(), 3, 10, &token).unwrap_err(),
            TaskError::Cancelled
        );
    }

    #[test]
    fn test_run_reports_and_resets() {
        let queue = TaskQueue::spawn("test-clustering").unwrap();
        let mailbox = Mailbox::new();
        let mut clustering = Clustering::new(
            queue.handle().clone(),
            mailbox.clone(),
            SharedImage::new(stripes()),
            3,
            10,
        );

        clustering.run();
        drain(&queue);
        assert!(matches!(
            collect(&mailbox).as_slice(),
            [Notification::ClusteringDone { clusters: 3 }]
        ));
        assert_eq!(clustering.assignments().unwrap().dim(), (4, 9));

        clustering.process_image_update(Representation::Grad);
        assert!(clustering.assignments().is_some());
        clustering.process_image_update(Representation::Img);
        assert!(clustering.assignments().is_none());
    }
}
