//! Helpers shared by the model tests.

use std::time::Duration;

use ndarray::Array3;
use specula_tasks::TaskQueue;

use crate::data::MultiImage;
use crate::geometry::Rect;
use crate::notify::{Mailbox, Notification};

/// Run callbacks until every submitted task has completed.
pub fn drain(queue: &TaskQueue) {
    let handle = queue.handle();
    while !handle.is_idle() {
        handle.dispatch_completions_timeout(Duration::from_millis(100));
    }
}

/// Smooth positive test image.
pub fn ramp(width: usize, height: usize, bands: usize) -> MultiImage {
    let pixels = Array3::from_shape_fn((height, width, bands), |(r, c, b)| {
        0.1 + (r * 7 + c * 3 + b) as f32 / 100.0
    });
    MultiImage::new(pixels, Vec::new(), Rect::from_size(width as i32, height as i32))
}

/// Everything posted so far.
pub fn collect(mailbox: &Mailbox) -> Vec<Notification> {
    std::iter::from_fn(|| mailbox.pop()).collect()
}
