//! Reference false-color model: one cached RGB rendering per variant.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use image::RgbImage;
use specula_tasks::{QueueHandle, TaskError, TaskId, TaskOutcome};

use super::{FalseColorModel, ImageModel, kernels};
use crate::data::SharedImage;
use crate::model::{FalseColoring, Representation};
use crate::notify::{Mailbox, Notification};

/// Computation in flight for a variant.
#[derive(Debug, Clone, Copy)]
struct Pending {
    id: TaskId,
    ticket: u64,
}

#[derive(Default)]
struct ColorState {
    cache: HashMap<FalseColoring, Arc<RgbImage>>,
    pending: HashMap<FalseColoring, Pending>,
    next_ticket: u64,
}

/// Reference [`FalseColorModel`].
pub struct FalseColorCache {
    queue: QueueHandle,
    mailbox: Mailbox,
    sources: HashMap<Representation, SharedImage>,
    state: Rc<RefCell<ColorState>>,
}

impl FalseColorCache {
    /// Read basis buffers from the slots of `image`.
    pub fn new(queue: QueueHandle, mailbox: Mailbox, image: &dyn ImageModel) -> Self {
        let sources = FalseColoring::all()
            .iter()
            .map(|variant| (variant.basis(), image.image(variant.basis())))
            .collect();
        Self {
            queue,
            mailbox,
            sources,
            state: Rc::new(RefCell::new(ColorState::default())),
        }
    }

    /// Cached rendering of `variant`.
    pub fn cached(&self, variant: FalseColoring) -> Option<Arc<RgbImage>> {
        self.state.borrow().cache.get(&variant).cloned()
    }

    pub fn is_pending(&self, variant: FalseColoring) -> bool {
        self.state.borrow().pending.contains_key(&variant)
    }

    fn render(variant: FalseColoring, source: &SharedImage) -> Result<Arc<RgbImage>, TaskError> {
        let image = source.load();
        if image.is_empty() {
            return Err(TaskError::failed(format!("no {} data", variant.basis())));
        }
        let rgb = match variant {
            FalseColoring::Cmf => kernels::true_color(&image),
            FalseColoring::Pca | FalseColoring::PcaGrad => kernels::pca_color(&image),
            FalseColoring::Som | FalseColoring::SomGrad => kernels::angle_color(&image),
        };
        Ok(Arc::new(rgb))
    }
}

impl FalseColorModel for FalseColorCache {
    fn request_coloring(&mut self, variant: FalseColoring, recalc: bool) {
        if !recalc {
            if let Some(image) = self.cached(variant) {
                self.mailbox
                    .post(Notification::ColoringReady { variant, image });
                return;
            }
            if self.is_pending(variant) {
                log::trace!("{} already being computed", variant);
                return;
            }
        } else {
            self.cancel_computation(variant);
        }

        let source = self.sources.get(&variant.basis()).cloned().unwrap_or_default();
        let ticket = {
            let mut state = self.state.borrow_mut();
            state.next_ticket += 1;
            state.next_ticket
        };
        let state = Rc::clone(&self.state);
        let mailbox = self.mailbox.clone();
        let id = self.queue.submit(
            format!("false color {}", variant),
            move |token| {
                token.check()?;
                Self::render(variant, &source)
            },
            move |outcome| {
                let mut state = state.borrow_mut();
                if state.pending.get(&variant).map(|p| p.ticket) == Some(ticket) {
                    state.pending.remove(&variant);
                }
                match outcome {
                    TaskOutcome::Finished(image) => {
                        state.cache.insert(variant, Arc::clone(&image));
                        drop(state);
                        mailbox.post(Notification::ColoringReady { variant, image });
                    }
                    TaskOutcome::Failed(e) => log::warn!("False color {} failed: {}", variant, e),
                    TaskOutcome::Cancelled => {}
                }
            },
        );
        self.state
            .borrow_mut()
            .pending
            .insert(variant, Pending { id, ticket });
    }

    fn cancel_computation(&mut self, variant: FalseColoring) {
        let pending = self.state.borrow_mut().pending.remove(&variant);
        if let Some(pending) = pending {
            log::debug!("Cancelling {} computation", variant);
            self.queue.cancel(pending.id);
        }
    }

    fn process_image_update(&mut self, repr: Representation) {
        let stale: Vec<FalseColoring> = FalseColoring::all()
            .iter()
            .copied()
            .filter(|variant| variant.is_based_on(repr))
            .collect();
        self.state
            .borrow_mut()
            .cache
            .retain(|variant, _| !variant.is_based_on(repr));
        for variant in stale {
            self.cancel_computation(variant);
        }
    }
}
