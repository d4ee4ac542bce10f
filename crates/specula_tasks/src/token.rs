//! Cooperative cancellation flag shared between the queue and a task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TaskError;

/// Cancellation flag handed to every task.
///
/// The queue sets it when the task is cancelled while queued or running.
/// Long-running work should poll [`CancelToken::check`] between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(TaskError::Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}
