//! Single-worker background task queue.
//!
//! Tasks run one at a time, in submission order, on a dedicated thread.
//! Results travel back to the owning thread and are handed to completion
//! callbacks by [`QueueHandle::dispatch_completions`], so callbacks may touch
//! state that is not `Send`.

pub mod error;
pub mod queue;
pub mod token;

pub use error::{QueueError, Result, TaskError};
pub use queue::{QueueHandle, TaskId, TaskOutcome, TaskQueue};
pub use token::CancelToken;
