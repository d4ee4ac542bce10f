//! FIFO task queue drained by one worker thread.
//!
//! The queue is split in two halves:
//! - the worker thread, which pops jobs and runs them in submission order,
//! - the owning thread, which submits jobs, cancels them and runs completion
//!   callbacks when it calls [`QueueHandle::dispatch_completions`].
//!
//! Callbacks never run on the worker. A task that is cancelled at any point
//! before its callback runs (queued, running, or finished but not yet
//! dispatched) reports [`TaskOutcome::Cancelled`], even if its work function
//! returned a value.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use web_time::Instant;

use crate::error::{Result, TaskError};
use crate::token::CancelToken;

/// Identifier handed out by [`QueueHandle::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result delivered to a completion callback.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The task ran to completion and was not cancelled.
    Finished(T),
    /// The task returned an error or panicked.
    Failed(TaskError),
    /// The task was cancelled before or while running.
    Cancelled,
}

impl<T> TaskOutcome<T> {
    /// The success flag seen by completion callbacks.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Finished(_))
    }

    pub fn into_result(self) -> std::result::Result<T, TaskError> {
        match self {
            TaskOutcome::Finished(value) => Ok(value),
            TaskOutcome::Failed(err) => Err(err),
            TaskOutcome::Cancelled => Err(TaskError::Cancelled),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskOutcome<U> {
        match self {
            TaskOutcome::Finished(value) => TaskOutcome::Finished(f(value)),
            TaskOutcome::Failed(err) => TaskOutcome::Failed(err),
            TaskOutcome::Cancelled => TaskOutcome::Cancelled,
        }
    }
}

type AnyResult = Box<dyn Any + Send>;
type Work = Box<dyn FnOnce(&CancelToken) -> std::result::Result<AnyResult, TaskError> + Send>;
type Callback = Box<dyn FnOnce(TaskOutcome<AnyResult>)>;

/// A queued unit of work.
struct Job {
    id: TaskId,
    name: String,
    token: CancelToken,
    work: Work,
}

/// Message sent from the worker back to the owning thread.
struct Finished {
    id: TaskId,
    outcome: TaskOutcome<AnyResult>,
}

/// Queue state guarded by the mutex.
#[derive(Default)]
struct State {
    jobs: VecDeque<Job>,
    halted: bool,
}

/// State shared with the worker thread.
#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Callback waiting for its task to finish.
struct Pending {
    name: String,
    /// Shared with the job; checked again when the outcome is dispatched
    token: CancelToken,
    callback: Callback,
}

struct Inner {
    shared: Arc<Shared>,
    results: Receiver<Finished>,
    pending: RefCell<HashMap<TaskId, Pending>>,
    /// Outcomes decided on this thread (cancelled while queued), delivered on
    /// the next dispatch so callbacks never run inside `cancel*`.
    deferred: RefCell<VecDeque<Finished>>,
    next_id: Cell<u64>,
}

/// Cloneable handle for submitting and cancelling work.
///
/// Handles are tied to the thread that owns the [`TaskQueue`].
#[derive(Clone)]
pub struct QueueHandle {
    inner: Rc<Inner>,
}

impl QueueHandle {
    /// Queue `work` to run on the worker thread.
    ///
    /// `on_complete` runs on this thread during a later
    /// [`dispatch_completions`](Self::dispatch_completions) call, exactly once,
    /// whatever the outcome.
    pub fn submit<T, W, C>(&self, name: impl Into<String>, work: W, on_complete: C) -> TaskId
    where
        T: Send + 'static,
        W: FnOnce(&CancelToken) -> std::result::Result<T, TaskError> + Send + 'static,
        C: FnOnce(TaskOutcome<T>) + 'static,
    {
        let id = TaskId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        let name = name.into();

        let work: Work = Box::new(move |token| work(token).map(|value| Box::new(value) as AnyResult));
        let callback: Callback = Box::new(move |outcome: TaskOutcome<AnyResult>| {
            let typed = match outcome {
                TaskOutcome::Finished(value) => match value.downcast::<T>() {
                    Ok(value) => TaskOutcome::Finished(*value),
                    Err(_) => TaskOutcome::Failed(TaskError::failed("result type mismatch")),
                },
                TaskOutcome::Failed(err) => TaskOutcome::Failed(err),
                TaskOutcome::Cancelled => TaskOutcome::Cancelled,
            };
            on_complete(typed);
        });

        let token = CancelToken::new();
        self.inner.pending.borrow_mut().insert(
            id,
            Pending {
                name: name.clone(),
                token: token.clone(),
                callback,
            },
        );

        let mut state = self.inner.shared.lock();
        if state.halted {
            drop(state);
            log::warn!("Task queue halted, dropping task {} ({})", id, name);
            self.defer_cancelled(id);
            return id;
        }
        log::trace!("Queued task {} ({})", id, name);
        state.jobs.push_back(Job {
            id,
            name,
            token,
            work,
        });
        drop(state);
        self.inner.shared.available.notify_one();
        id
    }

    /// Cancel one task. A queued task is removed; a running or finished task
    /// is flagged and its result discarded. Returns false once the callback
    /// has run or if the task is unknown.
    pub fn cancel(&self, id: TaskId) -> bool {
        let token = match self.inner.pending.borrow().get(&id) {
            Some(pending) => pending.token.clone(),
            None => return false,
        };
        token.cancel();

        let mut state = self.inner.shared.lock();
        if let Some(pos) = state.jobs.iter().position(|job| job.id == id) {
            state.jobs.remove(pos);
            drop(state);
            self.defer_cancelled(id);
        }
        true
    }

    /// Cancel every task whose callback has not run yet.
    ///
    /// Returns the number of tasks affected.
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for pending in self.inner.pending.borrow().values() {
            if !pending.token.is_cancelled() {
                pending.token.cancel();
                count += 1;
            }
        }

        let drained: Vec<TaskId> = {
            let mut state = self.inner.shared.lock();
            state.jobs.drain(..).map(|job| job.id).collect()
        };
        for id in drained {
            self.defer_cancelled(id);
        }
        if count > 0 {
            log::debug!("Cancelled {} background task(s)", count);
        }
        count
    }

    /// Run callbacks for every task that finished since the last call.
    ///
    /// Never blocks. Returns the number of callbacks run.
    pub fn dispatch_completions(&self) -> usize {
        let mut count = 0;
        while let Some(finished) = self.next_finished() {
            count += self.complete(finished);
        }
        count
    }

    /// Like [`dispatch_completions`](Self::dispatch_completions), but waits up
    /// to `timeout` for the first result if none is ready.
    pub fn dispatch_completions_timeout(&self, timeout: Duration) -> usize {
        if let Some(finished) = self.next_finished() {
            return self.complete(finished) + self.dispatch_completions();
        }
        match self.inner.results.recv_timeout(timeout) {
            Ok(finished) => self.complete(finished) + self.dispatch_completions(),
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("Task worker disconnected");
                0
            }
        }
    }

    /// Number of submitted tasks whose callback has not run yet.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0
    }

    /// Stop accepting work, cancel everything and wake the worker so it exits.
    fn halt(&self) {
        self.cancel_all();
        self.inner.shared.lock().halted = true;
        self.inner.shared.available.notify_all();
    }

    fn defer_cancelled(&self, id: TaskId) {
        self.inner.deferred.borrow_mut().push_back(Finished {
            id,
            outcome: TaskOutcome::Cancelled,
        });
    }

    fn next_finished(&self) -> Option<Finished> {
        if let Some(finished) = self.inner.deferred.borrow_mut().pop_front() {
            return Some(finished);
        }
        match self.inner.results.try_recv() {
            Ok(finished) => Some(finished),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    fn complete(&self, finished: Finished) -> usize {
        // Release the borrow before the callback runs: it may submit more work.
        let pending = self.inner.pending.borrow_mut().remove(&finished.id);
        match pending {
            Some(pending) => {
                let outcome = match finished.outcome {
                    TaskOutcome::Finished(_) if pending.token.is_cancelled() => {
                        TaskOutcome::Cancelled
                    }
                    outcome => outcome,
                };
                log::trace!(
                    "Completing task {} ({}): success={}",
                    finished.id,
                    pending.name,
                    outcome.is_success()
                );
                (pending.callback)(outcome);
                1
            }
            None => {
                log::warn!("Completion for unknown task {}", finished.id);
                0
            }
        }
    }
}

/// Owner of the worker thread.
///
/// Dropping the queue cancels all outstanding work and joins the worker, so
/// every exit path shuts the thread down.
pub struct TaskQueue {
    handle: QueueHandle,
    worker: Option<JoinHandle<()>>,
}

impl TaskQueue {
    /// Spawn the worker thread.
    pub fn spawn(thread_name: &str) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let (result_tx, result_rx) = mpsc::channel::<Finished>();

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                log::info!("Background task worker started");
                Self::worker_loop(&worker_shared, &result_tx);
                log::info!("Background task worker exiting");
            })?;

        Ok(Self {
            handle: QueueHandle {
                inner: Rc::new(Inner {
                    shared,
                    results: result_rx,
                    pending: RefCell::new(HashMap::new()),
                    deferred: RefCell::new(VecDeque::new()),
                    next_id: Cell::new(0),
                }),
            },
            worker: Some(worker),
        })
    }

    /// Handle for components that submit work.
    pub fn handle(&self) -> &QueueHandle {
        &self.handle
    }

    fn worker_loop(shared: &Shared, result_tx: &Sender<Finished>) {
        loop {
            let job = {
                let mut state = shared.lock();
                loop {
                    if state.halted {
                        return;
                    }
                    if let Some(job) = state.jobs.pop_front() {
                        break job;
                    }
                    state = shared
                        .available
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };

            let Job {
                id,
                name,
                token,
                work,
            } = job;
            let started = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| work(&token)));
            let outcome = match result {
                Ok(Ok(_)) if token.is_cancelled() => TaskOutcome::Cancelled,
                Ok(Ok(value)) => TaskOutcome::Finished(value),
                Ok(Err(TaskError::Cancelled)) => TaskOutcome::Cancelled,
                Ok(Err(err)) => TaskOutcome::Failed(err),
                Err(payload) => TaskOutcome::Failed(TaskError::Panicked(panic_message(&*payload))),
            };
            log::debug!(
                "Task {} ({}) done in {:.1?}: {}",
                id,
                name,
                started.elapsed(),
                match &outcome {
                    TaskOutcome::Finished(_) => "finished".to_string(),
                    TaskOutcome::Failed(err) => err.to_string(),
                    TaskOutcome::Cancelled => "cancelled".to_string(),
                }
            );

            if result_tx.send(Finished { id, outcome }).is_err() {
                log::warn!("Result channel closed, task worker exiting");
                return;
            }
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        log::debug!("Shutting down background task queue");
        self.handle.halt();

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.join() {
                log::warn!("Task worker panicked: {:?}", e);
            }
        }

        // Every callback runs once, so none keeps its captures alive past here.
        self.handle.dispatch_completions();
        let leftover: Vec<Pending> = self
            .handle
            .inner
            .pending
            .borrow_mut()
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        for pending in leftover {
            (pending.callback)(TaskOutcome::Cancelled);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
