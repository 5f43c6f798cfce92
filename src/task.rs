//! Defines the `Task` struct and related functionality.
//!
//! A `Task` wraps an asynchronous computation together with optional
//! completion callbacks. Handing it to [`Scheduler::run`] attaches it to the
//! event loop, which drives the computation step by step: every time it
//! suspends, control returns to the scheduler, and it is resumed on a later
//! dispatch step once whatever it waits on wakes it.
//!
//! When the computation finishes, exactly one of the following happens:
//! - success: the `on_done` callback receives the value,
//! - failure: the `on_error` callback receives the error, which is then
//!   reported to the diagnostics sink,
//! - cancellation: nothing is reported.
//!
//! This module also provides `TaskHandle`, which observes a running task and
//! requests its cancellation from any thread.
//!
//! [`Scheduler::run`]: crate::Scheduler::run

use std::{
    cell::{Cell, RefCell},
    fmt,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use futures::{
    FutureExt,
    task::{ArcWake, waker_ref},
};

use crate::{
    diagnostics::Diagnostics,
    error::{BoxError, Error, TaskError, panic_message},
    scheduler::SchedulerHandle,
};

/// A unique identifier for a task.
#[derive(Eq, PartialEq, Clone, Copy, Hash, Debug)]
pub struct TaskId(u64);

impl TaskId {
    fn generate() -> TaskId {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TaskId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a task.
///
/// A task starts `Pending`, becomes `Running` on its first poll and stays
/// there across suspensions, then settles in exactly one terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    Pending = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
    Cancelled = 4,
}

impl TaskStatus {
    /// Returns `true` for `Succeeded`, `Failed` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskStatus::Pending,
            1 => TaskStatus::Running,
            2 => TaskStatus::Succeeded,
            3 => TaskStatus::Failed,
            _ => TaskStatus::Cancelled,
        }
    }
}

// State shared between the scheduler's copy of a task and its handles.
struct TaskState {
    status: AtomicU8,
    cancel_requested: AtomicBool,
}

impl TaskState {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(TaskStatus::Pending as u8),
            cancel_requested: AtomicBool::new(false),
        }
    }

    fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: TaskStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

/// A handle for observing a task and requesting its cancellation.
///
/// The handle is `Send + Sync`, so it can be inspected or used to cancel the
/// task from any thread. Once the task is terminal its status never changes.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    state: Arc<TaskState>,
    scheduler: SchedulerHandle,
}

impl TaskHandle {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    /// Returns `true` once the task reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == TaskStatus::Cancelled
    }

    /// Requests cancellation of the task.
    ///
    /// The request is observed on the next dispatch step: the computation is
    /// dropped at the suspension point it is parked on and neither callback
    /// runs. A blocking call the task is waiting on keeps running on its
    /// worker thread; only the delivery of its result is discarded.
    ///
    /// Returns `false` if the task already finished or cancellation was
    /// already requested.
    pub fn cancel(&self) -> bool {
        if self.is_done() || self.state.cancel_requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.scheduler.wake(self.id);
        true
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

type Computation<T> = Pin<Box<dyn Future<Output = Result<T, TaskError>>>>;
type DoneCallback<T> = Box<dyn FnOnce(T)>;
type ErrorCallback = Box<dyn FnOnce(TaskError)>;

/// An asynchronous computation with optional completion callbacks.
///
/// The task itself does nothing until it is handed to [`Scheduler::run`].
///
/// # Example
/// ```
/// # use mainloop::{Config, Scheduler, Task};
/// #
/// let scheduler = Scheduler::new(Config::default()).unwrap();
/// let handle = scheduler.run(
///     Task::new(async { Ok::<_, std::io::Error>(42) })
///         .on_done(|value| assert_eq!(value, 42))
///         .on_error(|error| eprintln!("{error}")),
/// );
/// scheduler.run_until_complete(&handle);
/// ```
///
/// [`Scheduler::run`]: crate::Scheduler::run
pub struct Task<T> {
    computation: Computation<T>,
    on_done: Option<DoneCallback<T>>,
    on_error: Option<ErrorCallback>,
}

impl<T: 'static> Task<T> {
    /// Creates a task from a fallible computation.
    ///
    /// Returning `Err(Error::Cancelled)` ends the task as cancelled rather
    /// than failed, which is what `?` on a cancelled [`Deferred`] does.
    ///
    /// [`Deferred`]: crate::Deferred
    pub fn new<F, E>(computation: F) -> Self
    where
        F: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError>,
    {
        Self {
            computation: Box::pin(
                computation.map(|result| result.map_err(|e| TaskError::from_boxed(e.into()))),
            ),
            on_done: None,
            on_error: None,
        }
    }

    /// Creates a task from a computation that cannot return an error.
    ///
    /// It can still fail by panicking.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self {
            computation: Box::pin(future.map(Ok)),
            on_done: None,
            on_error: None,
        }
    }

    /// Sets the callback invoked with the value on success.
    #[must_use]
    pub fn on_done(mut self, f: impl FnOnce(T) + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    /// Sets the callback invoked with the error on failure, before the error
    /// is reported to the diagnostics sink.
    #[must_use]
    pub fn on_error(mut self, f: impl FnOnce(TaskError) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

// Object-safe view of a task for the scheduler's task table.
pub(crate) trait Runnable {
    // Polls the computation once. Returns `true` when the task is terminal.
    fn step(&self, diagnostics: &dyn Diagnostics) -> bool;

    fn abort(&self);
}

struct TaskWaker {
    id: TaskId,
    scheduler: SchedulerHandle,
    // Set while a poll for this task is queued, to coalesce wakes.
    scheduled: AtomicBool,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if !arc_self.scheduled.swap(true, Ordering::AcqRel) {
            arc_self.scheduler.wake(arc_self.id);
        }
    }
}

pub(crate) struct RawTask<T> {
    id: TaskId,
    state: Arc<TaskState>,
    waker: Arc<TaskWaker>,
    computation: RefCell<Option<Computation<T>>>,
    on_done: Cell<Option<DoneCallback<T>>>,
    on_error: Cell<Option<ErrorCallback>>,
}

impl<T: 'static> RawTask<T> {
    pub(crate) fn new(task: Task<T>, scheduler: SchedulerHandle) -> (Rc<Self>, TaskHandle) {
        let id = TaskId::generate();
        let state = Arc::new(TaskState::new());
        let handle = TaskHandle {
            id,
            state: Arc::clone(&state),
            scheduler: scheduler.clone(),
        };
        let raw = Rc::new(RawTask {
            id,
            state,
            waker: Arc::new(TaskWaker {
                id,
                scheduler,
                // The scheduler queues the first poll itself.
                scheduled: AtomicBool::new(true),
            }),
            computation: RefCell::new(Some(task.computation)),
            on_done: Cell::new(task.on_done),
            on_error: Cell::new(task.on_error),
        });
        (raw, handle)
    }

    fn poll_computation(&self) -> Option<Poll<Result<T, TaskError>>> {
        let mut slot = self.computation.borrow_mut();
        let computation = slot.as_mut()?;
        let waker = waker_ref(&self.waker);
        let mut cx = Context::from_waker(&waker);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| computation.as_mut().poll(&mut cx)));
        Some(match polled {
            Ok(poll) => poll,
            Err(payload) => Poll::Ready(Err(TaskError::Panicked(panic_message(payload)))),
        })
    }

    fn finish_cancelled(&self) {
        let computation = self.computation.borrow_mut().take();
        self.on_done.take();
        self.on_error.take();
        self.state.set_status(TaskStatus::Cancelled);
        // Drop outside the borrow; destructors may touch the scheduler.
        drop(computation);
        log::trace!(target: "mainloop", "task {} cancelled", self.id);
    }

    fn invoke_callback(&self, diagnostics: &dyn Diagnostics, callback: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
            diagnostics.log_exception(
                &format!("task {} callback", self.id),
                &Error::CallbackPanicked(panic_message(payload)),
            );
        }
    }
}

impl<T: 'static> Runnable for RawTask<T> {
    fn step(&self, diagnostics: &dyn Diagnostics) -> bool {
        self.waker.scheduled.store(false, Ordering::Release);
        if self.state.status().is_terminal() {
            return true;
        }
        if self.state.cancel_requested.load(Ordering::Acquire) {
            self.finish_cancelled();
            return true;
        }

        self.state.set_status(TaskStatus::Running);
        let outcome = match self.poll_computation() {
            Some(Poll::Ready(outcome)) => outcome,
            Some(Poll::Pending) => return false,
            None => return true,
        };
        // The computation is finished; release it before reporting.
        let finished = self.computation.borrow_mut().take();
        drop(finished);

        // Cancelled from inside its own last step.
        if self.state.cancel_requested.load(Ordering::Acquire) {
            self.finish_cancelled();
            return true;
        }

        match outcome {
            Ok(value) => {
                self.state.set_status(TaskStatus::Succeeded);
                log::trace!(target: "mainloop", "task {} succeeded", self.id);
                if let Some(on_done) = self.on_done.take() {
                    self.invoke_callback(diagnostics, || on_done(value));
                }
            }
            Err(error) if error.is_cancellation() => self.finish_cancelled(),
            Err(error) => {
                self.state.set_status(TaskStatus::Failed);
                if let Some(on_error) = self.on_error.take() {
                    let delivered = error.clone();
                    self.invoke_callback(diagnostics, || on_error(delivered));
                }
                diagnostics.log_exception(&format!("task {}", self.id), &Error::Task(error));
            }
        }
        self.on_done.take();
        self.on_error.take();
        true
    }

    fn abort(&self) {
        if self.state.status().is_terminal() {
            return;
        }
        self.state.cancel_requested.store(true, Ordering::Release);
        // While it is being polled, the step holding it drops it instead.
        if let Ok(mut slot) = self.computation.try_borrow_mut() {
            let computation = slot.take();
            drop(slot);
            drop(computation);
        }
        self.on_done.take();
        self.on_error.take();
        self.state.set_status(TaskStatus::Cancelled);
    }
}
