//! Provides the `Scheduler`, a cooperative event loop driven by the host's pump.
//!
//! The scheduler never spins its own thread. The host calls
//! [`Scheduler::run_once`] from its privileged thread, on every pump tick or
//! whenever [`Scheduler::next_deadline`] says a delayed call is due. Each
//! dispatch step:
//!
//! 1. moves everything posted from other threads into the ready queue,
//! 2. runs the callbacks that were ready when the step began, in FIFO order,
//! 3. fires the delayed calls whose due time has passed, in due-time order
//!    with ties broken by scheduling order.
//!
//! Every callback runs to completion before the next one starts. A panicking
//! callback is reported to the [`Diagnostics`] sink and the step carries on.
//!
//! `Scheduler` is `!Send`: it can only be used on the thread that created it,
//! which becomes the privileged thread. Other threads talk to it through a
//! [`SchedulerHandle`].

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, VecDeque},
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};

// Due time used for delays too long to be represented by an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

use crate::{
    config::Config,
    deferred::Deferred,
    diagnostics::{Diagnostics, LogDiagnostics},
    error::{BoxError, Error, WrongThreadError, panic_message},
    executor::Executor,
    guard::MainThread,
    task::{RawTask, Runnable, Task, TaskHandle, TaskId},
};

/// A handle for cancelling a scheduled callback before it runs.
///
/// Cancelling a callback that already ran has no effect.
#[derive(Clone, Debug, Default)]
pub struct CallHandle {
    cancelled: Arc<AtomicBool>,
}

impl CallHandle {
    fn new() -> Self {
        Self::default()
    }

    fn cancelled() -> Self {
        let handle = Self::new();
        handle.cancel();
        handle
    }

    /// Prevents the callback from running if it has not run yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// Work posted through the cross-thread channel.
pub(crate) enum Message {
    Call(CallHandle, Box<dyn FnOnce() + Send>),
    Poll(TaskId),
}

// Work in the privileged thread's ready queue.
enum Entry {
    Call(CallHandle, Box<dyn FnOnce()>),
    Poll(TaskId),
}

impl From<Message> for Entry {
    fn from(message: Message) -> Self {
        match message {
            Message::Call(handle, callback) => Entry::Call(handle, callback),
            Message::Poll(id) => Entry::Poll(id),
        }
    }
}

struct DelayedCall {
    handle: CallHandle,
    callback: Box<dyn FnOnce()>,
}

/// The cross-thread face of a [`Scheduler`].
///
/// This is the only way other threads reach the privileged thread: everything
/// sent through it is queued and executed by a later dispatch step, in the
/// order it was posted.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: Sender<Message>,
    main: MainThread,
}

impl SchedulerHandle {
    /// Posts `callback` to run on the privileged thread.
    ///
    /// Safe to call from any thread, including the privileged thread itself.
    /// If the scheduler is gone the callback is dropped and the returned
    /// handle is already cancelled.
    pub fn call_soon_threadsafe(&self, callback: impl FnOnce() + Send + 'static) -> CallHandle {
        let handle = CallHandle::new();
        if self
            .sender
            .send(Message::Call(handle.clone(), Box::new(callback)))
            .is_err()
        {
            log::debug!(target: "mainloop", "scheduler is gone, discarding posted callback");
            handle.cancel();
        }
        handle
    }

    /// Returns the privileged thread this handle posts to.
    #[must_use]
    pub fn main_thread(&self) -> MainThread {
        self.main
    }

    pub(crate) fn wake(&self, id: TaskId) {
        if self.sender.send(Message::Poll(id)).is_err() {
            log::trace!(target: "mainloop", "scheduler is gone, dropping wake for task {id}");
        }
    }
}

struct Inner {
    main: MainThread,
    ready: RefCell<VecDeque<Entry>>,
    delayed: RefCell<BTreeMap<(Instant, u64), DelayedCall>>,
    tasks: RefCell<HashMap<TaskId, Rc<dyn Runnable>>>,
    sequence: Cell<u64>,
    dispatching: Cell<bool>,
    closed: Cell<bool>,
    receiver: Receiver<Message>,
    handle: SchedulerHandle,
    executor: Executor,
    diagnostics: Arc<dyn Diagnostics>,
}

/// A single-threaded cooperative event loop.
///
/// Cloning a `Scheduler` yields another reference to the same loop, which is
/// how task computations get hold of it to sleep, spawn or offload work.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl Scheduler {
    /// Creates a scheduler on the calling thread, which becomes the privileged
    /// thread. Failures are reported through [`LogDiagnostics`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an invalid `config` and
    /// [`Error::PoolCreation`] if the worker threads cannot be started.
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::with_diagnostics(config, Arc::new(LogDiagnostics))
    }

    /// Creates a scheduler that reports failures to `diagnostics`.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::new`].
    pub fn with_diagnostics(
        config: Config,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let (sender, receiver) = crossbeam_channel::unbounded();
        let main = MainThread::current();
        let handle = SchedulerHandle { sender, main };
        let executor = Executor::new(&config, handle.clone())?;

        Ok(Scheduler {
            inner: Rc::new(Inner {
                main,
                ready: RefCell::new(VecDeque::with_capacity(16)),
                delayed: RefCell::new(BTreeMap::new()),
                tasks: RefCell::new(HashMap::with_capacity(8)),
                sequence: Cell::new(0),
                dispatching: Cell::new(false),
                closed: Cell::new(false),
                receiver,
                handle,
                executor,
                diagnostics,
            }),
        })
    }

    /// Returns a [`SchedulerHandle`] for posting work from other threads.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.inner.handle.clone()
    }

    /// Returns the guard for the privileged thread this scheduler runs on.
    #[must_use]
    pub fn main_thread(&self) -> MainThread {
        self.inner.main
    }

    /// Returns `true` if called on the privileged thread.
    #[must_use]
    pub fn is_main_thread(&self) -> bool {
        self.inner.main.is_main_thread()
    }

    /// Fails unless called on the privileged thread.
    ///
    /// # Errors
    ///
    /// Returns [`WrongThreadError`] when invoked from any other thread.
    pub fn assert_main_thread(&self) -> Result<(), WrongThreadError> {
        self.inner.main.assert_main_thread()
    }

    /// Returns the worker pool bridge.
    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    /// Appends `callback` to the ready queue.
    ///
    /// The callback runs on a later dispatch step, never inside this call.
    pub fn schedule_immediate(&self, callback: impl FnOnce() + 'static) -> CallHandle {
        if self.is_closed() {
            log::warn!(target: "mainloop", "schedule_immediate on a closed scheduler");
            return CallHandle::cancelled();
        }
        let handle = CallHandle::new();
        self.inner
            .ready
            .borrow_mut()
            .push_back(Entry::Call(handle.clone(), Box::new(callback)));
        handle
    }

    /// Schedules `callback` to run once `delay` has elapsed.
    ///
    /// The callback fires at or after the due time, never before, and never if
    /// the returned handle is cancelled first. A cancelled call is discarded
    /// and no longer counts as pending work. Delays too long to be measured
    /// are treated as roughly thirty years.
    pub fn schedule_after_delay(
        &self,
        delay: Duration,
        callback: impl FnOnce() + 'static,
    ) -> CallHandle {
        if self.is_closed() {
            log::warn!(target: "mainloop", "schedule_after_delay on a closed scheduler");
            return CallHandle::cancelled();
        }
        let handle = CallHandle::new();
        let now = Instant::now();
        let due = now
            .checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        let sequence = self.inner.sequence.get();
        self.inner.sequence.set(sequence + 1);
        self.inner.delayed.borrow_mut().insert(
            (due, sequence),
            DelayedCall {
                handle: handle.clone(),
                callback: Box::new(callback),
            },
        );
        handle
    }

    /// Allocates an unresolved [`Deferred`] bound to this scheduler.
    #[must_use]
    pub fn create_future<T: Send + Sync + 'static>(&self) -> Deferred<T> {
        Deferred::new(self.inner.handle.clone())
    }

    /// Returns a [`Deferred`] that resolves after `delay`.
    ///
    /// Cancelling the returned cell, or dropping every handle to it without
    /// registering a continuation, discards the underlying delayed call.
    pub fn sleep(&self, delay: Duration) -> Deferred<()> {
        let deferred = self.create_future();
        let resolver = deferred.clone();
        let timer = self.schedule_after_delay(delay, move || {
            if resolver.resolve(()).is_err() {
                log::debug!(target: "mainloop", "sleep already resolved, timer discarded");
            }
        });
        deferred.bind_timer(timer);
        deferred
    }

    /// Runs `func` on the worker pool. See [`Executor::run_in_executor`].
    pub fn run_in_executor<T, F>(&self, func: F) -> Deferred<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + Sync + 'static,
    {
        self.inner.executor.run_in_executor(func)
    }

    /// Runs fallible `func` on the worker pool. See
    /// [`Executor::try_run_in_executor`].
    pub fn try_run_in_executor<T, E, F>(&self, func: F) -> Deferred<T>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<BoxError>,
        T: Send + Sync + 'static,
    {
        self.inner.executor.try_run_in_executor(func)
    }

    /// Attaches `task` to the scheduler and returns a handle to observe it.
    ///
    /// The computation is first polled on a later dispatch step. Its callbacks
    /// run on the privileged thread, at most one of them, exactly once.
    pub fn run<T: 'static>(&self, task: Task<T>) -> TaskHandle {
        let (raw, handle) = RawTask::new(task, self.inner.handle.clone());
        if self.is_closed() {
            log::warn!(target: "mainloop", "task {} submitted to a closed scheduler", handle.id());
            raw.abort();
            return handle;
        }
        log::trace!(target: "mainloop", "spawn task {}", handle.id());
        self.inner.tasks.borrow_mut().insert(handle.id(), raw);
        self.inner
            .ready
            .borrow_mut()
            .push_back(Entry::Poll(handle.id()));
        handle
    }

    /// Fire-and-forget variant of [`Scheduler::run`] without callbacks.
    ///
    /// Failures are only reported to the diagnostics sink.
    pub fn spawn<T, E, F>(&self, computation: F) -> TaskHandle
    where
        F: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError>,
        T: 'static,
    {
        self.run(Task::new(computation))
    }

    /// Performs one dispatch step and returns how many callbacks and task
    /// polls it executed.
    ///
    /// Callbacks scheduled while the step runs wait for the next step.
    /// Re-entrant calls from inside a callback do nothing.
    pub fn run_once(&self) -> usize {
        if self.inner.dispatching.replace(true) {
            log::warn!(target: "mainloop", "run_once called from inside a dispatch step");
            return 0;
        }

        self.drain_posted();
        if self.is_closed() {
            self.inner.ready.borrow_mut().clear();
            self.inner.dispatching.set(false);
            return 0;
        }

        let mut executed = 0;
        let ready = self.inner.ready.borrow().len();
        for _ in 0..ready {
            let Some(entry) = self.inner.ready.borrow_mut().pop_front() else {
                break;
            };
            if self.execute(entry) {
                executed += 1;
            }
        }

        let now = Instant::now();
        let due = {
            let mut delayed = self.inner.delayed.borrow_mut();
            let later = delayed.split_off(&(now, u64::MAX));
            std::mem::replace(&mut *delayed, later)
        };
        for (_, call) in due {
            if self.is_closed() {
                break;
            }
            if call.handle.is_cancelled() {
                continue;
            }
            self.invoke(call.callback);
            executed += 1;
        }

        self.inner.dispatching.set(false);
        executed
    }

    /// Returns the due time of the earliest pending delayed call.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.discard_cancelled();
        self.inner
            .delayed
            .borrow()
            .first_key_value()
            .map(|((due, _), _)| *due)
    }

    /// Returns `true` when there is nothing queued, posted, delayed or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.discard_cancelled();
        self.inner.ready.borrow().is_empty()
            && self.inner.receiver.is_empty()
            && self.inner.delayed.borrow().is_empty()
            && self.inner.tasks.borrow().is_empty()
    }

    /// Drives the loop until the task behind `handle` reaches a terminal state.
    ///
    /// Between dispatch steps the calling thread blocks until work is posted
    /// or the next delayed call is due. Meant for hosts without a pump of
    /// their own and for tests.
    pub fn run_until_complete(&self, handle: &TaskHandle) {
        while !handle.is_done() {
            self.run_once();
            if handle.is_done() {
                break;
            }
            self.park();
        }
    }

    /// Drives the loop until [`Scheduler::is_idle`] holds.
    pub fn run_until_idle(&self) {
        loop {
            self.run_once();
            if self.is_idle() || self.is_closed() {
                break;
            }
            self.park();
        }
    }

    /// Runs `future` as a task and drives the loop until it finishes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Task`] if the future panicked and [`Error::Cancelled`]
    /// if the task was cancelled or the scheduler closed.
    ///
    /// # Example
    /// ```
    /// # use mainloop::{Config, Scheduler};
    /// #
    /// let scheduler = Scheduler::new(Config::default()).unwrap();
    /// let work = scheduler.run_in_executor(|| 6 * 7);
    /// let answer = scheduler.block_on(async move { work.await }).unwrap();
    /// assert_eq!(answer.unwrap(), 42);
    /// ```
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, Error>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let output = Rc::new(RefCell::new(None));
        let failure = Rc::new(RefCell::new(None));
        let task = Task::from_future(future)
            .on_done({
                let output = Rc::clone(&output);
                move |value| *output.borrow_mut() = Some(value)
            })
            .on_error({
                let failure = Rc::clone(&failure);
                move |error| *failure.borrow_mut() = Some(error)
            });

        let handle = self.run(task);
        self.run_until_complete(&handle);

        if let Some(value) = output.borrow_mut().take() {
            return Ok(value);
        }
        match failure.borrow_mut().take() {
            Some(error) => Err(Error::Task(error)),
            None => Err(Error::Cancelled),
        }
    }

    /// Closes the scheduler.
    ///
    /// Pending tasks become cancelled without reporting, and queued and
    /// delayed callbacks are dropped. Later scheduling calls are no-ops.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        let tasks = std::mem::take(&mut *self.inner.tasks.borrow_mut());
        let ready = std::mem::take(&mut *self.inner.ready.borrow_mut());
        let delayed = std::mem::take(&mut *self.inner.delayed.borrow_mut());
        while self.inner.receiver.try_recv().is_ok() {}

        for task in tasks.values() {
            task.abort();
        }
        log::trace!(
            target: "mainloop",
            "scheduler closed, dropped {} tasks, {} ready and {} delayed callbacks",
            tasks.len(),
            ready.len(),
            delayed.len()
        );
    }

    /// Returns `true` once [`Scheduler::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    fn drain_posted(&self) {
        let mut ready = self.inner.ready.borrow_mut();
        while let Ok(message) = self.inner.receiver.try_recv() {
            ready.push_back(message.into());
        }
    }

    // Drops delayed calls whose handle was cancelled before they came due.
    fn discard_cancelled(&self) {
        let discarded: Vec<DelayedCall> = {
            let mut delayed = self.inner.delayed.borrow_mut();
            let cancelled: Vec<(Instant, u64)> = delayed
                .iter()
                .filter(|(_, call)| call.handle.is_cancelled())
                .map(|(key, _)| *key)
                .collect();
            cancelled
                .iter()
                .filter_map(|key| delayed.remove(key))
                .collect()
        };
        // Dropped outside the borrow; captured state may touch the scheduler.
        drop(discarded);
    }

    // Blocks until something is posted or the next delayed call is due.
    fn park(&self) {
        if !self.inner.ready.borrow().is_empty() || self.is_closed() {
            return;
        }
        let message = match self.next_deadline() {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    return;
                }
                self.inner.receiver.recv_deadline(deadline).ok()
            }
            None => self.inner.receiver.recv().ok(),
        };
        if let Some(message) = message {
            self.inner.ready.borrow_mut().push_back(message.into());
        }
    }

    fn execute(&self, entry: Entry) -> bool {
        match entry {
            Entry::Call(handle, callback) => {
                if handle.is_cancelled() {
                    return false;
                }
                self.invoke(callback);
                true
            }
            Entry::Poll(id) => self.poll_task(id),
        }
    }

    fn invoke(&self, callback: Box<dyn FnOnce()>) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
            self.inner.diagnostics.log_exception(
                "scheduled callback",
                &Error::CallbackPanicked(panic_message(payload)),
            );
        }
    }

    fn poll_task(&self, id: TaskId) -> bool {
        // Stale wakes for finished tasks are expected.
        let Some(task) = self.inner.tasks.borrow().get(&id).cloned() else {
            return false;
        };
        if task.step(self.inner.diagnostics.as_ref()) {
            self.inner.tasks.borrow_mut().remove(&id);
        }
        true
    }
}
