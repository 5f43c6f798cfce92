//! Single-assignment result cells bound to a scheduler.
//!
//! A [`Deferred`] holds a value or failure that is not available yet. It can be
//! resolved from any thread exactly once; continuations registered with
//! [`Deferred::add_done_callback`] always run on the privileged thread, posted
//! through the scheduler's cross-thread queue in dispatch order.
//!
//! A `Deferred` is also a [`Future`], which is how task computations suspend on
//! it. Awaiting clones the stored value, so any number of awaiters observe the
//! same outcome.

use std::{
    fmt,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll, Waker},
};

use crate::{
    error::Error,
    scheduler::{CallHandle, SchedulerHandle},
};

type Continuation<T> = Box<dyn FnOnce(&Result<T, Error>) + Send>;

struct Waiters<T> {
    continuations: Vec<Continuation<T>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    // Written once; reads after that never lock.
    outcome: OnceLock<Result<T, Error>>,
    waiters: Mutex<Waiters<T>>,
    scheduler: SchedulerHandle,
    // Live `Deferred` values pointing at this cell.
    handles: AtomicUsize,
    // Delayed call that resolves the cell, for cells made by `Scheduler::sleep`.
    timer: OnceLock<CallHandle>,
}

impl<T> Shared<T> {
    fn lock_waiters(&self) -> MutexGuard<'_, Waiters<T>> {
        // Poisoning cannot leave the waiter lists half-updated.
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.get() {
            timer.cancel();
        }
    }
}

/// A value or failure that becomes available later.
///
/// Cloning a `Deferred` yields another reference to the same cell.
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        self.shared.handles.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Deferred<T> {
    fn drop(&mut self) {
        // The timer holds one handle. Once it is the only one left and nobody
        // registered a continuation, the outcome can no longer be observed.
        if self.shared.handles.fetch_sub(1, Ordering::AcqRel) != 2
            || self.shared.timer.get().is_none()
            || self.shared.outcome.get().is_some()
        {
            return;
        }
        if self.shared.lock_waiters().continuations.is_empty() {
            self.shared.cancel_timer();
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.outcome.get() {
            None => "unresolved",
            Some(Ok(_)) => "resolved-value",
            Some(Err(_)) => "resolved-error",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<T: Send + Sync + 'static> Deferred<T> {
    pub(crate) fn new(scheduler: SchedulerHandle) -> Self {
        Self {
            shared: Arc::new(Shared {
                outcome: OnceLock::new(),
                waiters: Mutex::new(Waiters {
                    continuations: Vec::new(),
                    wakers: Vec::new(),
                }),
                scheduler,
                handles: AtomicUsize::new(1),
                timer: OnceLock::new(),
            }),
        }
    }

    // Ties the delayed call resolving this cell to its lifetime: the call is
    // cancelled once the cell resolves otherwise or is abandoned.
    pub(crate) fn bind_timer(&self, timer: CallHandle) {
        let bound = self.shared.timer.set(timer).is_ok();
        debug_assert!(bound, "timer bound twice");
        if self.is_resolved() {
            self.shared.cancel_timer();
        }
    }

    /// Resolves the cell with a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyResolved`] if the cell already holds an outcome;
    /// the recorded outcome is left unchanged.
    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.set_outcome(Ok(value))
    }

    /// Resolves the cell with a failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyResolved`] if the cell already holds an outcome.
    pub fn reject(&self, error: Error) -> Result<(), Error> {
        self.set_outcome(Err(error))
    }

    /// Resolves the cell with [`Error::Cancelled`] if it is still unresolved.
    ///
    /// For a cell returned by [`Scheduler::sleep`] this also discards the
    /// pending delayed call.
    ///
    /// Returns `true` if this call cancelled the cell.
    ///
    /// [`Scheduler::sleep`]: crate::Scheduler::sleep
    pub fn cancel(&self) -> bool {
        self.set_outcome(Err(Error::Cancelled)).is_ok()
    }

    /// Resolves the cell with the given outcome.
    ///
    /// Continuations are posted to the privileged thread before any awaiting
    /// task is woken, so they run first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyResolved`] if the cell already holds an outcome.
    pub fn set_outcome(&self, outcome: Result<T, Error>) -> Result<(), Error> {
        self.shared
            .outcome
            .set(outcome)
            .map_err(|_| Error::AlreadyResolved)?;
        self.shared.cancel_timer();

        let (continuations, wakers) = {
            let mut waiters = self.lock_waiters();
            (
                std::mem::take(&mut waiters.continuations),
                std::mem::take(&mut waiters.wakers),
            )
        };
        for continuation in continuations {
            self.post(continuation);
        }
        for waker in wakers {
            waker.wake();
        }
        Ok(())
    }

    /// Registers `f` to run on the privileged thread once the cell resolves.
    ///
    /// If the cell is already resolved, `f` is posted immediately; it still
    /// never runs synchronously inside this call.
    pub fn add_done_callback(&self, f: impl FnOnce(&Result<T, Error>) + Send + 'static) {
        let mut waiters = self.lock_waiters();
        if self.shared.outcome.get().is_some() {
            drop(waiters);
            self.post(Box::new(f));
            return;
        }
        waiters.continuations.push(Box::new(f));
    }

    fn post(&self, continuation: Continuation<T>) {
        let shared = Arc::clone(&self.shared);
        self.shared.scheduler.call_soon_threadsafe(move || {
            if let Some(outcome) = shared.outcome.get() {
                continuation(outcome);
            }
        });
    }
}

impl<T> Deferred<T> {
    /// Returns `true` once the cell holds an outcome.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// Returns `true` if the cell was resolved with [`Error::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.outcome.get(), Some(Err(Error::Cancelled)))
    }

    /// Returns the recorded outcome, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<&Result<T, Error>> {
        self.shared.outcome.get()
    }

    fn lock_waiters(&self) -> MutexGuard<'_, Waiters<T>> {
        self.shared.lock_waiters()
    }
}

impl<T: Clone> Future for Deferred<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.shared.outcome.get() {
            return Poll::Ready(outcome.clone());
        }
        let mut waiters = self.lock_waiters();
        // Re-check under the lock; the resolver drains wakers while holding it.
        if let Some(outcome) = self.shared.outcome.get() {
            return Poll::Ready(outcome.clone());
        }
        if !waiters.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            waiters.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
