//! Timing utilities for asynchronous workflows.
//!
//! Provides wrappers for futures that introduce timing constraints or behaviors.
//! Both wrappers measure time with the scheduler's delayed calls, so they only
//! make progress while the host keeps pumping the scheduler.

use std::{
    ops::{Deref, DerefMut},
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use pin_project_lite::pin_project;

use crate::{deferred::Deferred, error::Error, scheduler::Scheduler};

pin_project! {
    /// A future that begins polling its inner future only after a specified delay.
    ///
    /// The delay is counted from the moment the `Delay` is created. Until it
    /// has elapsed the inner future is not polled at all; afterwards every
    /// poll is delegated to it.
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct Delay<F> {
        #[pin]
        future: F,
        start: Deferred<()>,
        started: bool,
    }
}

impl<F> Delay<F> {
    /// Creates a new `Delay` that defers polling `future` by `delay`.
    ///
    /// A more convenient way to construct this is via the
    /// [`delay()`](crate::task_ext::TaskExt::delay) operator.
    pub fn new(future: F, scheduler: &Scheduler, delay: Duration) -> Self {
        Delay {
            future,
            start: scheduler.sleep(delay),
            started: false,
        }
    }

    /// Consumes the `Delay` and returns the inner future.
    pub fn inner(self) -> F {
        self.future
    }
}

impl<F> Deref for Delay<F> {
    type Target = F;

    fn deref(&self) -> &Self::Target {
        &self.future
    }
}

impl<F> DerefMut for Delay<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.future
    }
}

impl<F> Future for Delay<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if !*this.started {
            if Pin::new(this.start).poll(cx).is_pending() {
                return Poll::Pending;
            }
            *this.started = true;
        }
        this.future.poll(cx)
    }
}

pin_project! {
    /// A future that applies a timeout to another asynchronous operation.
    ///
    /// If the inner future does not complete within the time limit, the
    /// `Timeout` resolves to [`Error::TimedOut`] and the inner future is no
    /// longer polled. The countdown starts when the `Timeout` is created, not
    /// when it is awaited.
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct Timeout<F> {
        #[pin]
        future: F,
        deadline: Deferred<()>,
    }
}

impl<F> Timeout<F> {
    /// Creates a new `Timeout` that runs `future` with a time limit.
    ///
    /// For a more ergonomic way to create a timeout-wrapped future, consider
    /// using the [`timeout()`](crate::task_ext::TaskExt::timeout) operator.
    pub fn new(future: F, scheduler: &Scheduler, time_limit: Duration) -> Self {
        Timeout {
            future,
            deadline: scheduler.sleep(time_limit),
        }
    }

    /// Consumes the `Timeout` and returns the inner future.
    pub fn inner(self) -> F {
        self.future
    }
}

impl<F> Deref for Timeout<F> {
    type Target = F;

    fn deref(&self) -> &Self::Target {
        &self.future
    }
}

impl<F> DerefMut for Timeout<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.future
    }
}

impl<F> Future for Timeout<F>
where
    F: Future,
{
    type Output = Result<F::Output, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(output) = this.future.poll(cx) {
            // Stops the pending sleep from resolving later.
            this.deadline.cancel();
            return Poll::Ready(Ok(output));
        }
        match Pin::new(this.deadline).poll(cx) {
            Poll::Ready(_) => {
                log::trace!(target: "mainloop", "timeout reached");
                Poll::Ready(Err(Error::TimedOut))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
