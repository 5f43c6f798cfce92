//! Moves blocking calls off the privileged thread.
//!
//! Functions submitted to the [`Executor`] run on a fixed-size pool of
//! background threads. Their outcome travels back through the scheduler's
//! cross-thread queue and resolves a [`Deferred`] on the privileged thread,
//! so whatever awaits it resumes in dispatch order.
//!
//! Submissions beyond the pool size wait in an unbounded queue for a free
//! worker; nothing is rejected. A function that fails or panics never takes
//! its worker down: the failure becomes the `Deferred`'s error outcome.

use std::{
    convert::Infallible,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use futures::executor::{ThreadPool, ThreadPoolBuilder};

use crate::{
    config::Config,
    deferred::Deferred,
    error::{BoxError, Error, PoolSubmissionError, panic_message},
    scheduler::SchedulerHandle,
};

/// Bridge between the privileged thread and a bounded worker pool.
///
/// `Executor` is `Send + Sync + Clone`, so work may also be submitted from
/// worker threads; results are always delivered on the privileged thread.
#[derive(Clone)]
pub struct Executor {
    pool: ThreadPool,
    scheduler: SchedulerHandle,
    size: usize,
}

impl Executor {
    pub(crate) fn new(config: &Config, scheduler: SchedulerHandle) -> Result<Self, Error> {
        let pool = ThreadPoolBuilder::new()
            .pool_size(config.worker_pool_size)
            .name_prefix(config.worker_name_prefix.clone())
            .create()
            .map_err(|e| Error::PoolCreation(Arc::new(e)))?;
        Ok(Self {
            pool,
            scheduler,
            size: config.worker_pool_size,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.size
    }

    /// Runs `func` on a worker thread.
    ///
    /// The returned [`Deferred`] resolves on the privileged thread with the
    /// return value, or with [`PoolSubmissionError::Panicked`] if `func`
    /// panicked. If the `Deferred` is cancelled first, `func` still runs to
    /// completion and its result is discarded.
    ///
    /// # Example
    /// ```
    /// # use mainloop::{Config, Scheduler};
    /// #
    /// let scheduler = Scheduler::new(Config::default()).unwrap();
    /// let sum = scheduler.executor().run_in_executor(|| (1..=10).sum::<u32>());
    /// let result = scheduler.block_on(sum).unwrap();
    /// assert_eq!(result.unwrap(), 55);
    /// ```
    pub fn run_in_executor<T, F>(&self, func: F) -> Deferred<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + Sync + 'static,
    {
        self.try_run_in_executor(move || Ok::<T, Infallible>(func()))
    }

    /// Runs fallible `func` on a worker thread.
    ///
    /// An `Err` returned by `func` resolves the `Deferred` with
    /// [`PoolSubmissionError::Failed`]; a panic with
    /// [`PoolSubmissionError::Panicked`].
    pub fn try_run_in_executor<T, E, F>(&self, func: F) -> Deferred<T>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<BoxError>,
        T: Send + Sync + 'static,
    {
        let deferred = Deferred::new(self.scheduler.clone());
        let resolver = deferred.clone();
        let scheduler = self.scheduler.clone();

        self.pool.spawn_ok(async move {
            let outcome: Result<T, Error> = match panic::catch_unwind(AssertUnwindSafe(func)) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    let source: BoxError = e.into();
                    Err(PoolSubmissionError::Failed(Arc::from(source)).into())
                }
                Err(payload) => Err(PoolSubmissionError::Panicked(panic_message(payload)).into()),
            };
            scheduler.call_soon_threadsafe(move || {
                if resolver.set_outcome(outcome).is_err() {
                    log::debug!(target: "mainloop", "worker result discarded, deferred already resolved");
                }
            });
        });
        deferred
    }
}
