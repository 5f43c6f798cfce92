//! Construction-time settings for a [`Scheduler`](crate::Scheduler).

use crate::error::Error;

/// Number of worker threads used when none is configured.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 5;

const DEFAULT_WORKER_NAME_PREFIX: &str = "mainloop-worker-";

/// Settings fixed at construction of the scheduler and its worker pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Number of background threads serving `run_in_executor`.
    pub worker_pool_size: usize,

    /// Name prefix for worker threads; the pool appends the thread index.
    pub worker_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            worker_name_prefix: DEFAULT_WORKER_NAME_PREFIX.to_string(),
        }
    }
}

impl Config {
    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_worker_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_name_prefix = prefix.into();
        self
    }

    /// Checks that the settings can be used to build a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the worker pool size is zero.
    pub fn validate(&self) -> Result<(), Error> {
        if self.worker_pool_size == 0 {
            return Err(Error::InvalidConfig(
                "worker_pool_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
