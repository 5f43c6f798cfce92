//! A cooperative task runtime for hosts that own a single privileged thread.
//!
//! `mainloop` lets application code embedded in a host (an editor, a game
//! engine, any plugin environment whose main thread owns the host's state)
//! defer work, run long asynchronous computations on that privileged thread,
//! and offload blocking calls to a bounded worker pool, without ever touching
//! host state from another thread.
//!
//! The runtime never spins a thread of its own for scheduling. The host calls
//! [`Scheduler::run_once`] from its own pump, and everything else (callbacks,
//! task resumption, worker results) is funnelled through that call.
//!
//! Features include:
//! - A [`Scheduler`] with immediate and delayed callbacks, FIFO ordering and
//!   per-callback cancellation
//! - [`Deferred`] single-assignment cells, resolvable from any thread, whose
//!   continuations always run on the privileged thread
//! - An [`Executor`] that runs blocking calls on a fixed-size worker pool and
//!   delivers their results back through the scheduler
//! - [`Task`]s that drive a computation to completion and report through
//!   exactly one of their callbacks, with cooperative cancellation
//! - A [`MainThread`] guard asserting that an operation runs on the privileged
//!   thread
//! - Time-based wrappers like `Delay` and `Timeout` for augmenting futures
//!
//! # Example
//! ```
//! use std::time::Duration;
//!
//! use mainloop::{Config, Scheduler, Task};
//!
//! let scheduler = Scheduler::new(Config::default()).unwrap();
//!
//! let sched = scheduler.clone();
//! let handle = scheduler.run(
//!     Task::new(async move {
//!         sched.sleep(Duration::from_millis(10)).await?;
//!         let len = sched.run_in_executor(|| "blocking".len()).await?;
//!         Ok::<_, mainloop::Error>(len)
//!     })
//!     .on_done(|len| assert_eq!(len, 8)),
//! );
//!
//! // A real host calls `run_once` from its own pump instead.
//! scheduler.run_until_complete(&handle);
//! ```

pub mod config;
pub mod deferred;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod guard;
pub mod scheduler;
pub mod task;
pub mod task_ext;
pub mod timing;

pub use config::Config;
pub use deferred::Deferred;
pub use diagnostics::{Diagnostics, LogDiagnostics};
pub use error::{Error, PoolSubmissionError, TaskError, WrongThreadError};
pub use executor::Executor;
pub use guard::MainThread;
pub use scheduler::{CallHandle, Scheduler, SchedulerHandle};
pub use task::{Task, TaskHandle, TaskId, TaskStatus};
