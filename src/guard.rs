//! Identifies the privileged thread and asserts operations run on it.
//!
//! The host application owns one thread on which its own state may be mutated.
//! Operations that touch that state call [`MainThread::assert_main_thread`] (or
//! wrap their body in [`MainThread::run`]) before doing anything else, turning
//! an accidental call from a worker thread into a [`WrongThreadError`] instead
//! of a data race inside the host.

use std::thread::{self, ThreadId};

use crate::error::WrongThreadError;

/// The designated privileged thread.
///
/// `MainThread` is `Copy` and `Send`, so it can be handed to background
/// threads which then use it to check where they are running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MainThread {
    id: ThreadId,
}

impl MainThread {
    /// Designates the calling thread as the privileged thread.
    #[must_use]
    pub fn current() -> Self {
        Self {
            id: thread::current().id(),
        }
    }

    /// Returns the identifier of the privileged thread.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Returns `true` if the calling thread is the privileged thread.
    #[must_use]
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Fails with [`WrongThreadError`] unless called on the privileged thread.
    ///
    /// # Errors
    ///
    /// Returns [`WrongThreadError`] carrying both thread ids when invoked from
    /// any other thread.
    pub fn assert_main_thread(&self) -> Result<(), WrongThreadError> {
        let actual = thread::current().id();
        if actual == self.id {
            return Ok(());
        }
        Err(WrongThreadError {
            expected: self.id,
            actual,
        })
    }

    /// Runs `f` after checking that the caller is on the privileged thread.
    ///
    /// `f` is not invoked at all when the check fails.
    ///
    /// # Example
    /// ```
    /// # use mainloop::MainThread;
    /// #
    /// let main = MainThread::current();
    /// assert_eq!(main.run(|| 1 + 1), Ok(2));
    ///
    /// std::thread::spawn(move || {
    ///     assert!(main.run(|| 1 + 1).is_err());
    /// })
    /// .join()
    /// .unwrap();
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`WrongThreadError`] when invoked from any other thread.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R, WrongThreadError> {
        self.assert_main_thread()?;
        Ok(f())
    }
}
