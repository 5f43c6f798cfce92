use std::time::Duration;

use crate::{
    scheduler::Scheduler,
    timing::{Delay, Timeout},
};

/// Extend `Future` with time-based operations measured by a [`Scheduler`].
pub trait TaskExt: Future {
    fn delay(self, scheduler: &Scheduler, due: Duration) -> Delay<Self>
    where
        Self: Sized,
    {
        Delay::new(self, scheduler, due)
    }

    fn timeout(self, scheduler: &Scheduler, time_limit: Duration) -> Timeout<Self>
    where
        Self: Sized,
    {
        Timeout::new(self, scheduler, time_limit)
    }
}

impl<T> TaskExt for T where T: Future {}
