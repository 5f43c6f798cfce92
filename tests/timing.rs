mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use mainloop::{Error, task_ext::TaskExt};

use common::scheduler;

#[test]
fn timing_timeout_expires() {
    let (scheduler, _) = scheduler();

    let sched = scheduler.clone();
    let slow = async move {
        sched.sleep(Duration::from_millis(500)).await.unwrap();
        "slow"
    };
    let start = Instant::now();
    let result = scheduler
        .block_on(slow.timeout(&scheduler, Duration::from_millis(20)))
        .unwrap();

    assert!(matches!(result, Err(Error::TimedOut)));
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn timing_timeout_passes_result_through() {
    let (scheduler, _) = scheduler();

    let sched = scheduler.clone();
    let fast = async move {
        sched.sleep(Duration::from_millis(5)).await.unwrap();
        "fast"
    };
    let result = scheduler
        .block_on(fast.timeout(&scheduler, Duration::from_millis(500)))
        .unwrap();

    assert_eq!(result.unwrap(), "fast");
}

#[test]
fn timing_delay_defers_first_poll() {
    let (scheduler, _) = scheduler();

    let start = Instant::now();
    let delayed = async { Instant::now() }.delay(&scheduler, Duration::from_millis(25));
    let polled_at = scheduler.block_on(delayed).unwrap();

    assert!(polled_at.duration_since(start) >= Duration::from_millis(25));
}

#[test]
fn timing_unbounded_timeout_passes_result_through() {
    let (scheduler, _) = scheduler();

    let result = scheduler
        .block_on(async { 1 }.timeout(&scheduler, Duration::MAX))
        .unwrap();

    assert_eq!(result.unwrap(), 1);
    assert!(scheduler.is_idle(), "Finished timeout should leave no timer behind");
}

#[test]
fn timing_timeout_finishing_early_discards_its_timer() {
    let (scheduler, _) = scheduler();

    let result = scheduler
        .block_on(async { "fast" }.timeout(&scheduler, Duration::from_secs(2)))
        .unwrap();

    assert_eq!(result.unwrap(), "fast");
    assert!(scheduler.next_deadline().is_none());
    assert!(scheduler.is_idle());
}

#[test]
fn timing_cancelled_sleep_discards_its_timer() {
    let (scheduler, _) = scheduler();

    let sleep = scheduler.sleep(Duration::from_secs(2));
    assert!(scheduler.next_deadline().is_some());
    assert!(sleep.cancel());

    assert!(scheduler.next_deadline().is_none());
    assert!(scheduler.is_idle());
}

#[test]
fn timing_dropped_sleep_with_continuation_still_fires() {
    let (scheduler, _) = scheduler();
    let fired = Arc::new(AtomicBool::new(false));

    let fired_cl = Arc::clone(&fired);
    scheduler
        .sleep(Duration::from_millis(5))
        .add_done_callback(move |outcome| fired_cl.store(outcome.is_ok(), Ordering::SeqCst));
    scheduler.run_until_idle();

    assert!(fired.load(Ordering::SeqCst), "Continuation keeps the timer alive");
}
