mod common;

use std::{
    sync::{Arc, Mutex},
    thread,
};

use mainloop::Error;

use common::scheduler;

#[test]
fn deferred_resolves_at_most_once() {
    let (scheduler, _) = scheduler();
    let deferred = scheduler.create_future::<u32>();
    assert!(!deferred.is_resolved());

    deferred.resolve(1).unwrap();
    let second = deferred.resolve(2);

    assert!(matches!(second, Err(Error::AlreadyResolved)));
    assert!(matches!(deferred.outcome(), Some(Ok(1))), "First outcome should be kept");
    assert!(matches!(deferred.reject(Error::TimedOut), Err(Error::AlreadyResolved)));
    assert!(!deferred.cancel(), "Cancelling a resolved cell should have no effect");
}

#[test]
fn deferred_cancel_resolves_with_cancelled() {
    let (scheduler, _) = scheduler();
    let deferred = scheduler.create_future::<u32>();

    assert!(deferred.cancel());
    assert!(deferred.is_cancelled());
    assert!(matches!(deferred.resolve(7), Err(Error::AlreadyResolved)));
}

#[test]
fn deferred_continuations_run_on_main_thread_after_cross_thread_resolve() {
    let (scheduler, _) = scheduler();
    let main = thread::current().id();
    let deferred = scheduler.create_future::<String>();
    let seen = Arc::new(Mutex::new(None));

    let seen_cl = Arc::clone(&seen);
    deferred.add_done_callback(move |outcome| {
        let value = outcome.as_ref().map(String::clone).ok();
        *seen_cl.lock().unwrap() = Some((value, thread::current().id()));
    });

    let resolver = deferred.clone();
    thread::spawn(move || resolver.resolve("done".to_string()).unwrap())
        .join()
        .unwrap();

    assert!(deferred.is_resolved());
    assert!(seen.lock().unwrap().is_none(), "Continuation waits for a dispatch step");

    scheduler.run_once();
    let seen = seen.lock().unwrap().take().expect("Continuation should have run");
    assert_eq!(seen.0.as_deref(), Some("done"));
    assert_eq!(seen.1, main, "Continuation should run on the main thread");
}

#[test]
fn deferred_callback_added_after_resolution_is_still_deferred() {
    let (scheduler, _) = scheduler();
    let deferred = scheduler.create_future::<u8>();
    deferred.resolve(3).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cl = Arc::clone(&seen);
    deferred.add_done_callback(move |outcome| {
        seen_cl.lock().unwrap().push(*outcome.as_ref().unwrap());
    });

    assert!(seen.lock().unwrap().is_empty());
    scheduler.run_once();
    assert_eq!(*seen.lock().unwrap(), vec![3]);
}

#[test]
fn deferred_continuation_runs_before_awaiting_task_resumes() {
    let (scheduler, _) = scheduler();
    let deferred = scheduler.create_future::<u8>();
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_cl = Arc::clone(&order);
    deferred.add_done_callback(move |_| order_cl.lock().unwrap().push("continuation"));

    let awaited = deferred.clone();
    let order_cl = Arc::clone(&order);
    let handle = scheduler.spawn(async move {
        let value = awaited.await?;
        order_cl.lock().unwrap().push("task");
        Ok::<_, Error>(value)
    });

    scheduler.run_once();
    deferred.resolve(9).unwrap();
    scheduler.run_until_complete(&handle);

    assert_eq!(*order.lock().unwrap(), vec!["continuation", "task"]);
}

#[test]
fn deferred_rejection_reaches_awaiter() {
    let (scheduler, _) = scheduler();
    let deferred = scheduler.create_future::<u8>();
    deferred.reject(Error::TimedOut).unwrap();

    let result = scheduler.block_on(deferred).unwrap();
    assert!(matches!(result, Err(Error::TimedOut)));
}

#[test]
fn deferred_shared_by_several_awaiters() {
    let (scheduler, _) = scheduler();
    let deferred = scheduler.create_future::<u64>();

    let first = deferred.clone();
    let second = deferred.clone();
    let resolver = deferred.clone();
    scheduler.schedule_immediate(move || resolver.resolve(5).unwrap());

    let sum = scheduler
        .block_on(async move { first.await.unwrap() + second.await.unwrap() })
        .unwrap();
    assert_eq!(sum, 10);
}
