mod common;

use std::{
    cell::RefCell,
    rc::Rc,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use common::{logged, scheduler};

#[test]
fn scheduler_immediate_callbacks_run_in_fifo_order() {
    let (scheduler, _) = scheduler();
    let order = Rc::new(RefCell::new(String::new()));

    for name in ["A", "B", "C"] {
        let order = Rc::clone(&order);
        scheduler.schedule_immediate(move || order.borrow_mut().push_str(name));
    }

    assert_eq!(scheduler.run_once(), 3, "One step should run all three");
    assert_eq!(*order.borrow(), "ABC", "Callbacks should run in submission order");
}

#[test]
fn scheduler_immediate_never_runs_synchronously() {
    let (scheduler, _) = scheduler();
    let ran = Rc::new(RefCell::new(false));
    let ran_cl = Rc::clone(&ran);

    scheduler.schedule_immediate(move || *ran_cl.borrow_mut() = true);
    assert!(!*ran.borrow(), "Callback should not run inside schedule_immediate");

    scheduler.run_once();
    assert!(*ran.borrow(), "Callback should run on the next dispatch step");
}

#[test]
fn scheduler_callback_scheduled_during_step_runs_next_step() {
    let (scheduler, _) = scheduler();
    let order = Rc::new(RefCell::new(Vec::new()));

    let sched = scheduler.clone();
    let order_cl = Rc::clone(&order);
    scheduler.schedule_immediate(move || {
        order_cl.borrow_mut().push("outer");
        let order_cl = Rc::clone(&order_cl);
        sched.schedule_immediate(move || order_cl.borrow_mut().push("inner"));
    });

    scheduler.run_once();
    assert_eq!(*order.borrow(), vec!["outer"]);
    scheduler.run_once();
    assert_eq!(*order.borrow(), vec!["outer", "inner"]);
}

#[test]
fn scheduler_cancelled_immediate_callback_does_not_run() {
    let (scheduler, _) = scheduler();
    let ran = Rc::new(RefCell::new(0));

    let ran_cl = Rc::clone(&ran);
    let handle = scheduler.schedule_immediate(move || *ran_cl.borrow_mut() += 1);
    let ran_cl = Rc::clone(&ran);
    scheduler.schedule_immediate(move || *ran_cl.borrow_mut() += 10);
    handle.cancel();

    assert_eq!(scheduler.run_once(), 1);
    assert_eq!(*ran.borrow(), 10, "Only the second callback should have run");
}

#[test]
fn scheduler_delayed_call_fires_at_or_after_due_time() {
    let (scheduler, _) = scheduler();
    let fired_at = Rc::new(RefCell::new(None));
    let fired_cl = Rc::clone(&fired_at);

    let start = Instant::now();
    scheduler.schedule_after_delay(Duration::from_millis(30), move || {
        *fired_cl.borrow_mut() = Some(Instant::now());
    });

    scheduler.run_once();
    assert!(fired_at.borrow().is_none(), "Delayed call should not fire early");
    assert!(scheduler.next_deadline().is_some());

    scheduler.run_until_idle();
    let fired_at = fired_at.borrow().expect("Delayed call should have fired");
    assert!(fired_at.duration_since(start) >= Duration::from_millis(30));
    assert!(scheduler.next_deadline().is_none());
}

#[test]
fn scheduler_cancelled_delayed_call_never_fires() {
    let (scheduler, _) = scheduler();
    let fired = Rc::new(RefCell::new(false));
    let fired_cl = Rc::clone(&fired);

    let handle = scheduler.schedule_after_delay(Duration::from_millis(10), move || {
        *fired_cl.borrow_mut() = true;
    });
    handle.cancel();
    assert!(handle.is_cancelled());

    thread::sleep(Duration::from_millis(20));
    scheduler.run_until_idle();
    assert!(!*fired.borrow(), "Cancelled delayed call should never fire");
}

#[test]
fn scheduler_cancel_after_fire_is_noop() {
    let (scheduler, _) = scheduler();
    let fired = Rc::new(RefCell::new(0));
    let fired_cl = Rc::clone(&fired);

    let handle = scheduler.schedule_after_delay(Duration::ZERO, move || {
        *fired_cl.borrow_mut() += 1;
    });
    scheduler.run_until_idle();
    handle.cancel();
    scheduler.run_once();

    assert_eq!(*fired.borrow(), 1, "Callback should have fired exactly once");
}

#[test]
fn scheduler_delayed_calls_fire_in_due_order_ties_by_schedule_order() {
    let (scheduler, _) = scheduler();
    let order = Rc::new(RefCell::new(String::new()));

    for (delay, name) in [(20, "b"), (10, "a"), (20, "c")] {
        let order = Rc::clone(&order);
        scheduler.schedule_after_delay(Duration::from_millis(delay), move || {
            order.borrow_mut().push_str(name);
        });
    }

    thread::sleep(Duration::from_millis(30));
    scheduler.run_once();
    assert_eq!(*order.borrow(), "abc");
}

#[test]
fn scheduler_ready_callbacks_run_before_due_delayed_calls() {
    let (scheduler, _) = scheduler();
    let order = Rc::new(RefCell::new(Vec::new()));

    let order_cl = Rc::clone(&order);
    scheduler.schedule_after_delay(Duration::ZERO, move || order_cl.borrow_mut().push("delayed"));
    let order_cl = Rc::clone(&order);
    scheduler.schedule_immediate(move || order_cl.borrow_mut().push("immediate"));

    thread::sleep(Duration::from_millis(1));
    scheduler.run_once();
    assert_eq!(*order.borrow(), vec!["immediate", "delayed"]);
}

#[test]
fn scheduler_panicking_callback_is_logged_and_step_continues() {
    let (scheduler, journal) = scheduler();
    let ran = Rc::new(RefCell::new(false));
    let ran_cl = Rc::clone(&ran);

    scheduler.schedule_immediate(|| panic!("callback exploded"));
    scheduler.schedule_immediate(move || *ran_cl.borrow_mut() = true);

    assert_eq!(scheduler.run_once(), 2);
    assert!(*ran.borrow(), "Callback after the panicking one should still run");

    let logged = logged(&journal);
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("callback exploded"), "{logged:?}");
}

#[test]
fn scheduler_threadsafe_callbacks_run_on_main_thread() {
    let (scheduler, _) = scheduler();
    let main = thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handle = scheduler.handle();
    let seen_cl = Arc::clone(&seen);
    thread::spawn(move || {
        for i in 0..3 {
            let seen = Arc::clone(&seen_cl);
            handle.call_soon_threadsafe(move || {
                seen.lock().unwrap().push((i, thread::current().id()));
            });
        }
    })
    .join()
    .unwrap();

    scheduler.run_once();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    for (expected, (i, thread_id)) in seen.iter().enumerate() {
        assert_eq!(*i, expected, "Posted callbacks should keep their order");
        assert_eq!(*thread_id, main, "Posted callbacks should run on the main thread");
    }
}

#[test]
fn scheduler_is_idle_tracks_pending_work() {
    let (scheduler, _) = scheduler();
    assert!(scheduler.is_idle());

    scheduler.schedule_immediate(|| {});
    assert!(!scheduler.is_idle());
    scheduler.run_once();
    assert!(scheduler.is_idle());

    scheduler.handle().call_soon_threadsafe(|| {});
    assert!(!scheduler.is_idle(), "Posted work should count as pending");
    scheduler.run_once();
    assert!(scheduler.is_idle());
}

#[test]
fn scheduler_run_once_is_not_reentrant() {
    let (scheduler, _) = scheduler();
    let nested = Rc::new(RefCell::new(None));

    let sched = scheduler.clone();
    let nested_cl = Rc::clone(&nested);
    scheduler.schedule_immediate(move || {
        *nested_cl.borrow_mut() = Some(sched.run_once());
    });

    scheduler.run_once();
    assert_eq!(*nested.borrow(), Some(0), "Nested dispatch should do nothing");
}

#[test]
fn scheduler_close_drops_pending_work() {
    let (scheduler, _) = scheduler();
    let ran = Rc::new(RefCell::new(0));

    let ran_cl = Rc::clone(&ran);
    scheduler.schedule_immediate(move || *ran_cl.borrow_mut() += 1);
    let ran_cl = Rc::clone(&ran);
    scheduler.schedule_after_delay(Duration::ZERO, move || *ran_cl.borrow_mut() += 1);

    scheduler.close();
    assert!(scheduler.is_closed());

    let ran_cl = Rc::clone(&ran);
    let handle = scheduler.schedule_immediate(move || *ran_cl.borrow_mut() += 1);
    assert!(handle.is_cancelled(), "Scheduling after close should be a no-op");

    assert_eq!(scheduler.run_once(), 0);
    assert_eq!(*ran.borrow(), 0);
}

#[test]
fn scheduler_unbounded_delay_is_accepted_and_cancellable() {
    let (scheduler, _) = scheduler();

    let handle = scheduler.schedule_after_delay(Duration::MAX, || {});
    assert!(scheduler.next_deadline().is_some(), "Call should be pending");
    assert!(!scheduler.is_idle());

    handle.cancel();
    assert!(scheduler.next_deadline().is_none());
    assert!(scheduler.is_idle());
}

#[test]
fn scheduler_cancelled_delayed_call_is_discarded() {
    let (scheduler, _) = scheduler();

    let handle = scheduler.schedule_after_delay(Duration::from_secs(2), || {});
    let keep = scheduler.schedule_after_delay(Duration::from_millis(5), || {});
    handle.cancel();

    let start = Instant::now();
    scheduler.run_until_idle();

    assert!(
        start.elapsed() < Duration::from_secs(1),
        "Cancelled call should not keep the loop busy"
    );
    assert!(!keep.is_cancelled());
    assert!(scheduler.is_idle());
    assert!(scheduler.next_deadline().is_none());
}
