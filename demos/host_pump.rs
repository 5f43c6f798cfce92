//! Simulates a host application that owns the main thread and pumps the
//! scheduler from its own loop, the way an editor would from a timer tick.
use std::{
    thread,
    time::{Duration, Instant},
};

use mainloop::{Config, Error, Scheduler, Task};

fn main() -> Result<(), Error> {
    let scheduler = Scheduler::new(Config::default())?;

    scheduler.schedule_immediate(|| println!("deferred work runs on the next tick"));
    scheduler.schedule_after_delay(Duration::from_millis(100), || println!("100ms later"));

    let sched = scheduler.clone();
    let handle = scheduler.run(
        Task::new(async move {
            for i in 0..3 {
                sched.sleep(Duration::from_millis(30)).await?;
                println!("computation step {i}");
            }
            Ok::<_, Error>("computation finished")
        })
        .on_done(|message| println!("{message}")),
    );

    // The host's own pump: handle input, redraw, then give the scheduler a turn.
    let start = Instant::now();
    while !handle.is_done() || !scheduler.is_idle() {
        scheduler.run_once();
        let wait = scheduler
            .next_deadline()
            .map_or(Duration::from_millis(16), |due| {
                due.saturating_duration_since(Instant::now())
                    .min(Duration::from_millis(16))
            });
        thread::sleep(wait);
    }
    println!("host pump idle after {:?}", start.elapsed());
    Ok(())
}
