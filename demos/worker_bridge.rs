use std::{thread, time::Duration};

use mainloop::{Config, Error, Scheduler, Task};

fn main() -> Result<(), Error> {
    let scheduler = Scheduler::new(Config::default().with_worker_pool_size(2))?;

    let sched = scheduler.clone();
    let handle = scheduler.run(
        Task::new(async move {
            let size = sched
                .try_run_in_executor(|| std::fs::metadata("Cargo.toml").map(|m| m.len()))
                .await?;
            println!("Cargo.toml is {size} bytes");

            let slow = sched.run_in_executor(|| {
                thread::sleep(Duration::from_millis(200));
                "slow call done"
            });
            // Main thread keeps dispatching while the worker sleeps.
            sched.schedule_immediate(|| println!("main thread is still responsive"));
            println!("{}", slow.await?);
            Ok::<_, Error>(())
        })
        .on_error(|error| eprintln!("task failed: {error}")),
    );

    scheduler.run_until_complete(&handle);
    Ok(())
}
