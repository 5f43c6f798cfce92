use std::time::Duration;

use mainloop::{Config, Error, Scheduler, task_ext::TaskExt};

fn main() -> Result<(), Error> {
    let scheduler = Scheduler::new(Config::default())?;

    let sched = scheduler.clone();
    let future = async move {
        println!("Start future 1");
        sched.sleep(Duration::from_millis(300)).await?;
        println!("End future 1");
        Ok::<_, Error>(())
    };

    let sched = scheduler.clone();
    let future2 = async move {
        println!("Start future 2");
        sched.sleep(Duration::from_millis(700)).await?;
        println!("End future 2");
        Ok::<_, Error>(())
    };

    let sched = scheduler.clone();
    scheduler.block_on(async move {
        // Has enough time to complete.
        let first = future.timeout(&sched, Duration::from_millis(500)).await;
        println!("future 1: {first:?}");

        // Does not have enough time, will time out.
        let second = future2.timeout(&sched, Duration::from_millis(500)).await;
        println!("future 2: {second:?}");
    })?;
    Ok(())
}
