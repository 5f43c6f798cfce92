#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use mainloop::{Config, Diagnostics, Error, Scheduler};

/// Diagnostics sink that records every reported failure in a shared journal.
pub struct Recorder {
    pub journal: Arc<Mutex<Vec<String>>>,
}

impl Diagnostics for Recorder {
    fn log_exception(&self, context: &str, error: &Error) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("logged {context}: {error}"));
    }
}

pub fn scheduler() -> (Scheduler, Arc<Mutex<Vec<String>>>) {
    scheduler_with(Config::default())
}

pub fn scheduler_with(config: Config) -> (Scheduler, Arc<Mutex<Vec<String>>>) {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let recorder = Recorder {
        journal: Arc::clone(&journal),
    };
    let scheduler = Scheduler::with_diagnostics(config, Arc::new(recorder)).unwrap();
    (scheduler, journal)
}

pub fn logged(journal: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    journal
        .lock()
        .unwrap()
        .iter()
        .filter(|entry| entry.starts_with("logged"))
        .cloned()
        .collect()
}
