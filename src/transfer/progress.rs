//! Byte-count progress reporting shared by chunk workers

use std::sync::{Arc, Mutex};

/// Callback receiving the running total of bytes transferred
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Accumulates bytes from concurrent chunks into one monotonic total.
///
/// The total is updated and reported under one lock, so callbacks observe
/// strictly increasing values even when chunks finish on different threads.
pub struct ProgressTracker {
    transferred: Mutex<u64>,
    callback: Option<ProgressFn>,
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressFn>) -> Self {
        Self {
            transferred: Mutex::new(0),
            callback,
        }
    }

    pub fn add(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let mut total = self.transferred.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *total += bytes;
        if let Some(callback) = &self.callback {
            callback(*total);
        }
    }

    pub fn transferred(&self) -> u64 {
        *self.transferred.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_running_total() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker = ProgressTracker::new(Some(Arc::new(move |n: u64| sink.lock().unwrap().push(n))));

        tracker.add(10);
        tracker.add(0);
        tracker.add(5);

        assert_eq!(tracker.transferred(), 15);
        assert_eq!(*seen.lock().unwrap(), vec![10, 15]);
    }

    #[test]
    fn test_concurrent_reports_stay_ordered() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker = Arc::new(ProgressTracker::new(Some(Arc::new(move |n: u64| {
            sink.lock().unwrap().push(n)
        }))));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        tracker.add(3);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4000);
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(*seen.last().unwrap(), 12_000);
    }
}
