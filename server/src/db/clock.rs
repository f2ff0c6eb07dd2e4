//! Server clock.

use std::sync::atomic::{AtomicU64, Ordering};
use tether_engine::Timestamp;

/// Millisecond clock that never repeats a reading.
///
/// Every write is stamped with a distinct, strictly increasing time, so a
/// pull checkpoint cleanly splits writes into "seen" and "not yet seen".
#[derive(Debug, Default)]
pub struct ServerClock {
    last: AtomicU64,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp: wall time, or one past the previous reading if the
    /// wall clock has not moved on.
    pub fn tick(&self) -> Timestamp {
        let wall = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        let mut previous = self.last.load(Ordering::SeqCst);
        loop {
            let next = wall.max(previous + 1);
            match self
                .last
                .compare_exchange(previous, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }
}
