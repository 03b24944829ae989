use std::sync::atomic::{AtomicI64, Ordering};

use omni_types::Timestamp;

/// Process-wide logical clock in milliseconds.
///
/// Follows wall-clock time but never repeats or goes backwards: every tick
/// is strictly greater than the previous one.
#[derive(Debug, Default)]
pub struct LogicalClock {
    last: AtomicI64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> Timestamp {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }
}
