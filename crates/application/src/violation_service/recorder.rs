use std::collections::VecDeque;

use caseline_domain::Violation;
use tokio::sync::Mutex;

/// Default number of buffered violations before the oldest are dropped.
pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded in-process buffer of denial events.
///
/// The buffer intentionally favors recency over completeness: under a
/// sustained attack the newest violations are the ones worth auditing, so
/// overflow evicts from the front. Two actors touch it concurrently (the
/// request path appends, the flusher drains), which is why drain swaps the
/// whole buffer under the lock instead of copying entries out.
#[derive(Debug)]
pub struct ViolationRecorder {
    capacity: usize,
    buffer: Mutex<VecDeque<Violation>>,
}

impl ViolationRecorder {
    /// Creates a recorder with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a recorder holding at most `capacity` violations.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Appends one violation, evicting the oldest entry when full.
    pub async fn record(&self, violation: Violation) {
        let mut buffer = self.buffer.lock().await;

        if buffer.len() == self.capacity {
            buffer.pop_front();
        }

        buffer.push_back(violation);
    }

    /// Destructively takes every buffered violation.
    ///
    /// Swaps the buffer for an empty one under the lock, so violations
    /// recorded concurrently land in the fresh buffer and are neither lost
    /// nor double-counted. Only the scheduled flusher should call this;
    /// dashboards use [`snapshot`](Self::snapshot).
    pub async fn drain(&self) -> Vec<Violation> {
        let mut buffer = self.buffer.lock().await;
        std::mem::take(&mut *buffer).into_iter().collect()
    }

    /// Returns a copy of the buffered violations without consuming them.
    pub async fn snapshot(&self) -> Vec<Violation> {
        self.buffer.lock().await.iter().cloned().collect()
    }

    /// Returns the number of currently buffered violations.
    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Returns true when nothing is buffered.
    pub async fn is_empty(&self) -> bool {
        self.buffer.lock().await.is_empty()
    }
}

impl Default for ViolationRecorder {
    fn default() -> Self {
        Self::new()
    }
}
