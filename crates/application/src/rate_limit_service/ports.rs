use async_trait::async_trait;

use caseline_core::AppResult;

/// Counter port for sliding-window admission checks.
///
/// Implementations must make [`check`](WindowCounter::check) a single atomic
/// unit per key: a read-then-write sequence would let racing callers exceed
/// the limit by the number of concurrent requests. Connectivity failures
/// surface as `AppError::Unavailable`, never as an implicit allow; the
/// orchestration layer decides how to degrade.
#[async_trait]
pub trait WindowCounter: Send + Sync {
    /// Atomically prunes expired events, counts the window, and admits the
    /// request (recording a new event) when the count is under the limit.
    async fn check(&self, key: &str, limit: u32, window_seconds: u64) -> AppResult<WindowSnapshot>;

    /// Reads the current window without recording an event.
    async fn peek(&self, key: &str, limit: u32, window_seconds: u64) -> AppResult<WindowSnapshot>;

    /// Removes all state for one key.
    async fn reset(&self, key: &str) -> AppResult<()>;

    /// Removes all state for every key this counter owns.
    async fn clear_all(&self) -> AppResult<()>;
}

/// Result of one counter operation against a single key.
#[derive(Debug, Clone, Copy)]
pub struct WindowSnapshot {
    /// Whether the request was (or would be) admitted.
    pub allowed: bool,
    /// Events inside the window, including the one just recorded when
    /// admitted.
    pub count: u32,
    /// Timestamp of the oldest event still in the window, in epoch
    /// milliseconds. `None` when the window is empty.
    pub oldest_event_ms: Option<i64>,
}
