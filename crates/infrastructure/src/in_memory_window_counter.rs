//! Process-local fallback for the window counter port.

use std::collections::HashMap;

use async_trait::async_trait;
use caseline_application::{WindowCounter, WindowSnapshot};
use caseline_core::AppResult;
use chrono::Utc;
use tokio::sync::RwLock;

#[derive(Debug)]
struct KeyWindow {
    window_ms: i64,
    events: Vec<i64>,
}

/// In-memory sliding-window counter used while the shared store is
/// unreachable.
///
/// Enforcement is per-process: a deployment of N instances admits up to
/// N times the configured limit in the worst case. That is the accepted
/// degraded posture, stricter than disabling checks and cheaper than
/// refusing all traffic.
#[derive(Debug, Default)]
pub struct InMemoryWindowCounter {
    windows: RwLock<HashMap<String, KeyWindow>>,
}

impl InMemoryWindowCounter {
    /// Creates an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Drops expired events and empty buckets.
    ///
    /// Pruning also happens on every access; this sweep exists so buckets
    /// that stop receiving traffic do not hold memory until the next hit.
    /// Intended to run from a periodic background task.
    pub async fn sweep(&self) {
        self.sweep_at(Utc::now().timestamp_millis()).await;
    }

    /// Returns the number of buckets currently held.
    pub async fn tracked_keys(&self) -> usize {
        self.windows.read().await.len()
    }

    async fn check_at(
        &self,
        key: &str,
        limit: u32,
        window_seconds: u64,
        now_ms: i64,
    ) -> WindowSnapshot {
        let window_ms = window_ms_for(window_seconds);
        let mut windows = self.windows.write().await;
        let window = windows.entry(key.to_owned()).or_insert_with(|| KeyWindow {
            window_ms,
            events: Vec::new(),
        });

        window.window_ms = window_ms;
        window.events.retain(|&event_ms| event_ms > now_ms - window_ms);

        let count = u32::try_from(window.events.len()).unwrap_or(u32::MAX);
        if count < limit {
            window.events.push(now_ms);

            return WindowSnapshot {
                allowed: true,
                count: count + 1,
                oldest_event_ms: window.events.first().copied(),
            };
        }

        WindowSnapshot {
            allowed: false,
            count,
            oldest_event_ms: window.events.first().copied(),
        }
    }

    async fn peek_at(
        &self,
        key: &str,
        limit: u32,
        window_seconds: u64,
        now_ms: i64,
    ) -> WindowSnapshot {
        let window_ms = window_ms_for(window_seconds);
        let windows = self.windows.read().await;

        let live_events: Vec<i64> = windows
            .get(key)
            .map(|window| {
                window
                    .events
                    .iter()
                    .copied()
                    .filter(|&event_ms| event_ms > now_ms - window_ms)
                    .collect()
            })
            .unwrap_or_default();

        let count = u32::try_from(live_events.len()).unwrap_or(u32::MAX);

        WindowSnapshot {
            allowed: count < limit,
            count,
            oldest_event_ms: live_events.first().copied(),
        }
    }

    async fn sweep_at(&self, now_ms: i64) {
        let mut windows = self.windows.write().await;

        windows.retain(|_, window| {
            window
                .events
                .retain(|&event_ms| event_ms > now_ms - window.window_ms);
            !window.events.is_empty()
        });
    }
}

fn window_ms_for(window_seconds: u64) -> i64 {
    i64::try_from(window_seconds)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000)
}

#[async_trait]
impl WindowCounter for InMemoryWindowCounter {
    async fn check(&self, key: &str, limit: u32, window_seconds: u64) -> AppResult<WindowSnapshot> {
        Ok(self
            .check_at(key, limit, window_seconds, Utc::now().timestamp_millis())
            .await)
    }

    async fn peek(&self, key: &str, limit: u32, window_seconds: u64) -> AppResult<WindowSnapshot> {
        Ok(self
            .peek_at(key, limit, window_seconds, Utc::now().timestamp_millis())
            .await)
    }

    async fn reset(&self, key: &str) -> AppResult<()> {
        self.windows.write().await.remove(key);
        Ok(())
    }

    async fn clear_all(&self) -> AppResult<()> {
        self.windows.write().await.clear();
        Ok(())
    }
}
