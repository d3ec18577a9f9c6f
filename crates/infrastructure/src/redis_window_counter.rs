//! Redis-backed sliding-window counter.

use std::time::Duration;

use async_trait::async_trait;
use caseline_application::{WindowCounter, WindowSnapshot};
use caseline_core::{AppError, AppResult};
use chrono::Utc;
use redis::{AsyncCommands, Script};
use tokio::time::timeout;
use uuid::Uuid;

/// Upper bound on any single store round-trip. A coordination outage can
/// add at most this much latency to a request before the caller degrades.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Sliding-window log, executed server-side so that prune, count, and
/// insert are one atomic unit per key. A read-then-write sequence here
/// would let racing callers exceed the limit by the number of concurrent
/// requests.
const CHECK_SCRIPT: &str = r#"
local key = KEYS[1]
local now_ms = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, 0, now_ms - window_ms)
local count = redis.call('ZCARD', key)

local admitted = 0
if count < limit then
  redis.call('ZADD', key, now_ms, member)
  redis.call('PEXPIRE', key, window_ms)
  admitted = 1
  count = count + 1
end

local oldest_ms = -1
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end

return {admitted, count, oldest_ms}
"#;

/// Read-only variant: prunes and reports, but records no event.
const PEEK_SCRIPT: &str = r#"
local key = KEYS[1]
local now_ms = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])

redis.call('ZREMRANGEBYSCORE', key, 0, now_ms - window_ms)
local count = redis.call('ZCARD', key)

local oldest_ms = -1
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end

return {count, oldest_ms}
"#;

/// Redis implementation of the window counter port.
///
/// Window state is a sorted set per bucket key: member = unique event id,
/// score = event time in epoch milliseconds. Keys expire after one idle
/// window, so quiet buckets clean themselves up.
#[derive(Clone)]
pub struct RedisWindowCounter {
    client: redis::Client,
    key_prefix: String,
}

impl RedisWindowCounter {
    /// Creates a counter with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        match timeout(COMMAND_TIMEOUT, self.client.get_multiplexed_async_connection()).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(error)) => Err(AppError::Unavailable(format!(
                "failed to connect to redis: {error}"
            ))),
            Err(_) => Err(AppError::Unavailable(
                "timed out connecting to redis".to_owned(),
            )),
        }
    }
}

async fn run_command<T>(
    operation: &str,
    future: impl Future<Output = redis::RedisResult<T>>,
) -> AppResult<T> {
    match timeout(COMMAND_TIMEOUT, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(AppError::Unavailable(format!(
            "failed to {operation}: {error}"
        ))),
        Err(_) => Err(AppError::Unavailable(format!(
            "timed out trying to {operation}"
        ))),
    }
}

fn window_ms_for(window_seconds: u64) -> i64 {
    i64::try_from(window_seconds)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000)
}

fn snapshot_from_reply(allowed: bool, count: i64, oldest_ms: i64) -> WindowSnapshot {
    WindowSnapshot {
        allowed,
        count: u32::try_from(count).unwrap_or(u32::MAX),
        oldest_event_ms: (oldest_ms >= 0).then_some(oldest_ms),
    }
}

#[async_trait]
impl WindowCounter for RedisWindowCounter {
    async fn check(&self, key: &str, limit: u32, window_seconds: u64) -> AppResult<WindowSnapshot> {
        let redis_key = self.key_for(key);
        let now_ms = Utc::now().timestamp_millis();
        let member = Uuid::new_v4().to_string();

        let mut connection = self.connection().await?;
        let script = Script::new(CHECK_SCRIPT);
        let (allowed, count, oldest_ms): (i64, i64, i64) = run_command(
            "run admission check script",
            script
                .key(redis_key)
                .arg(now_ms)
                .arg(window_ms_for(window_seconds))
                .arg(limit)
                .arg(member)
                .invoke_async(&mut connection),
        )
        .await?;

        Ok(snapshot_from_reply(allowed == 1, count, oldest_ms))
    }

    async fn peek(&self, key: &str, limit: u32, window_seconds: u64) -> AppResult<WindowSnapshot> {
        let redis_key = self.key_for(key);
        let now_ms = Utc::now().timestamp_millis();

        let mut connection = self.connection().await?;
        let script = Script::new(PEEK_SCRIPT);
        let (count, oldest_ms): (i64, i64) = run_command(
            "run admission peek script",
            script
                .key(redis_key)
                .arg(now_ms)
                .arg(window_ms_for(window_seconds))
                .invoke_async(&mut connection),
        )
        .await?;

        let allowed = count < i64::from(limit);
        Ok(snapshot_from_reply(allowed, count, oldest_ms))
    }

    async fn reset(&self, key: &str) -> AppResult<()> {
        let redis_key = self.key_for(key);
        let mut connection = self.connection().await?;

        run_command("reset rate limit key", connection.del::<_, ()>(redis_key)).await
    }

    async fn clear_all(&self) -> AppResult<()> {
        let pattern = format!("{}:*", self.key_prefix);
        let mut connection = self.connection().await?;
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = run_command(
                "scan rate limit keys",
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut connection),
            )
            .await?;

            if !keys.is_empty() {
                run_command("delete rate limit keys", connection.del::<_, ()>(keys)).await?;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(())
    }
}
