use std::sync::Arc;

use caseline_core::{AppError, AppResult, IdentityHint};
use caseline_domain::{Category, RateLimitConfig};
use chrono::Utc;
use tracing::warn;

use super::ports::{WindowCounter, WindowSnapshot};

/// Identifiers extracted from a request for bucketing purposes.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentifiers {
    /// Unverified caller identity hint.
    pub user_hint: Option<IdentityHint>,
    /// Extracted client address.
    pub ip_address: Option<String>,
}

/// Outcome of an admission check against every bucket a request maps to.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Limit in force for the category.
    pub limit: u32,
    /// Requests left in the window; zero whenever the request is denied.
    pub remaining: u32,
    /// Epoch second at which the window frees a slot.
    pub reset_epoch_seconds: i64,
    /// Seconds the caller should wait before retrying; zero when admitted.
    pub retry_after_seconds: u64,
    /// True when the decision came from the process-local fallback counter.
    pub degraded: bool,
}

/// Orchestrates category policy, bucket keys, and counter selection.
///
/// The shared counter is preferred; any failure from it degrades the check
/// to the process-local fallback, which enforces a per-instance limit
/// rather than a cluster-wide one. Protection is never disabled outright.
#[derive(Clone)]
pub struct RateLimitService {
    shared: Option<Arc<dyn WindowCounter>>,
    fallback: Arc<dyn WindowCounter>,
}

impl RateLimitService {
    /// Creates a service over an optional shared counter and the mandatory
    /// process-local fallback.
    #[must_use]
    pub fn new(shared: Option<Arc<dyn WindowCounter>>, fallback: Arc<dyn WindowCounter>) -> Self {
        Self { shared, fallback }
    }

    /// Returns true when no shared counter is configured and every check
    /// runs against the process-local fallback.
    #[must_use]
    pub fn is_permanently_degraded(&self) -> bool {
        self.shared.is_none()
    }

    /// Checks and charges the admission quota for one request.
    ///
    /// Every bucket the category tracks is enforced independently; the most
    /// restrictive outcome wins, so rotating accounts cannot bypass IP
    /// buckets and rotating addresses cannot bypass account buckets.
    pub async fn check_rate_limit(
        &self,
        category: Category,
        identifiers: &RequestIdentifiers,
    ) -> AppResult<RateLimitDecision> {
        self.evaluate(category, identifiers, false).await
    }

    /// Reads the current quota state without charging it.
    ///
    /// Used to annotate already-admitted responses, so an allowed request is
    /// never counted twice.
    pub async fn status(
        &self,
        category: Category,
        identifiers: &RequestIdentifiers,
    ) -> AppResult<RateLimitDecision> {
        self.evaluate(category, identifiers, true).await
    }

    /// Clears all window state for one bucket key. Administrative surface.
    pub async fn reset_key(&self, key: &str) -> AppResult<()> {
        self.fallback.reset(key).await?;

        if let Some(shared) = &self.shared {
            shared.reset(key).await?;
        }

        Ok(())
    }

    /// Clears all window state for every bucket key. Administrative surface.
    pub async fn clear_all(&self) -> AppResult<()> {
        self.fallback.clear_all().await?;

        if let Some(shared) = &self.shared {
            shared.clear_all().await?;
        }

        Ok(())
    }

    async fn evaluate(
        &self,
        category: Category,
        identifiers: &RequestIdentifiers,
        peek: bool,
    ) -> AppResult<RateLimitDecision> {
        let config = category.config();
        let keys = bucket_keys(category, &config, identifiers);
        let now_ms = Utc::now().timestamp_millis();

        let mut decision: Option<RateLimitDecision> = None;
        for key in &keys {
            let (snapshot, degraded) = self.run_counter(key, &config, peek).await?;
            let next = decision_from_snapshot(&config, snapshot, now_ms, degraded);

            decision = Some(match decision {
                None => next,
                Some(current) => most_restrictive(current, next),
            });
        }

        decision.ok_or_else(|| {
            AppError::Internal("admission check produced no bucket decision".to_owned())
        })
    }

    async fn run_counter(
        &self,
        key: &str,
        config: &RateLimitConfig,
        peek: bool,
    ) -> AppResult<(WindowSnapshot, bool)> {
        if let Some(shared) = &self.shared {
            let attempt = if peek {
                shared.peek(key, config.limit, config.window_seconds).await
            } else {
                shared.check(key, config.limit, config.window_seconds).await
            };

            match attempt {
                Ok(snapshot) => return Ok((snapshot, false)),
                Err(error) => {
                    warn!(
                        key = %key,
                        error = %error,
                        "shared window counter unavailable, degrading to process-local fallback"
                    );
                }
            }
        }

        let snapshot = if peek {
            self.fallback
                .peek(key, config.limit, config.window_seconds)
                .await?
        } else {
            self.fallback
                .check(key, config.limit, config.window_seconds)
                .await?
        };

        Ok((snapshot, true))
    }
}

fn bucket_keys(
    category: Category,
    config: &RateLimitConfig,
    identifiers: &RequestIdentifiers,
) -> Vec<String> {
    let mut keys = Vec::with_capacity(2);

    if config.track_by_user {
        if let Some(hint) = &identifiers.user_hint {
            keys.push(format!("{category}:user:{}", hint.as_str()));
        }
    }

    if config.track_by_ip {
        if let Some(ip_address) = &identifiers.ip_address {
            keys.push(format!("{category}:ip:{ip_address}"));
        }
    }

    // An unidentifiable caller shares one strict bucket rather than
    // escaping admission control.
    if keys.is_empty() {
        keys.push(format!("{category}:anonymous"));
    }

    keys
}

fn decision_from_snapshot(
    config: &RateLimitConfig,
    snapshot: WindowSnapshot,
    now_ms: i64,
    degraded: bool,
) -> RateLimitDecision {
    let window_seconds = i64::try_from(config.window_seconds).unwrap_or(i64::MAX);
    let window_ms = window_seconds.saturating_mul(1000);

    let reset_epoch_seconds = match snapshot.oldest_event_ms {
        Some(oldest_ms) => oldest_ms.saturating_add(window_ms) / 1000,
        None => now_ms.saturating_add(window_ms) / 1000,
    };

    if snapshot.allowed {
        return RateLimitDecision {
            allowed: true,
            limit: config.limit,
            remaining: config.limit.saturating_sub(snapshot.count),
            reset_epoch_seconds,
            retry_after_seconds: 0,
            degraded,
        };
    }

    let elapsed_seconds = snapshot
        .oldest_event_ms
        .map_or(0, |oldest_ms| now_ms.saturating_sub(oldest_ms) / 1000);
    let retry_after = (window_seconds - elapsed_seconds).clamp(1, window_seconds);

    RateLimitDecision {
        allowed: false,
        limit: config.limit,
        remaining: 0,
        reset_epoch_seconds,
        retry_after_seconds: u64::try_from(retry_after).unwrap_or(1),
        degraded,
    }
}

fn most_restrictive(left: RateLimitDecision, right: RateLimitDecision) -> RateLimitDecision {
    let degraded = left.degraded || right.degraded;

    let mut winner = match (left.allowed, right.allowed) {
        (false, true) => left,
        (true, false) => right,
        (false, false) => {
            if right.retry_after_seconds > left.retry_after_seconds {
                right
            } else {
                left
            }
        }
        (true, true) => {
            if right.remaining < left.remaining {
                right
            } else {
                left
            }
        }
    };

    winner.degraded = degraded;
    winner
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use caseline_core::{AppError, AppResult, IdentityHint};
    use caseline_domain::Category;
    use tokio::sync::Mutex;

    use super::super::ports::{WindowCounter, WindowSnapshot};
    use super::{RateLimitService, RequestIdentifiers};

    /// Count-only fake; window expiry is covered by the counter adapters'
    /// own tests.
    #[derive(Default)]
    struct FakeCounter {
        counts: Mutex<HashMap<String, u32>>,
    }

    #[async_trait]
    impl WindowCounter for FakeCounter {
        async fn check(
            &self,
            key: &str,
            limit: u32,
            _window_seconds: u64,
        ) -> AppResult<WindowSnapshot> {
            let mut counts = self.counts.lock().await;
            let count = counts.entry(key.to_owned()).or_insert(0);

            if *count < limit {
                *count += 1;
                Ok(WindowSnapshot {
                    allowed: true,
                    count: *count,
                    oldest_event_ms: None,
                })
            } else {
                Ok(WindowSnapshot {
                    allowed: false,
                    count: *count,
                    oldest_event_ms: None,
                })
            }
        }

        async fn peek(
            &self,
            key: &str,
            limit: u32,
            _window_seconds: u64,
        ) -> AppResult<WindowSnapshot> {
            let counts = self.counts.lock().await;
            let count = counts.get(key).copied().unwrap_or(0);

            Ok(WindowSnapshot {
                allowed: count < limit,
                count,
                oldest_event_ms: None,
            })
        }

        async fn reset(&self, key: &str) -> AppResult<()> {
            self.counts.lock().await.remove(key);
            Ok(())
        }

        async fn clear_all(&self) -> AppResult<()> {
            self.counts.lock().await.clear();
            Ok(())
        }
    }

    struct UnreachableCounter;

    #[async_trait]
    impl WindowCounter for UnreachableCounter {
        async fn check(&self, _: &str, _: u32, _: u64) -> AppResult<WindowSnapshot> {
            Err(AppError::Unavailable("connection refused".to_owned()))
        }

        async fn peek(&self, _: &str, _: u32, _: u64) -> AppResult<WindowSnapshot> {
            Err(AppError::Unavailable("connection refused".to_owned()))
        }

        async fn reset(&self, _: &str) -> AppResult<()> {
            Err(AppError::Unavailable("connection refused".to_owned()))
        }

        async fn clear_all(&self) -> AppResult<()> {
            Err(AppError::Unavailable("connection refused".to_owned()))
        }
    }

    fn service_with_fallback_only() -> RateLimitService {
        RateLimitService::new(None, Arc::new(FakeCounter::default()))
    }

    fn ip_identifiers(ip: &str) -> RequestIdentifiers {
        RequestIdentifiers {
            user_hint: None,
            ip_address: Some(ip.to_owned()),
        }
    }

    #[tokio::test]
    async fn remaining_decreases_until_denial() {
        let service = service_with_fallback_only();
        let identifiers = ip_identifiers("203.0.113.10");
        let config = Category::Authentication.config();

        for expected_remaining in (0..config.limit).rev() {
            let decision = service
                .check_rate_limit(Category::Authentication, &identifiers)
                .await;
            assert!(decision.is_ok());

            let decision = decision.unwrap_or_else(|_| unreachable!());
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = service
            .check_rate_limit(Category::Authentication, &identifiers)
            .await;
        assert!(denied.is_ok());

        let denied = denied.unwrap_or_else(|_| unreachable!());
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_seconds >= 1);
        assert!(denied.retry_after_seconds <= config.window_seconds);
    }

    #[tokio::test]
    async fn distinct_identifiers_do_not_share_buckets() {
        let service = service_with_fallback_only();
        let first = ip_identifiers("203.0.113.10");
        let second = ip_identifiers("203.0.113.11");

        for _ in 0..Category::Authentication.config().limit {
            let decision = service
                .check_rate_limit(Category::Authentication, &first)
                .await;
            assert!(decision.is_ok());
        }

        let decision = service
            .check_rate_limit(Category::Authentication, &second)
            .await;
        assert!(decision.is_ok());
        assert!(decision.unwrap_or_else(|_| unreachable!()).allowed);
    }

    #[tokio::test]
    async fn unidentified_callers_share_the_anonymous_bucket() {
        let service = service_with_fallback_only();
        let identifiers = RequestIdentifiers::default();
        let limit = Category::Webhook.config().limit;

        for _ in 0..limit {
            let decision = service
                .check_rate_limit(Category::Webhook, &identifiers)
                .await;
            assert!(decision.is_ok());
        }

        let denied = service
            .check_rate_limit(Category::Webhook, &identifiers)
            .await;
        assert!(denied.is_ok());
        assert!(!denied.unwrap_or_else(|_| unreachable!()).allowed);
    }

    #[tokio::test]
    async fn exhausted_user_bucket_denies_despite_fresh_ip() {
        let service = service_with_fallback_only();
        let user_only = RequestIdentifiers {
            user_hint: IdentityHint::new("user-7"),
            ip_address: None,
        };

        for _ in 0..Category::Authentication.config().limit {
            let decision = service
                .check_rate_limit(Category::Authentication, &user_only)
                .await;
            assert!(decision.is_ok());
        }

        let with_fresh_ip = RequestIdentifiers {
            user_hint: IdentityHint::new("user-7"),
            ip_address: Some("198.51.100.1".to_owned()),
        };
        let denied = service
            .check_rate_limit(Category::Authentication, &with_fresh_ip)
            .await;
        assert!(denied.is_ok());
        assert!(!denied.unwrap_or_else(|_| unreachable!()).allowed);
    }

    #[tokio::test]
    async fn unreachable_shared_counter_degrades_but_still_enforces() {
        let service = RateLimitService::new(
            Some(Arc::new(UnreachableCounter)),
            Arc::new(FakeCounter::default()),
        );
        let identifiers = ip_identifiers("203.0.113.10");
        let limit = Category::Authentication.config().limit;

        for _ in 0..limit {
            let decision = service
                .check_rate_limit(Category::Authentication, &identifiers)
                .await;
            assert!(decision.is_ok());

            let decision = decision.unwrap_or_else(|_| unreachable!());
            assert!(decision.allowed);
            assert!(decision.degraded);
        }

        let denied = service
            .check_rate_limit(Category::Authentication, &identifiers)
            .await;
        assert!(denied.is_ok());

        let denied = denied.unwrap_or_else(|_| unreachable!());
        assert!(!denied.allowed);
        assert!(denied.degraded);
    }

    #[tokio::test]
    async fn status_never_charges_quota() {
        let service = service_with_fallback_only();
        let identifiers = ip_identifiers("203.0.113.10");

        let charged = service
            .check_rate_limit(Category::Authentication, &identifiers)
            .await;
        assert!(charged.is_ok());

        for _ in 0..5 {
            let status = service.status(Category::Authentication, &identifiers).await;
            assert!(status.is_ok());
            assert_eq!(
                status.unwrap_or_else(|_| unreachable!()).remaining,
                Category::Authentication.config().limit - 1
            );
        }
    }

    #[tokio::test]
    async fn reset_key_reopens_a_denied_bucket() {
        let service = service_with_fallback_only();
        let identifiers = ip_identifiers("203.0.113.10");
        let limit = Category::Authentication.config().limit;

        for _ in 0..=limit {
            let _decision = service
                .check_rate_limit(Category::Authentication, &identifiers)
                .await;
        }

        let reset = service.reset_key("authentication:ip:203.0.113.10").await;
        assert!(reset.is_ok());

        let decision = service
            .check_rate_limit(Category::Authentication, &identifiers)
            .await;
        assert!(decision.is_ok());
        assert!(decision.unwrap_or_else(|_| unreachable!()).allowed);
    }
}
