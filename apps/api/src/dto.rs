use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Body of an admission denial.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceededResponse {
    pub error: &'static str,
    pub message: String,
    pub retry_after: u64,
}

/// Non-destructive view over the buffered violations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationSummaryResponse {
    pub buffered: usize,
    pub by_severity: BTreeMap<&'static str, usize>,
    pub by_category: BTreeMap<&'static str, usize>,
    pub latest_occurred_at: Option<DateTime<Utc>>,
}

/// Request to clear one rate limit bucket.
#[derive(Debug, Deserialize)]
pub struct ResetRateLimitRequest {
    pub key: String,
}

/// Acknowledgement for administrative operations.
#[derive(Debug, Serialize)]
pub struct AdminActionResponse {
    pub status: &'static str,
}
