use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use caseline_core::AppError;

use crate::dto::{AdminActionResponse, ResetRateLimitRequest, ViolationSummaryResponse};
use crate::error::ApiResult;
use crate::state::AppState;

/// Non-destructive violation overview for dashboards.
///
/// Reads a snapshot of the buffer; the scheduled audit flusher keeps sole
/// ownership of the destructive drain.
pub async fn violation_summary_handler(
    State(state): State<AppState>,
) -> Json<ViolationSummaryResponse> {
    let violations = state.violation_recorder.snapshot().await;

    let mut by_severity: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut by_category: BTreeMap<&'static str, usize> = BTreeMap::new();
    for violation in &violations {
        *by_severity.entry(violation.severity().as_str()).or_insert(0) += 1;
        *by_category.entry(violation.category.as_str()).or_insert(0) += 1;
    }

    Json(ViolationSummaryResponse {
        buffered: violations.len(),
        by_severity,
        by_category,
        latest_occurred_at: violations.last().map(|violation| violation.occurred_at),
    })
}

/// Clears one rate limit bucket. Administrative/test surface.
pub async fn reset_rate_limit_handler(
    State(state): State<AppState>,
    Json(request): Json<ResetRateLimitRequest>,
) -> ApiResult<Json<AdminActionResponse>> {
    if request.key.trim().is_empty() {
        return Err(AppError::Validation("key must not be empty".to_owned()).into());
    }

    state.rate_limit_service.reset_key(request.key.trim()).await?;

    Ok(Json(AdminActionResponse { status: "ok" }))
}

/// Clears every rate limit bucket. Administrative/test surface.
pub async fn clear_rate_limits_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<AdminActionResponse>> {
    state.rate_limit_service.clear_all().await?;

    Ok(Json(AdminActionResponse { status: "ok" }))
}
