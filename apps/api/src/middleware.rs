use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use caseline_application::{RateLimitDecision, RequestIdentifiers};
use caseline_core::IdentityHint;
use caseline_domain::{Violation, is_excluded_path, resolve_category};
use chrono::Utc;

use crate::dto::RateLimitExceededResponse;
use crate::error::ApiResult;
use crate::state::AppState;

/// Session cookie probed for a caller identity hint.
const SESSION_COOKIE: &str = "caseline_session";

/// Single-address headers probed when no forwarded-for chain is present,
/// in precedence order.
const IP_HEADERS: &[&str] = &["x-real-ip", "cf-connecting-ip", "true-client-ip", "fly-client-ip"];

/// Admission gate applied to every inbound request.
///
/// The check at the top is the single quota charge for the request; the
/// header annotation after the handler uses the peek path so an admitted
/// request is never counted twice. Admission is charged at entry and not
/// refunded if the caller aborts mid-handler.
pub async fn admission_control(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let path = request.uri().path().to_owned();

    if is_excluded_path(&path) {
        return Ok(next.run(request).await);
    }

    let method = request.method().as_str().to_owned();
    let category = resolve_category(&path, &method);
    let identifiers = extract_identifiers(request.headers());
    let user_agent = header_value(request.headers(), header::USER_AGENT.as_str());

    let decision = state
        .rate_limit_service
        .check_rate_limit(category, &identifiers)
        .await?;

    if !decision.allowed {
        state
            .violation_recorder
            .record(Violation {
                occurred_at: Utc::now(),
                category,
                path,
                method,
                ip_address: identifiers.ip_address.clone(),
                user_hint: identifiers.user_hint.clone(),
                user_agent,
                limit: decision.limit,
                retry_after_seconds: decision.retry_after_seconds,
            })
            .await;

        return Ok(rate_limited_response(category.config().message, &decision));
    }

    let mut response = next.run(request).await;

    if let Ok(status) = state.rate_limit_service.status(category, &identifiers).await {
        apply_quota_headers(response.headers_mut(), &status);
    }

    Ok(response)
}

/// Extracts the bucketing identifiers for a request.
pub fn extract_identifiers(headers: &HeaderMap) -> RequestIdentifiers {
    RequestIdentifiers {
        user_hint: identity_hint(headers),
        ip_address: client_ip(headers),
    }
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded_hop = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    if forwarded_hop.is_some() {
        return forwarded_hop;
    }

    IP_HEADERS
        .iter()
        .find_map(|header_name| header_value(headers, header_name))
}

fn header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

/// Best-effort identity hint from the session cookie.
///
/// The token payload is decoded without signature verification: good enough
/// to pick a bucket, never good enough to authorize anything. Any parse
/// failure simply yields no hint.
fn identity_hint(headers: &HeaderMap) -> Option<IdentityHint> {
    let token = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_owned())?;

    let payload_segment = token.split('.').nth(1)?;
    let payload = URL_SAFE_NO_PAD.decode(payload_segment).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&payload).ok()?;

    claims
        .get("sub")
        .and_then(serde_json::Value::as_str)
        .and_then(IdentityHint::new)
}

fn rate_limited_response(message: &str, decision: &RateLimitDecision) -> Response {
    let payload = Json(RateLimitExceededResponse {
        error: "Too Many Requests",
        message: message.to_owned(),
        retry_after: decision.retry_after_seconds,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, payload).into_response();
    apply_quota_headers(response.headers_mut(), decision);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_seconds));

    response
}

fn apply_quota_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_epoch_seconds));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
    use axum::middleware::from_fn_with_state;
    use axum::routing::{get, post};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use caseline_application::{RateLimitService, ViolationRecorder};
    use caseline_infrastructure::InMemoryWindowCounter;
    use tower::ServiceExt;

    use crate::state::AppState;

    use super::{admission_control, client_ip, identity_hint};

    fn header_map(entries: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in entries {
            let value = HeaderValue::from_str(value);
            assert!(value.is_ok());
            if let (Ok(name), Ok(value)) =
                (name.parse::<axum::http::HeaderName>(), value)
            {
                headers.append(name, value);
            }
        }

        headers
    }

    #[test]
    fn forwarded_for_first_hop_wins() {
        let headers = header_map(&[
            ("x-forwarded-for", "203.0.113.10, 10.0.0.2, 10.0.0.3"),
            ("x-real-ip", "198.51.100.7"),
        ]);

        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.10"));
    }

    #[test]
    fn single_address_headers_follow_in_order() {
        let headers = header_map(&[
            ("cf-connecting-ip", "198.51.100.7"),
            ("fly-client-ip", "192.0.2.9"),
        ]);

        assert_eq!(client_ip(&headers).as_deref(), Some("198.51.100.7"));
    }

    #[test]
    fn missing_address_headers_yield_none() {
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn identity_hint_decodes_an_unverified_subject() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"user-7","role":"admin"}"#);
        let cookie = format!("theme=dark; caseline_session=header.{payload}.signature");
        let headers = header_map(&[(header::COOKIE.as_str(), cookie.as_str())]);

        let hint = identity_hint(&headers);
        assert_eq!(hint.map(|value| value.as_str().to_owned()), Some("user-7".to_owned()));
    }

    #[test]
    fn malformed_session_tokens_yield_no_hint() {
        let headers = header_map(&[(header::COOKIE.as_str(), "caseline_session=not-a-token")]);
        assert!(identity_hint(&headers).is_none());

        let headers = header_map(&[(header::COOKIE.as_str(), "caseline_session=a.!!!.c")]);
        assert!(identity_hint(&headers).is_none());
    }

    fn test_state() -> AppState {
        AppState {
            rate_limit_service: RateLimitService::new(
                None,
                Arc::new(InMemoryWindowCounter::new()),
            ),
            violation_recorder: Arc::new(ViolationRecorder::new()),
        }
    }

    fn test_router(state: AppState) -> Router {
        Router::new()
            .route("/api/auth/login", post(|| async { "ok" }))
            .route("/api/clients", get(|| async { "ok" }))
            .fallback(|| async { "ok" })
            .layer(from_fn_with_state(state.clone(), admission_control))
            .with_state(state)
    }

    fn login_request(ip: &str) -> Request<Body> {
        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header("x-forwarded-for", ip)
            .body(Body::empty());
        assert!(request.is_ok());
        request.unwrap_or_else(|_| unreachable!())
    }

    #[tokio::test]
    async fn eleventh_login_attempt_is_denied_with_quota_headers() {
        let state = test_state();
        let app = test_router(state.clone());

        for attempt in 0..10 {
            let response = app.clone().oneshot(login_request("203.0.113.10")).await;
            assert!(response.is_ok());

            let response = response.unwrap_or_else(|_| unreachable!());
            assert_eq!(response.status(), StatusCode::OK);

            let remaining = response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u32>().ok());
            assert_eq!(remaining, Some(9 - attempt));
        }

        let denied = app.clone().oneshot(login_request("203.0.113.10")).await;
        assert!(denied.is_ok());

        let denied = denied.unwrap_or_else(|_| unreachable!());
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(denied.headers().get(header::RETRY_AFTER).is_some());
        assert_eq!(
            denied
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|value| value.to_str().ok()),
            Some("0")
        );

        let body = axum::body::to_bytes(denied.into_body(), usize::MAX).await;
        assert!(body.is_ok());

        let body: serde_json::Value =
            serde_json::from_slice(&body.unwrap_or_default()).unwrap_or_default();
        assert_eq!(body["error"], "Too Many Requests");

        let retry_after = body["retryAfter"].as_u64().unwrap_or(0);
        assert!((1..=900).contains(&retry_after));

        assert_eq!(state.violation_recorder.len().await, 1);
    }

    #[tokio::test]
    async fn callers_without_identifiers_share_the_anonymous_bucket() {
        let state = test_state();
        let app = test_router(state.clone());

        for _ in 0..10 {
            let request = Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .body(Body::empty());
            assert!(request.is_ok());

            let response = app
                .clone()
                .oneshot(request.unwrap_or_else(|_| unreachable!()))
                .await;
            assert!(response.is_ok());
            assert_eq!(
                response.unwrap_or_else(|_| unreachable!()).status(),
                StatusCode::OK
            );
        }

        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .body(Body::empty());
        assert!(request.is_ok());

        let denied = app
            .clone()
            .oneshot(request.unwrap_or_else(|_| unreachable!()))
            .await;
        assert!(denied.is_ok());
        assert_eq!(
            denied.unwrap_or_else(|_| unreachable!()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn excluded_paths_never_deny_and_never_record() {
        let state = test_state();
        let app = test_router(state.clone());

        for _ in 0..50 {
            let request = Request::builder()
                .uri("/static/app.css")
                .body(Body::empty());
            assert!(request.is_ok());

            let response = app
                .clone()
                .oneshot(request.unwrap_or_else(|_| unreachable!()))
                .await;
            assert!(response.is_ok());

            let response = response.unwrap_or_else(|_| unreachable!());
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("x-ratelimit-limit").is_none());
        }

        assert!(state.violation_recorder.is_empty().await);
    }

    #[tokio::test]
    async fn allowed_api_requests_carry_quota_headers() {
        let state = test_state();
        let app = test_router(state);

        let request = Request::builder()
            .uri("/api/clients")
            .header("x-forwarded-for", "203.0.113.10")
            .body(Body::empty());
        assert!(request.is_ok());

        let response = app
            .oneshot(request.unwrap_or_else(|_| unreachable!()))
            .await;
        assert!(response.is_ok());

        let response = response.unwrap_or_else(|_| unreachable!());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("x-ratelimit-limit")
                .and_then(|value| value.to_str().ok()),
            Some("300")
        );
        assert_eq!(
            response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|value| value.to_str().ok()),
            Some("299")
        );
        assert!(response.headers().get("x-ratelimit-reset").is_some());
    }
}
