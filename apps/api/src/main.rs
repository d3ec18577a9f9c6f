//! Caseline API composition root.

#![forbid(unsafe_code)]

mod api_config;
mod dto;
mod error;
mod handlers;
mod middleware;
mod state;

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use caseline_application::{
    AuditFlusher, AuditSink, RateLimitService, ViolationRecorder, WindowCounter,
};
use caseline_core::AppError;
use caseline_domain::Category;
use caseline_infrastructure::{InMemoryWindowCounter, RedisWindowCounter, TracingAuditSink};
use tokio::time::MissedTickBehavior;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api_config::ApiConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ApiConfig::load()?;

    // A category without a sane policy must stop the boot, not default.
    Category::validate_configs()?;

    let shared_counter: Option<Arc<dyn WindowCounter>> = match config.redis_url.as_deref() {
        Some(redis_url) => {
            let client = redis::Client::open(redis_url)
                .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))?;

            Some(Arc::new(RedisWindowCounter::new(
                client,
                config.rate_limit_key_prefix.clone(),
            )))
        }
        None => {
            warn!(
                "REDIS_URL is not set; admission control enforces per-instance limits only"
            );
            None
        }
    };

    let fallback_counter = Arc::new(InMemoryWindowCounter::new());
    let rate_limit_service =
        RateLimitService::new(shared_counter, fallback_counter.clone());

    let violation_recorder = Arc::new(ViolationRecorder::new());
    let audit_sink: Arc<dyn AuditSink> = Arc::new(TracingAuditSink::new());
    let audit_flusher = AuditFlusher::new(
        violation_recorder.clone(),
        audit_sink,
        config.audit_org_id,
    );

    spawn_audit_flush_loop(audit_flusher.clone(), config.audit_flush_interval);
    spawn_fallback_sweep_loop(fallback_counter, config.fallback_sweep_interval);

    let degraded = rate_limit_service.is_permanently_degraded();
    let app_state = AppState {
        rate_limit_service,
        violation_recorder,
    };

    let app = Router::new()
        .route("/health", get(handlers::health::health_handler))
        .route("/api/health", get(handlers::health::health_handler))
        .route(
            "/api/admin/rate-limit/violations",
            get(handlers::admin::violation_summary_handler),
        )
        .route(
            "/api/admin/rate-limit/reset",
            post(handlers::admin::reset_rate_limit_handler),
        )
        .route(
            "/api/admin/rate-limit/clear",
            post(handlers::admin::clear_rate_limits_handler),
        )
        .layer(from_fn_with_state(
            app_state.clone(),
            middleware::admission_control,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let host = IpAddr::from_str(&config.api_host).map_err(|error| {
        AppError::Internal(format!("invalid API_HOST '{}': {error}", config.api_host))
    })?;
    let address = SocketAddr::from((host, config.api_port));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(%address, degraded, "caseline-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| AppError::Internal(format!("api server error: {error}")))?;

    // Final drain so violations buffered at shutdown still reach the sink.
    let delivered = audit_flusher.flush().await;
    info!(delivered, "caseline-api stopped");

    Ok(())
}

fn spawn_audit_flush_loop(flusher: AuditFlusher, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let delivered = flusher.flush().await;
            if delivered > 0 {
                info!(delivered, "flushed rate limit audit records");
            }
        }
    });
}

fn spawn_fallback_sweep_loop(counter: Arc<InMemoryWindowCounter>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            counter.sweep().await;
        }
    });
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
