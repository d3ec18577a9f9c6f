use std::sync::Arc;

use caseline_application::{RateLimitService, ViolationRecorder};

/// Shared application state.
///
/// Constructed once in `main` and cloned into the router; nothing here is
/// re-created per request.
#[derive(Clone)]
pub struct AppState {
    pub rate_limit_service: RateLimitService,
    pub violation_recorder: Arc<ViolationRecorder>,
}
