//! Application services and ports for admission control.

#![forbid(unsafe_code)]

mod rate_limit_service;
mod violation_service;

pub use rate_limit_service::{
    RateLimitDecision, RateLimitService, RequestIdentifiers, WindowCounter, WindowSnapshot,
};
pub use violation_service::{
    AuditFlusher, AuditRecord, AuditSink, RATE_LIMIT_VIOLATION_ACTION, ViolationRecorder,
};
