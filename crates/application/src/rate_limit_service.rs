//! Sliding-window admission control.
//!
//! The service owns no window state itself: counting lives behind the
//! [`WindowCounter`] port, with a shared store adapter preferred and a
//! process-local adapter as the degraded fallback. Follows OWASP Credential
//! Stuffing Prevention cheat sheet recommendations for per-IP and
//! per-account throttling.

mod ports;
mod service;

pub use ports::{WindowCounter, WindowSnapshot};
pub use service::{RateLimitDecision, RateLimitService, RequestIdentifiers};
