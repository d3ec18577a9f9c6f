//! Domain entities and invariants for admission control.

#![forbid(unsafe_code)]

mod category;
mod routes;
mod violation;

pub use category::{Category, RateLimitConfig};
pub use routes::{RouteRule, is_excluded_path, resolve_category};
pub use violation::{Violation, ViolationSeverity};
