//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_window_counter;
mod redis_window_counter;
mod tracing_audit_sink;

pub use in_memory_window_counter::InMemoryWindowCounter;
pub use redis_window_counter::RedisWindowCounter;
pub use tracing_audit_sink::TracingAuditSink;
