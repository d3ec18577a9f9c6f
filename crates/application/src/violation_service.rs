//! Violation buffering and audit flushing.
//!
//! Denials are buffered in a bounded in-process ring and periodically
//! drained, grouped, and pushed through the audit sink port. Delivery is
//! best-effort: a failed group is logged and skipped, not re-queued.

mod flusher;
mod ports;
mod recorder;

pub use flusher::{AuditFlusher, RATE_LIMIT_VIOLATION_ACTION};
pub use ports::{AuditRecord, AuditSink};
pub use recorder::ViolationRecorder;
