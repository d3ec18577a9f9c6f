//! Log-based audit sink for deployments without a wired audit store.

use async_trait::async_trait;
use caseline_application::{AuditRecord, AuditSink};
use caseline_core::AppResult;
use tracing::info;

/// Audit sink that emits records as structured log events.
///
/// Stands in wherever the surrounding system has not supplied a persistent
/// sink; the records land in the service logs instead of disappearing.
#[derive(Debug, Clone, Copy)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    /// Creates a new tracing audit sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> AppResult<()> {
        info!(
            org_id = %record.org_id,
            user_id = record.user_id.as_deref().unwrap_or("-"),
            action = %record.action,
            resource = %record.resource,
            resource_id = %record.resource_id,
            ip_address = record.ip_address.as_deref().unwrap_or("-"),
            details = %record.details,
            "audit record"
        );

        Ok(())
    }
}
