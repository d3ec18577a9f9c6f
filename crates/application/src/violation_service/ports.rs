use async_trait::async_trait;

use caseline_core::{AppResult, OrgId};
use serde_json::Value;

/// One audit entry produced by the violation flusher.
///
/// Persistence is owned by the consuming system; this subsystem only
/// produces records and hands them to the sink.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Organization scope for the record.
    pub org_id: OrgId,
    /// Caller identity hint, when the representative violation carried one.
    pub user_id: Option<String>,
    /// Stable action identifier.
    pub action: String,
    /// Resource kind targeted by the action.
    pub resource: String,
    /// Stable resource identifier.
    pub resource_id: String,
    /// Structured detail payload.
    pub details: Value,
    /// Client address shared by the violation group.
    pub ip_address: Option<String>,
    /// User agent of the representative violation.
    pub user_agent: Option<String>,
}

/// Port for delivering audit records to the surrounding system.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Delivers one audit record. Failures are per-record; the caller
    /// decides whether to continue.
    async fn record(&self, record: AuditRecord) -> AppResult<()>;
}
