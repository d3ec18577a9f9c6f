use std::collections::BTreeMap;
use std::sync::Arc;

use caseline_core::OrgId;
use caseline_domain::Violation;
use serde_json::json;
use tracing::warn;

use super::ports::{AuditRecord, AuditSink};
use super::recorder::ViolationRecorder;

/// Stable action identifier for admission-denial audit records.
pub const RATE_LIMIT_VIOLATION_ACTION: &str = "rate_limit.violation";

const RATE_LIMIT_RESOURCE: &str = "rate_limit";

/// Group key used when a violation carries no client address.
const UNKNOWN_IP_GROUP: &str = "unknown";

/// Drains buffered violations and emits grouped audit records.
#[derive(Clone)]
pub struct AuditFlusher {
    recorder: Arc<ViolationRecorder>,
    sink: Arc<dyn AuditSink>,
    org_id: OrgId,
}

impl AuditFlusher {
    /// Creates a flusher over the shared recorder and the supplied sink.
    #[must_use]
    pub fn new(recorder: Arc<ViolationRecorder>, sink: Arc<dyn AuditSink>, org_id: OrgId) -> Self {
        Self {
            recorder,
            sink,
            org_id,
        }
    }

    /// Drains the buffer, groups violations by client address, and pushes
    /// one record per group through the sink.
    ///
    /// A sink failure skips that group and continues with the rest;
    /// delivery is best-effort and failed groups are not re-queued. Returns
    /// the number of records delivered.
    pub async fn flush(&self) -> usize {
        let violations = self.recorder.drain().await;
        if violations.is_empty() {
            return 0;
        }

        let mut groups: BTreeMap<String, Vec<Violation>> = BTreeMap::new();
        for violation in violations {
            let group_key = violation
                .ip_address
                .clone()
                .unwrap_or_else(|| UNKNOWN_IP_GROUP.to_owned());
            groups.entry(group_key).or_default().push(violation);
        }

        let mut delivered = 0;
        for (ip_group, group) in groups {
            let record = build_group_record(self.org_id, &ip_group, &group);

            match self.sink.record(record).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!(
                        ip = %ip_group,
                        violation_count = group.len(),
                        error = %error,
                        "failed to deliver rate limit audit record"
                    );
                }
            }
        }

        delivered
    }
}

fn build_group_record(org_id: OrgId, ip_group: &str, group: &[Violation]) -> AuditRecord {
    // Representative: most severe, earliest recorded on ties.
    let mut representative = &group[0];
    for violation in &group[1..] {
        if violation.severity() > representative.severity() {
            representative = violation;
        }
    }

    let mut categories: Vec<&'static str> = group
        .iter()
        .map(|violation| violation.category.as_str())
        .collect();
    categories.sort_unstable();
    categories.dedup();

    AuditRecord {
        org_id,
        user_id: representative
            .user_hint
            .as_ref()
            .map(|hint| hint.as_str().to_owned()),
        action: RATE_LIMIT_VIOLATION_ACTION.to_owned(),
        resource: RATE_LIMIT_RESOURCE.to_owned(),
        resource_id: representative.category.as_str().to_owned(),
        details: json!({
            "path": representative.path,
            "method": representative.method,
            "limit": representative.limit,
            "retry_after_seconds": representative.retry_after_seconds,
            "severity": representative.severity().as_str(),
            "violation_count": group.len(),
            "categories": categories,
        }),
        ip_address: (ip_group != UNKNOWN_IP_GROUP).then(|| ip_group.to_owned()),
        user_agent: representative.user_agent.clone(),
    }
}
