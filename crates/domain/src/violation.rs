use caseline_core::IdentityHint;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Category;

/// A single admission denial, recorded for audit purposes only.
///
/// Violations are created on the deny path and live in a bounded in-process
/// buffer until the audit flusher drains them; they never feed back into the
/// admission decision itself.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    /// When the denial happened.
    pub occurred_at: DateTime<Utc>,
    /// Category whose limit was exceeded.
    pub category: Category,
    /// Request path that was denied.
    pub path: String,
    /// Request method that was denied.
    pub method: String,
    /// Client address, when one could be extracted.
    pub ip_address: Option<String>,
    /// Unverified caller identity hint, when one was present.
    pub user_hint: Option<IdentityHint>,
    /// Client user agent, when sent.
    pub user_agent: Option<String>,
    /// Limit that was in force at the time of the denial.
    pub limit: u32,
    /// Seconds the caller was told to wait.
    pub retry_after_seconds: u64,
}

/// Audit-review priority derived from a violation's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Routine throttling.
    Low,
    /// Sustained pressure or sensitive resource use.
    Medium,
    /// Credential-attack shaped traffic.
    High,
}

impl ViolationSeverity {
    /// Returns a stable storage value for this severity.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl Violation {
    /// Classifies this violation for audit review.
    ///
    /// Authentication denials always rank high. Upload denials and long
    /// lockouts rank medium; everything else is routine.
    #[must_use]
    pub fn severity(&self) -> ViolationSeverity {
        match self.category {
            Category::Authentication => ViolationSeverity::High,
            Category::FileUpload => ViolationSeverity::Medium,
            _ if self.retry_after_seconds > 300 => ViolationSeverity::Medium,
            _ => ViolationSeverity::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Category, Violation, ViolationSeverity};

    fn violation(category: Category, retry_after_seconds: u64) -> Violation {
        Violation {
            occurred_at: Utc::now(),
            category,
            path: "/api/clients".to_owned(),
            method: "GET".to_owned(),
            ip_address: Some("203.0.113.10".to_owned()),
            user_hint: None,
            user_agent: None,
            limit: category.config().limit,
            retry_after_seconds,
        }
    }

    #[test]
    fn authentication_denials_are_high() {
        assert_eq!(
            violation(Category::Authentication, 30).severity(),
            ViolationSeverity::High
        );
    }

    #[test]
    fn upload_denials_are_medium() {
        assert_eq!(
            violation(Category::FileUpload, 30).severity(),
            ViolationSeverity::Medium
        );
    }

    #[test]
    fn long_lockouts_are_medium() {
        assert_eq!(
            violation(Category::Api, 301).severity(),
            ViolationSeverity::Medium
        );
        assert_eq!(
            violation(Category::Webhook, 600).severity(),
            ViolationSeverity::Medium
        );
    }

    #[test]
    fn short_api_denials_are_low() {
        assert_eq!(violation(Category::Api, 60).severity(), ViolationSeverity::Low);
        assert_eq!(
            violation(Category::Public, 300).severity(),
            ViolationSeverity::Low
        );
    }

    #[test]
    fn severity_orders_low_to_high() {
        assert!(ViolationSeverity::Low < ViolationSeverity::Medium);
        assert!(ViolationSeverity::Medium < ViolationSeverity::High);
    }
}
