use serde::{Deserialize, Serialize};

/// Best-effort caller identifier extracted from an unverified token payload.
///
/// This value is a bucketing hint for admission control only. It is never
/// checked against a signature and must not influence authorization
/// decisions; a verified session principal is a different type owned by the
/// authentication stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityHint(String);

impl IdentityHint {
    /// Wraps a raw subject value. Returns `None` for empty or
    /// whitespace-only input.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return None;
        }

        Some(Self(value))
    }

    /// Returns the underlying subject value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::IdentityHint;

    #[test]
    fn hint_rejects_whitespace() {
        assert!(IdentityHint::new("   ").is_none());
        assert!(IdentityHint::new("").is_none());
    }

    #[test]
    fn hint_preserves_subject() {
        let hint = IdentityHint::new("user-42");
        assert!(hint.is_some());
        assert_eq!(hint.map(|value| value.as_str().to_owned()), Some("user-42".to_owned()));
    }
}
