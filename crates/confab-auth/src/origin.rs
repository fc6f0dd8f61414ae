//! WebSocket origin allowlist.

use crate::error::AuthError;

/// Optional allowlist for the `Origin` header on WebSocket upgrades. An
/// empty policy accepts every origin.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Option<Vec<String>>,
}

impl OriginPolicy {
    pub fn allow_any() -> Self {
        Self { allowed: None }
    }

    pub fn allowlist(origins: Vec<String>) -> Self {
        if origins.is_empty() {
            Self::allow_any()
        } else {
            Self {
                allowed: Some(origins),
            }
        }
    }

    pub fn check(&self, origin: Option<&str>) -> Result<(), AuthError> {
        let Some(allowed) = &self.allowed else {
            return Ok(());
        };
        match origin {
            Some(origin) if allowed.iter().any(|a| a == origin) => Ok(()),
            Some(origin) => Err(AuthError::OriginDenied(origin.to_string())),
            None => Err(AuthError::OriginDenied("<missing>".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_policy_accepts_everything() {
        let policy = OriginPolicy::allow_any();
        assert!(policy.check(None).is_ok());
        assert!(policy.check(Some("https://evil.example")).is_ok());
    }

    #[test]
    fn allowlist_filters_origins() {
        let policy = OriginPolicy::allowlist(vec!["https://chat.example.com".to_string()]);
        assert!(policy.check(Some("https://chat.example.com")).is_ok());
        assert!(policy.check(Some("https://evil.example")).is_err());
        assert!(policy.check(None).is_err());
    }
}
