//! Identity resolution and group membership.
//!
//! Identity comes from a trusted reverse-proxy header (`X-User-Email` by
//! default); query parameters are never identity-bearing. In debug mode a
//! configured fallback identity stands in when the header is absent.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::AuthError;

/// Header carrying the authenticated user, set by the reverse proxy.
pub const IDENTITY_HEADER: &str = "x-user-email";

/// Resolve the authenticated user from the trusted header value.
pub fn resolve_identity(
    header_value: Option<&str>,
    debug_mode: bool,
    debug_fallback: &str,
) -> Result<String, AuthError> {
    match header_value.map(str::trim) {
        Some(user) if !user.is_empty() => Ok(user.to_string()),
        _ if debug_mode && !debug_fallback.is_empty() => Ok(debug_fallback.to_string()),
        _ => Err(AuthError::MissingIdentity),
    }
}

/// Pluggable group membership check.
pub trait GroupChecker: Send + Sync {
    fn is_user_in_group(&self, user: &str, group: &str) -> bool;
}

/// Grants every membership. Useful for development and tests.
#[derive(Debug, Default, Clone)]
pub struct AllowAllGroups;

impl GroupChecker for AllowAllGroups {
    fn is_user_in_group(&self, _user: &str, _group: &str) -> bool {
        true
    }
}

/// Static user -> groups table.
#[derive(Debug, Default, Clone)]
pub struct StaticGroups {
    memberships: BTreeMap<String, BTreeSet<String>>,
}

impl StaticGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, user: impl Into<String>, group: impl Into<String>) -> Self {
        self.memberships
            .entry(user.into())
            .or_default()
            .insert(group.into());
        self
    }

    /// Groups the user belongs to.
    pub fn groups_of(&self, user: &str) -> Vec<String> {
        self.memberships
            .get(user)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl GroupChecker for StaticGroups {
    fn is_user_in_group(&self, user: &str, group: &str) -> bool {
        self.memberships
            .get(user)
            .map(|groups| groups.contains(group))
            .unwrap_or(false)
    }
}

/// Admin gate for administrative operations.
pub fn require_admin(
    checker: &dyn GroupChecker,
    user: &str,
    admin_group: &str,
) -> Result<(), AuthError> {
    if checker.is_user_in_group(user, admin_group) {
        Ok(())
    } else {
        Err(AuthError::Forbidden {
            group: admin_group.to_string(),
        })
    }
}
