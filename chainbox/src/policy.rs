//! Policy (spec §4.3): role-based admission run before handler execution.

use crate::error::{ChainboxError, ChainboxResult};
use crate::types::{CapabilitySource, Identity};

pub struct Policy;

impl Policy {
    /// If the resolved `CapabilitySource` declares `allow`, the identity
    /// must be present, must carry a role, and that role must be in
    /// `allow`. Any violation fails with `FORBIDDEN` (spec §4.3).
    pub fn enforce(
        fn_name: &str,
        source: &CapabilitySource,
        identity: Option<&Identity>,
    ) -> ChainboxResult<()> {
        let allow = &source.permissions().allow;
        if allow.is_empty() {
            return Ok(());
        }
        let role = identity.and_then(|i| i.role.as_deref());
        match role {
            Some(role) if allow.iter().any(|r| r == role) => Ok(()),
            _ => Err(ChainboxError::Forbidden {
                fn_name: fn_name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Permissions;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn source_with_allow(roles: &[&str]) -> CapabilitySource {
        CapabilitySource::Native {
            handler: Arc::new(|input, _ctx| Box::pin(async move { Ok(input) })),
            permissions: Permissions {
                allow: roles.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    fn identity(role: &str) -> Identity {
        Identity {
            id: "u1".to_string(),
            email: None,
            role: Some(role.to_string()),
            token: None,
            claims: HashMap::new(),
        }
    }

    #[test]
    fn allows_when_no_restriction() {
        let source = source_with_allow(&[]);
        assert!(Policy::enforce("X", &source, None).is_ok());
    }

    #[test]
    fn denies_anonymous_when_restricted() {
        let source = source_with_allow(&["admin"]);
        assert!(Policy::enforce("X", &source, None).is_err());
    }

    #[test]
    fn denies_wrong_role() {
        let source = source_with_allow(&["admin"]);
        let id = identity("user");
        assert!(Policy::enforce("X", &source, Some(&id)).is_err());
    }

    #[test]
    fn allows_matching_role() {
        let source = source_with_allow(&["admin", "ops"]);
        let id = identity("ops");
        assert!(Policy::enforce("X", &source, Some(&id)).is_ok());
    }
}
