use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Roles are intentionally opaque strings at this layer; mapping roles to
/// permissions can be done by the caller/policy layer (often infra-backed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: &'static str = "admin";
    pub const MANAGER: &'static str = "manager";
    pub const EMPLOYEE: &'static str = "employee";

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn admin() -> Self {
        Self::new(Self::ADMIN)
    }

    pub fn manager() -> Self {
        Self::new(Self::MANAGER)
    }

    pub fn employee() -> Self {
        Self::new(Self::EMPLOYEE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Elevated roles may take orders to any finalized status; everyone else
    /// goes through the restricted transition whitelist.
    pub fn is_elevated(&self) -> bool {
        matches!(self.as_str(), Self::ADMIN | Self::MANAGER)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevation_is_limited_to_admin_and_manager() {
        assert!(Role::admin().is_elevated());
        assert!(Role::manager().is_elevated());
        assert!(!Role::employee().is_elevated());
        assert!(!Role::new("intern").is_elevated());
    }
}
