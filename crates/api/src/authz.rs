//! API-side authorization guard.
//!
//! Enforced at the request boundary (before the engine is touched); domain
//! rules such as the status-transition whitelist stay in the domain layer.

use comptoir_auth::{Membership, Permission, Principal, Role, authorize};

use crate::context::PrincipalContext;
use crate::errors::ApiError;

/// Check that the request's principal holds `permission`.
pub fn require(principal: &PrincipalContext, permission: &str) -> Result<(), ApiError> {
    let membership = Membership {
        roles: principal.roles().to_vec(),
        permissions: permissions_from_roles(principal.roles()),
    };
    let resolved = Principal {
        principal_id: principal.principal_id(),
        membership,
    };

    authorize(&resolved, &Permission::new(permission.to_string()))
        .map_err(|e| ApiError::forbidden(e.to_string()))
}

/// Role to permission mapping.
///
/// Deliberately static until a real policy source exists (e.g. DB-backed).
fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    let mut permissions = Vec::new();
    for role in roles {
        match role.as_str() {
            Role::ADMIN => return vec![Permission::new("*")],
            Role::MANAGER => permissions.extend(
                [
                    "orders.read",
                    "orders.create",
                    "orders.update",
                    "orders.delete",
                    "orders.pay",
                    "orders.invoice",
                    "stock.read",
                    "stock.adjust",
                ]
                .map(Permission::new),
            ),
            Role::EMPLOYEE => permissions.extend(
                [
                    "orders.read",
                    "orders.create",
                    "orders.update",
                    "orders.pay",
                    "orders.invoice",
                    "stock.read",
                ]
                .map(Permission::new),
            ),
            _ => {}
        }
    }
    permissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use comptoir_auth::PrincipalId;

    fn ctx(role: Role) -> PrincipalContext {
        PrincipalContext::new(PrincipalId::new(), vec![role])
    }

    #[test]
    fn admin_passes_everything() {
        assert!(require(&ctx(Role::admin()), "orders.delete").is_ok());
        assert!(require(&ctx(Role::admin()), "stock.adjust").is_ok());
    }

    #[test]
    fn employee_cannot_delete_orders_or_adjust_stock() {
        assert!(require(&ctx(Role::employee()), "orders.pay").is_ok());
        assert!(require(&ctx(Role::employee()), "orders.delete").is_err());
        assert!(require(&ctx(Role::employee()), "stock.adjust").is_err());
    }

    #[test]
    fn unknown_roles_hold_nothing() {
        assert!(require(&ctx(Role::new("auditor")), "orders.read").is_err());
    }
}
