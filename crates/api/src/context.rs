use comptoir_auth::{PrincipalId, Role};
use comptoir_core::UserId;
use comptoir_store::ActorContext;

/// Principal context for a request (authenticated identity + roles).
///
/// This is immutable and must be present for all domain routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self {
            principal_id,
            roles,
        }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// The actor as the engine sees it.
    pub fn actor(&self) -> ActorContext {
        ActorContext {
            user_id: Some(UserId::from_uuid(*self.principal_id.as_uuid())),
            roles: self.roles.to_vec(),
        }
    }
}
