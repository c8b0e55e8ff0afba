//! `comptoir-auth` — authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage. Token
//! issuance is out of scope; only verification of presented tokens and pure
//! policy checks live here.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use permissions::Permission;
pub use principal::{Membership, PrincipalId};
pub use roles::Role;
