//! Identity resolution for inbound connections

pub mod jwt;

pub use jwt::{Claims, JwtIdentityResolver};

use crate::{models::UserId, Result};

/// Resolves the authenticated user behind a bearer token
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Result<UserId>;
}
