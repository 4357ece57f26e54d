//! Authentication module

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtVerifier};
pub use middleware::{require_auth, require_superadmin, AuthError, AuthUser};
