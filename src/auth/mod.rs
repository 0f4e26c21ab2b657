//! Authentication primitives
//!
//! Provides:
//! - Argon2 password credentials for the in-process identity authority
//! - Custom bearer token minting for the login endpoint
//! - Per-email login rate limiting

pub mod password;
pub mod rate_limit;
pub mod token;

pub use password::{StoredCredential, MIN_PASSWORD_LEN};
pub use rate_limit::LoginRateLimiter;
pub use token::{TokenClaims, TokenMinter};
