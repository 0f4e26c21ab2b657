//! Password credentials for the in-process identity authority
//!
//! Credentials never leave the authority in plaintext form; only argon2id
//! PHC strings are kept.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::types::CrmError;

/// Minimum password length accepted when creating an identity
pub const MIN_PASSWORD_LEN: usize = 6;

/// An email/password-hash pair held by the authority
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub email: String,
    hash: String,
}

impl StoredCredential {
    /// Hash `password` for `email`
    pub fn new(email: &str, password: &str) -> Result<Self, CrmError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CrmError::Internal(format!("Failed to hash password: {e}")))?;

        Ok(Self {
            email: email.to_string(),
            hash,
        })
    }

    /// Check a candidate password against the stored hash
    pub fn matches(&self, password: &str) -> Result<bool, CrmError> {
        let parsed = PasswordHash::new(&self.hash)
            .map_err(|e| CrmError::Internal(format!("Invalid password hash format: {e}")))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}
