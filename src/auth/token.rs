//! Custom bearer tokens for verified identities
//!
//! The login endpoint exchanges verified credentials for one of these. Tokens
//! are HS256-signed and carry only the identity id; the profile is resolved
//! separately from `users/{uid}`.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::CrmError;

/// Minimum accepted signing secret length
const MIN_SECRET_LEN: usize = 32;

/// Payload stored in a custom token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Identity id the token was minted for
    pub uid: String,
    /// Issuer (the application name)
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
}

/// Mints and verifies custom tokens
#[derive(Clone)]
pub struct TokenMinter {
    secret: String,
    expiry_seconds: u64,
}

impl TokenMinter {
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: impl Into<String>, expiry_seconds: u64) -> Result<Self, CrmError> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(CrmError::Configuration(format!(
                "TOKEN_SECRET must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Minter for dev mode
    pub fn new_dev() -> Self {
        Self {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
            expiry_seconds: 3600,
        }
    }

    /// Mint a token for `uid`
    pub fn mint(&self, uid: &str) -> Result<String, CrmError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| CrmError::Internal(format!("System time error: {}", e)))?
            .as_secs();

        let claims = TokenClaims {
            uid: uid.to_string(),
            iss: env!("CARGO_PKG_NAME").to_string(),
            iat: now,
            exp: now + self.expiry_seconds,
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    /// Verify and decode a token
    pub fn verify(&self, token: &str) -> Result<TokenClaims, CrmError> {
        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}
