//! Error types for Salesdesk
//!
//! Every failure degrades a single screen or operation; nothing here is
//! fatal to the process.

use hyper::StatusCode;
use serde::Serialize;
use std::fmt;

/// A single failed form constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Authentication failure categories surfaced to users
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    InvalidCredentials,
    TooManyAttempts,
    InvalidEmail,
    Generic,
}

impl AuthErrorKind {
    /// Map an identity-authority error code onto a user-facing category.
    ///
    /// Accepts both the SDK style (`auth/wrong-password`) and the REST style
    /// (`INVALID_PASSWORD`, `TOO_MANY_ATTEMPTS_TRY_LATER : ...`).
    pub fn from_code(code: &str) -> Self {
        let code = code.split(':').next().unwrap_or(code).trim();
        match code {
            "auth/invalid-credential"
            | "auth/wrong-password"
            | "auth/user-not-found"
            | "auth/invalid-login-credentials"
            | "INVALID_PASSWORD"
            | "EMAIL_NOT_FOUND"
            | "INVALID_LOGIN_CREDENTIALS"
            | "USER_DISABLED" => Self::InvalidCredentials,
            "auth/too-many-requests" | "TOO_MANY_ATTEMPTS_TRY_LATER" => Self::TooManyAttempts,
            "auth/invalid-email" | "INVALID_EMAIL" => Self::InvalidEmail,
            _ => Self::Generic,
        }
    }

    /// User-facing message
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid credentials.",
            Self::TooManyAttempts => "Too many login attempts. Please try again later.",
            Self::InvalidEmail => "The email address is not valid.",
            Self::Generic => "Authentication failed.",
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Main error type for Salesdesk operations
#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("Validation failed: {}", format_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Authentication error: {0}")]
    Auth(AuthErrorKind),

    #[error("Write failed: {0}")]
    BackendWrite(String),

    #[error("Read failed: {0}")]
    BackendRead(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl CrmError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(AuthErrorKind::TooManyAttempts) => StatusCode::TOO_MANY_REQUESTS,
            Self::Auth(AuthErrorKind::Generic) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BackendWrite(_) | Self::BackendRead(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Generation(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shorthand for an authentication failure from an authority code
    pub fn auth_code(code: &str) -> Self {
        Self::Auth(AuthErrorKind::from_code(code))
    }
}

impl From<std::io::Error> for CrmError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for CrmError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for CrmError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Internal(format!("Token error: {}", err))
    }
}

/// Result type alias for Salesdesk operations
pub type Result<T> = std::result::Result<T, CrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_code_mapping() {
        assert_eq!(
            AuthErrorKind::from_code("auth/wrong-password"),
            AuthErrorKind::InvalidCredentials
        );
        assert_eq!(
            AuthErrorKind::from_code("INVALID_LOGIN_CREDENTIALS"),
            AuthErrorKind::InvalidCredentials
        );
        assert_eq!(
            AuthErrorKind::from_code("TOO_MANY_ATTEMPTS_TRY_LATER : Access disabled"),
            AuthErrorKind::TooManyAttempts
        );
        assert_eq!(
            AuthErrorKind::from_code("auth/invalid-email"),
            AuthErrorKind::InvalidEmail
        );
        assert_eq!(
            AuthErrorKind::from_code("auth/network-request-failed"),
            AuthErrorKind::Generic
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            CrmError::Auth(AuthErrorKind::InvalidCredentials).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            CrmError::Auth(AuthErrorKind::TooManyAttempts).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            CrmError::Validation(vec![]).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_validation_display() {
        let err = CrmError::Validation(vec![
            FieldError::new("email", "required"),
            FieldError::new("value", "must be non-negative"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: email: required, value: must be non-negative"
        );
    }
}
