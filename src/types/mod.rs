//! Shared types

mod email;
mod error;

pub use email::looks_like_email;
pub use error::{AuthErrorKind, CrmError, FieldError, Result};
