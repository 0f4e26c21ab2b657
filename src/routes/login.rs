//! Login endpoint
//!
//! `POST /api/login` with `{email, password}`. Credentials are checked by the
//! identity authority; on success a custom token for the identity is
//! returned as `{token}`.

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{cors_preflight, error_response, json_response, parse_json_body, BoxBody};
use crate::backend::IdentityAuthority;
use crate::types::{AuthErrorKind, CrmError};

pub const LOGIN_PATH: &str = "/api/login";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Route requests for the login path; `None` for any other path
pub async fn handle_login_request<B>(
    req: Request<B>,
    authority: &dyn IdentityAuthority,
) -> Option<Response<BoxBody>>
where
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let path = req.uri().path();
    if path.trim_end_matches('/') != LOGIN_PATH {
        return None;
    }

    let response = match *req.method() {
        Method::OPTIONS => cors_preflight(),
        Method::POST => handle_login(req, authority).await,
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
    };
    Some(response)
}

async fn handle_login<B>(req: Request<B>, authority: &dyn IdentityAuthority) -> Response<BoxBody>
where
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let body: LoginRequest = match parse_json_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let email = body.email.trim();
    if email.is_empty() || body.password.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Email and password are required.");
    }

    let uid = match authority.verify_credentials(email, &body.password).await {
        Ok(uid) => uid,
        Err(CrmError::Auth(kind)) if kind != AuthErrorKind::Generic => {
            warn!("Login failed for {}: {:?}", email, kind);
            let status = CrmError::Auth(kind).status_code();
            return error_response(status, kind.message());
        }
        Err(e) => {
            warn!("Login error for {}: {}", email, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed.");
        }
    };

    match authority.mint_token(&uid) {
        Ok(token) => {
            info!("Issued login token for {}", uid);
            json_response(StatusCode::OK, &LoginResponse { token })
        }
        Err(e) => {
            warn!("Token minting failed for {}: {}", uid, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed.")
        }
    }
}
