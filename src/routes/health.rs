//! Health check endpoint
//!
//! `/health` always answers 200 while the process is running. The body
//! reports which backend is in use; `disabled` means every store call fails
//! until configuration is fixed.

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::time::Instant;

use super::{json_response, BoxBody};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    /// `online` or `degraded`
    pub status: &'static str,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// Backend mode: `memory`, `hosted` or `disabled`
    pub mode: &'static str,
    pub timestamp: String,
}

pub fn build_health_response(mode: &'static str, started: Instant) -> HealthResponse {
    HealthResponse {
        healthy: true,
        status: if mode == "disabled" { "degraded" } else { "online" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: started.elapsed().as_secs(),
        mode,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

pub fn health_check(mode: &'static str, started: Instant) -> Response<BoxBody> {
    json_response(StatusCode::OK, &build_health_response(mode, started))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::Value;

    #[tokio::test]
    async fn test_health_reports_mode() {
        let response = health_check("memory", Instant::now());
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["healthy"], true);
        assert_eq!(body["status"], "online");
        assert_eq!(body["mode"], "memory");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_disabled_backend_is_degraded() {
        let health = build_health_response("disabled", Instant::now());
        assert!(health.healthy);
        assert_eq!(health.status, "degraded");
    }
}
