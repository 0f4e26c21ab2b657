//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo; one task per connection.

use bytes::Bytes;
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::app::App;
use crate::routes::{self, BoxBody};
use crate::types::Result;

/// Serve the login and health endpoints until the process exits
pub async fn run(app: Arc<App>) -> Result<()> {
    let listener = TcpListener::bind(app.args.listen).await?;

    info!("Salesdesk listening on {} (backend: {})", app.args.listen, app.backend.mode);
    if app.args.dev_mode {
        warn!("Development mode enabled - in-process backend, data is not persisted");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let app = Arc::clone(&app);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let app = Arc::clone(&app);
                        async move { handle_request(app, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
pub async fn handle_request<B>(
    app: Arc<App>,
    addr: SocketAddr,
    req: Request<B>,
) -> std::result::Result<Response<BoxBody>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    if let Some(response) =
        routes::handle_login_request(req, app.backend.identity.as_ref()).await
    {
        return Ok(response);
    }

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(app.backend.mode, app.started)
        }
        (Method::OPTIONS, _) => routes::cors_preflight(),
        _ => routes::not_found(&path),
    };
    Ok(response)
}
