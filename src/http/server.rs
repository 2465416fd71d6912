//! Per-connection HTTP serving.
//!
//! # Responsibilities
//! - Speak HTTP/1.1 or HTTP/2 on an established stream (plain or TLS)
//! - Dispatch every request to the wrapped application router
//! - Expose the client address to handlers as `ConnectInfo`

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tower::ServiceExt;

/// Boxed error returned by the connection driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Serve requests on `io` until the client closes the connection.
pub async fn serve_connection<I>(io: I, peer: SocketAddr, router: Router) -> Result<(), BoxError>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        router.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    builder.serve_connection(TokioIo::new(io), service).await
}
