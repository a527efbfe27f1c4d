//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router dispatching on virtual host
//! - Wire up middleware (timeout, request id, tracing)
//! - Serve a std listener through axum-server with a given acceptor
//! - Apply the header read timeout to HTTP/1 connections
//!
//! HTTP/1.1 and HTTP/2 are both served; axum-server's connection builder
//! negotiates them (ALPN under TLS, preface detection in plaintext).

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum_server::{Handle, Server};
use hyper_util::rt::TokioTimer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::TimeoutConfig;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, RequestExt};
use crate::net::connection::PlainAcceptor;
use crate::net::tls::TlsAcceptor;
use crate::observability::metrics;
use crate::routing::{Site, VirtualHosts};

/// Application state injected into the dispatcher.
#[derive(Clone)]
pub struct AppState {
    pub vhosts: Arc<VirtualHosts>,
    /// Requests on this router arrived over TLS.
    pub https: bool,
}

/// Build the application router for one listener kind.
///
/// A response not ready within `write_secs` is answered with 504.
pub fn build_app(vhosts: Arc<VirtualHosts>, https: bool, timeouts: &TimeoutConfig) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(AppState { vhosts, https })
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            Duration::from_secs(timeouts.write_secs),
        ))
        .layer(propagate_request_id_layer())
        .layer(set_request_id_layer())
        .layer(TraceLayer::new_for_http())
}

/// Route a request to its virtual host.
async fn dispatch(State(state): State<AppState>, req: Request<Body>) -> Response {
    let Some(host) = req.virtual_host() else {
        tracing::debug!(request_id = %req.request_id(), "Request without host");
        metrics::record_request("none", StatusCode::NOT_FOUND.as_u16());
        return (StatusCode::NOT_FOUND, "404 page not found\n").into_response();
    };

    let Some((name, site)) = state.vhosts.lookup(&host) else {
        tracing::debug!(request_id = %req.request_id(), host = %host, "Unknown virtual host");
        metrics::record_request("none", StatusCode::NOT_FOUND.as_u16());
        return (StatusCode::NOT_FOUND, "404 page not found\n").into_response();
    };

    let response = match site {
        Site::Proxy(proxy) => proxy.forward(req, state.https).await,
        Site::Services(chain) => chain.serve(name, &req),
    };

    metrics::record_request(name, response.status().as_u16());
    response
}

/// One axum-server instance bound to an already open listener.
pub struct HttpServer {
    name: &'static str,
    app: Router,
    handle: Handle,
    read_timeout: Duration,
    idle_timeout: Duration,
}

impl HttpServer {
    /// `name` labels the server in logs (`https`, `http`, `redirect`).
    pub fn new(name: &'static str, app: Router, handle: Handle, timeouts: &TimeoutConfig) -> Self {
        Self {
            name,
            app,
            handle,
            read_timeout: Duration::from_secs(timeouts.read_secs),
            idle_timeout: Duration::from_secs(timeouts.idle_secs),
        }
    }

    /// Serve plaintext HTTP until the handle shuts down.
    pub async fn serve_plain(self, listener: std::net::TcpListener) -> io::Result<()> {
        let addr = listener.local_addr()?;
        let server = self.configure(
            axum_server::from_tcp(listener).acceptor(PlainAcceptor::new(self.idle_timeout)),
        );

        tracing::info!(server = self.name, address = %addr, "HTTP server starting");
        server
            .serve(self.app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
        tracing::info!(server = self.name, "HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS through `acceptor` until the handle shuts down.
    pub async fn serve_tls(
        self,
        listener: std::net::TcpListener,
        acceptor: TlsAcceptor,
    ) -> io::Result<()> {
        let addr = listener.local_addr()?;
        let server = self.configure(axum_server::from_tcp(listener).acceptor(acceptor));

        tracing::info!(server = self.name, address = %addr, "HTTPS server starting");
        server
            .serve(self.app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
        tracing::info!(server = self.name, "HTTPS server stopped");
        Ok(())
    }

    fn configure<A>(&self, server: Server<A>) -> Server<A> {
        let mut server = server.handle(self.handle.clone());
        server
            .http_builder()
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.read_timeout);
        server
    }
}
