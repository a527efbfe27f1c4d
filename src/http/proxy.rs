//! Protocol-aware reverse proxy.
//!
//! # Responsibilities
//! - Classify each request as standard or tunnel (WebSocket upgrade)
//! - Rewrite requests onto the fixed backend target
//! - Stream backend responses back without buffering
//! - Map backend failures to 502 and takeover failures to 500
//!
//! # Data Flow
//! ```text
//! Request (decrypted)
//!     → classify (Connection: upgrade + Upgrade: websocket?)
//!     ├─ standard → rewrite → pooled client → Response (streamed)
//!     └─ tunnel   → rewrite → tunnel.rs (dial, 101, raw relay)
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri, Version};
use axum::response::{IntoResponse, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use url::Url;

use crate::http::request::RequestExt;
use crate::http::tunnel;
use crate::net::connection::TunnelTracker;
use crate::observability::metrics;

/// How a request is forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Ordinary request/response exchange.
    Standard,
    /// Upgrade to a raw bidirectional byte stream.
    Tunnel,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Standard => "standard",
            Mode::Tunnel => "tunnel",
        }
    }
}

/// Errors raised while proxying.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("backend {target} unreachable: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("backend connection failed: {0}")]
    Backend(#[from] hyper::Error),

    #[error("client connection cannot be taken over")]
    NotUpgradable,

    #[error("request could not be rewritten: {0}")]
    Rewrite(#[from] axum::http::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match self {
            ProxyError::Connect { .. } | ProxyError::Upstream(_) | ProxyError::Backend(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::NotUpgradable | ProxyError::Rewrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, format!("{}\n", status)).into_response()
    }
}

/// Invalid proxy target.
#[derive(Debug, Error)]
#[error("invalid proxy target {target:?}: {reason}")]
pub struct TargetError {
    target: String,
    reason: String,
}

/// Backend `host:port` a site forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    authority: Authority,
}

impl ProxyTarget {
    /// Parse an `http://host[:port]` URL.
    pub fn parse(target: &str) -> Result<Self, TargetError> {
        let err = |reason: &str| TargetError {
            target: target.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(target).map_err(|e| err(&e.to_string()))?;
        if url.scheme() != "http" {
            return Err(err("only http targets are supported"));
        }
        let host = url.host_str().ok_or_else(|| err("missing host"))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let authority = format!("{}:{}", host, port)
            .parse::<Authority>()
            .map_err(|e| err(&e.to_string()))?;
        Ok(Self { authority })
    }

    /// `host:port` to dial.
    pub fn authority(&self) -> &str {
        self.authority.as_str()
    }
}

impl std::fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "http://{}", self.authority)
    }
}

/// Returns true when the request asks for a WebSocket upgrade.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    connection_upgrade && upgrade_websocket
}

/// Classify a request.
pub fn classify(headers: &HeaderMap) -> Mode {
    if is_websocket_upgrade(headers) {
        Mode::Tunnel
    } else {
        Mode::Standard
    }
}

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

/// Reverse proxy for one site.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    target: ProxyTarget,
    client: Client<HttpConnector, Body>,
    tunnels: TunnelTracker,
    idle_timeout: Duration,
}

impl ReverseProxy {
    pub fn new(target: ProxyTarget, tunnels: TunnelTracker, idle_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            target,
            client,
            tunnels,
            idle_timeout,
        }
    }

    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }

    /// Forward `req`. `https` tells whether it arrived over TLS.
    pub async fn forward(&self, mut req: Request<Body>, https: bool) -> Response {
        let start = Instant::now();
        let mode = classify(req.headers());
        let request_id = req.request_id().to_string();

        tracing::debug!(
            request_id = %request_id,
            target = %self.target,
            mode = mode.as_str(),
            method = %req.method(),
            path = %req.uri().path(),
            "Proxying request"
        );

        let result = match self.rewrite(&mut req, mode, https) {
            Err(e) => Err(e),
            Ok(()) => match mode {
                Mode::Standard => self
                    .client
                    .request(req)
                    .await
                    .map(|res| res.map(Body::new))
                    .map_err(ProxyError::from),
                Mode::Tunnel => {
                    tunnel::open(&self.target, &self.tunnels, self.idle_timeout, req).await
                }
            },
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    target = %self.target,
                    mode = mode.as_str(),
                    error = %e,
                    "Proxy error"
                );
                e.into_response()
            }
        };

        metrics::record_proxy(mode.as_str(), response.status().as_u16(), start);
        response
    }

    /// Point the request at the target, keeping method, headers and body.
    fn rewrite(&self, req: &mut Request<Body>, mode: Mode, https: bool) -> Result<(), ProxyError> {
        let peer = req.peer_addr();
        let uri_authority = req.uri().authority().cloned();
        let path_and_query = req
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        // Tunnel requests travel on a dedicated connection in origin form.
        let uri = match mode {
            Mode::Standard => Uri::builder()
                .scheme(Scheme::HTTP)
                .authority(self.target.authority.clone())
                .path_and_query(path_and_query)
                .build()?,
            Mode::Tunnel => Uri::builder().path_and_query(path_and_query).build()?,
        };
        *req.uri_mut() = uri;
        *req.version_mut() = Version::HTTP_11;

        let headers = req.headers_mut();
        if !headers.contains_key(header::HOST) {
            let host = uri_authority
                .map(|a| a.to_string())
                .unwrap_or_else(|| self.target.authority().to_string());
            if let Ok(value) = HeaderValue::from_str(&host) {
                headers.insert(header::HOST, value);
            }
        }

        if mode == Mode::Standard {
            strip_hop_by_hop(headers);
        }

        if let Some(peer) = peer {
            append_forwarded_for(headers, peer);
        }
        if https {
            headers.insert(
                HeaderName::from_static("x-forwarded-proto"),
                HeaderValue::from_static("https"),
            );
        }
        Ok(())
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let name = HeaderName::from_static("x-forwarded-for");
    let ip = peer.ip().to_string();
    let value = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{}, {}", prior, ip),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}
