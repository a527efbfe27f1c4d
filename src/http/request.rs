//! Request inspection helpers and request-id layers.
//!
//! # Responsibilities
//! - Attach an `x-request-id` to every request and echo it on the response
//! - Extract the virtual host a request addresses
//! - Recover the peer address recorded by the server

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderName, Request};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

/// Header carrying the request id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Layer assigning a UUID v4 request id when the client sent none.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer copying the request id onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// Access to per-request metadata.
pub trait RequestExt {
    /// The request id, if the layer ran.
    fn request_id(&self) -> &str;

    /// Host the request addresses: Host header or URI authority,
    /// port removed, lowercased, trailing dot dropped.
    fn virtual_host(&self) -> Option<String>;

    /// Client address as recorded by the server.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

impl RequestExt for Request<Body> {
    fn request_id(&self) -> &str {
        self.headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }

    fn virtual_host(&self) -> Option<String> {
        let raw = self
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| self.uri().authority().map(|a| a.as_str()))?;
        normalize_authority(raw)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr)
    }
}

/// Strip the port (and IPv6 brackets) from an authority and normalize case.
pub fn normalize_authority(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let host = if let Some(rest) = raw.strip_prefix('[') {
        rest.split(']').next()?
    } else {
        raw.rsplit_once(':')
            .filter(|(_, port)| port.bytes().all(|b| b.is_ascii_digit()))
            .map(|(host, _)| host)
            .unwrap_or(raw)
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_header_wins() {
        let req = Request::builder()
            .uri("http://ignored.example/")
            .header("Host", "Drone.Example.org:443")
            .body(Body::empty())
            .unwrap();
        assert_eq!(req.virtual_host().as_deref(), Some("drone.example.org"));
    }

    #[test]
    fn falls_back_to_authority() {
        let req = Request::builder()
            .uri("https://example.org./path")
            .body(Body::empty())
            .unwrap();
        assert_eq!(req.virtual_host().as_deref(), Some("example.org"));
    }

    #[test]
    fn authority_forms() {
        assert_eq!(normalize_authority("example.org").as_deref(), Some("example.org"));
        assert_eq!(normalize_authority("[::1]:8080").as_deref(), Some("::1"));
        assert_eq!(normalize_authority("127.0.0.1:80").as_deref(), Some("127.0.0.1"));
        assert_eq!(normalize_authority(":80"), None);
        assert_eq!(normalize_authority(""), None);
    }

    #[test]
    fn missing_request_id() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(req.request_id(), "unknown");
        assert!(req.peer_addr().is_none());
    }
}
