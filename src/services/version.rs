//! Build information endpoint.

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::{IntoResponse, Response};

use crate::routing::matcher::Responder;

/// Path the version endpoint answers on.
pub const VERSION_PATH: &str = "/_debug/version";

/// Serves `version: ...\nbuilt: ...` on [`VERSION_PATH`].
#[derive(Debug, Clone)]
pub struct VersionService {
    body: String,
}

impl VersionService {
    pub fn new() -> Self {
        Self::with_build(
            env!("CARGO_PKG_VERSION"),
            option_env!("EDGE_BUILD_TIME").unwrap_or("unknown"),
        )
    }

    pub fn with_build(version: &str, built: &str) -> Self {
        Self {
            body: format!("version: {}\nbuilt: {}", version, built),
        }
    }
}

impl Default for VersionService {
    fn default() -> Self {
        Self::new()
    }
}

impl Responder for VersionService {
    fn name(&self) -> &'static str {
        "version"
    }

    fn matches(&self, req: &Request<Body>) -> bool {
        req.uri().path() == VERSION_PATH
    }

    fn respond(&self, _host: &str, _req: &Request<Body>) -> Response {
        (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.body.clone(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_version_and_build() {
        let service = VersionService::with_build("1.2.3", "2024-01-01T00:00:00Z");
        let req = Request::builder().uri(VERSION_PATH).body(Body::empty()).unwrap();
        assert!(service.matches(&req));

        let body = axum::body::to_bytes(service.respond("h", &req).into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&body[..], b"version: 1.2.3\nbuilt: 2024-01-01T00:00:00Z");
    }

    #[test]
    fn only_exact_path() {
        let service = VersionService::new();
        let req = Request::builder().uri("/_debug/version/x").body(Body::empty()).unwrap();
        assert!(!service.matches(&req));
    }
}
