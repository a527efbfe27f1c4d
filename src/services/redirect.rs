//! Static redirect rules.

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::routing::matcher::{ExactPaths, Responder};

/// Redirects a fixed set of paths to one location.
#[derive(Debug, Clone)]
pub struct RedirectService {
    paths: ExactPaths,
    location: HeaderValue,
    status: StatusCode,
}

/// Invalid redirect definition.
#[derive(Debug, thiserror::Error)]
pub enum RedirectError {
    #[error("invalid redirect status {0}")]
    Status(u16),
    #[error("invalid redirect target {0:?}")]
    Target(String),
}

impl RedirectService {
    pub fn new(target: &str, status: u16, paths: &[String]) -> Result<Self, RedirectError> {
        let status = StatusCode::from_u16(status)
            .ok()
            .filter(StatusCode::is_redirection)
            .ok_or(RedirectError::Status(status))?;
        let location =
            HeaderValue::from_str(target).map_err(|_| RedirectError::Target(target.to_string()))?;
        Ok(Self {
            paths: ExactPaths::new(paths.iter().cloned()),
            location,
            status,
        })
    }
}

impl Responder for RedirectService {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn matches(&self, req: &Request<Body>) -> bool {
        self.paths.matches(req)
    }

    fn respond(&self, _host: &str, _req: &Request<Body>) -> Response {
        (self.status, [(header::LOCATION, self.location.clone())]).into_response()
    }
}
