//! Service matching for sites served by a service chain.
//!
//! # Responsibilities
//! - Define the responder interface shared by all services
//! - Walk a chain and hand the request to the first match
//!
//! # Design Decisions
//! - Path matching is exact and case-sensitive
//! - First match wins, in configuration order
//! - No match is an explicit 404, never a silent default

use std::collections::HashSet;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};

/// A service that can claim and answer requests for a site.
pub trait Responder: Send + Sync + std::fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns true if this service handles the request.
    fn matches(&self, req: &Request<Body>) -> bool;

    /// Produce the response. `host` is the site's host name.
    fn respond(&self, host: &str, req: &Request<Body>) -> Response;
}

/// Matches a fixed set of request paths.
#[derive(Debug, Clone)]
pub struct ExactPaths {
    paths: HashSet<String>,
}

impl ExactPaths {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, req: &Request<Body>) -> bool {
        self.paths.contains(req.uri().path())
    }
}

/// Ordered list of services for one site.
#[derive(Debug, Default)]
pub struct ServiceChain {
    services: Vec<Box<dyn Responder>>,
}

impl ServiceChain {
    pub fn new(services: Vec<Box<dyn Responder>>) -> Self {
        Self { services }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Answer with the first matching service, or 404.
    pub fn serve(&self, host: &str, req: &Request<Body>) -> Response {
        match self.services.iter().find(|s| s.matches(req)) {
            Some(service) => {
                tracing::debug!(host = %host, service = service.name(), path = %req.uri().path(), "Service matched");
                service.respond(host, req)
            }
            None => (StatusCode::NOT_FOUND, "404 page not found\n").into_response(),
        }
    }
}
