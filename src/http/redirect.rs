//! Plaintext redirector.
//!
//! Everything arriving on the plain listener is sent to the same host and
//! path over HTTPS with `308 Permanent Redirect`, which keeps the method
//! and body intact for clients that follow it.

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::observability::metrics;

/// Router answering every request with a redirect to HTTPS.
pub fn redirect_router() -> Router {
    Router::new()
        .fallback(redirect_to_https)
        .layer(TraceLayer::new_for_http())
}

/// Build the HTTPS location for a plaintext request.
pub fn https_location(req: &Request<Body>) -> Option<HeaderValue> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .filter(|h| !h.is_empty())?;
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    HeaderValue::from_str(&format!("https://{}{}", host, path)).ok()
}

async fn redirect_to_https(req: Request<Body>) -> Response {
    match https_location(&req) {
        Some(location) => {
            metrics::record_redirect();
            (StatusCode::PERMANENT_REDIRECT, [(header::LOCATION, location)]).into_response()
        }
        None => (StatusCode::BAD_REQUEST, "missing host\n").into_response(),
    }
}
