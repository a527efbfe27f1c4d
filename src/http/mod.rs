//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TLS or plain connection (axum-server + acceptor)
//!     → server.rs (request id, timeout, tracing, virtual host dispatch)
//!     ├─ proxy site    → proxy.rs (standard) / tunnel.rs (upgrade)
//!     └─ services site → routing::matcher (first matching service)
//!
//! Plain connection next to a TLS listener
//!     → redirect.rs (308 to https://host/path?query)
//! ```

pub mod proxy;
pub mod redirect;
pub mod request;
pub mod server;
pub mod tunnel;

pub use proxy::{ProxyError, ProxyTarget, ReverseProxy};
pub use redirect::redirect_router;
pub use request::{RequestExt, X_REQUEST_ID};
pub use server::{build_app, HttpServer};
