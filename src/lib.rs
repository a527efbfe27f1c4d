//! TLS edge server library.
//!
//! Terminates TLS with automatically obtained certificates, redirects
//! plaintext HTTP to HTTPS and dispatches requests per virtual host to a
//! reverse proxy or a chain of small built-in services.

pub mod acme;
pub mod cli;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod services;

pub use config::EdgeConfig;
pub use lifecycle::{EdgeServer, Shutdown};
