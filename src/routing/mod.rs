//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (virtual host lookup)
//!     ├─ Site::Proxy    → http::proxy
//!     └─ Site::Services → matcher.rs (first matching service)
//!
//! Compilation (at startup):
//!     SiteConfig[] → proxies / service chains → immutable VirtualHosts
//! ```
//!
//! # Design Decisions
//! - Sites compiled at startup, immutable at runtime
//! - Exact path matching only, no regex in the hot path
//! - First match wins (configuration order)

pub mod matcher;
pub mod router;

pub use matcher::{ExactPaths, Responder, ServiceChain};
pub use router::{RouteError, Site, VirtualHosts};
