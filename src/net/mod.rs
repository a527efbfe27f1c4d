//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Process environment (LISTEN_FDS / LISTEN_FDNAMES)
//!     → activation.rs (parse, classify roles)
//!     → listener.rs (adopt inherited sockets or bind fallback)
//!     → tls.rs (provider-driven handshake) or plain acceptor
//!     → connection.rs (idle deadline, tunnel tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Startup errors in socket handling are fatal
//! - Per-connection errors never affect other connections
//! - Deadlines are enforced on the transport, below HTTP

pub mod activation;
pub mod connection;
pub mod listener;
pub mod tls;

pub use activation::{ActivationError, Role};
pub use connection::{IdleTimeout, PlainAcceptor, TunnelTracker};
pub use listener::{ListenerError, Listeners};
pub use tls::TlsAcceptor;
