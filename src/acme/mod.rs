//! Automatic certificate management.
//!
//! # Data Flow
//! ```text
//! TLS ClientHello (SNI)
//!     → provider.rs (policy.rs check → memory → cache.rs → issuer.rs)
//!     → CachedCert (rustls CertifiedKey + expiry)
//!     → back to the TLS acceptor
//!
//! ACME validation connection (ALPN acme-tls/1)
//!     → challenge.rs store, filled by issuer.rs while an order is pending
//! ```
//!
//! # Design Decisions
//! - The provider is built once at startup and passed to the acceptor
//! - Issuance sits behind a trait so the CA can be swapped in tests
//! - Policy failures and issuance failures both fail the handshake

pub mod cache;
pub mod challenge;
pub mod issuer;
pub mod policy;
pub mod provider;

use thiserror::Error;

pub use cache::{CachedCert, DirCache};
pub use challenge::{ChallengeStore, ACME_TLS_ALPN};
pub use issuer::{AcmeIssuer, AcmeSettings, CertificateIssuer, IssueError, IssuedCert};
pub use policy::HostPolicy;
pub use provider::CertificateProvider;

/// Outcome of a failed certificate lookup.
#[derive(Debug, Clone, Error)]
pub enum CertError {
    /// The host is not covered by the host policy.
    #[error("host {0:?} is not permitted")]
    PolicyRejected(String),

    /// Issuance or persistence failed.
    #[error("certificate for {host} unavailable: {reason}")]
    Unavailable { host: String, reason: String },
}
