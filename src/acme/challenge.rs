//! TLS-ALPN-01 challenge certificates.
//!
//! While an authorization is pending, the validation server connects with
//! ALPN `acme-tls/1` and expects a self-signed certificate carrying the
//! SHA-256 digest of the key authorization in the `acmeIdentifier`
//! extension. The store is shared between the issuer, which fills it, and
//! the TLS acceptor, which serves from it.

use std::sync::Arc;

use dashmap::DashMap;
use rcgen::{CertificateParams, CustomExtension, KeyPair};
use rustls::pki_types::PrivateKeyDer;
use rustls::sign::CertifiedKey;
use sha2::{Digest, Sha256};

use crate::acme::issuer::IssueError;

/// ALPN protocol identifier used by TLS-ALPN-01 validation.
pub const ACME_TLS_ALPN: &[u8] = b"acme-tls/1";

/// Pending challenge certificates keyed by hostname.
#[derive(Debug, Clone, Default)]
pub struct ChallengeStore {
    certs: Arc<DashMap<String, Arc<CertifiedKey>>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, host: &str, cert: Arc<CertifiedKey>) {
        self.certs.insert(host.to_ascii_lowercase(), cert);
    }

    pub fn get(&self, host: &str) -> Option<Arc<CertifiedKey>> {
        self.certs
            .get(&host.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, host: &str) {
        self.certs.remove(&host.to_ascii_lowercase());
    }
}

/// Build the validation certificate for `host`.
pub fn challenge_certificate(
    host: &str,
    key_authorization: &str,
) -> Result<Arc<CertifiedKey>, IssueError> {
    let digest = Sha256::digest(key_authorization.as_bytes());

    let mut params = CertificateParams::new(vec![host.to_string()])?;
    params.custom_extensions = vec![CustomExtension::new_acme_identifier(&digest)];

    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;

    let key_der = PrivateKeyDer::Pkcs8(key.serialize_der().into());
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key_der)?;

    Ok(Arc::new(CertifiedKey::new(
        vec![cert.der().clone()],
        signing_key,
    )))
}
