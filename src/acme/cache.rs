//! On-disk certificate cache.
//!
//! Each host is stored as a single file named after the host holding the
//! PEM private key followed by the PEM certificate chain. Account
//! credentials live alongside as JSON.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use thiserror::Error;

/// Why a PEM bundle could not be turned into a usable certificate.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("malformed PEM: {0}")]
    Pem(#[from] io::Error),
    #[error("no private key in bundle")]
    MissingKey,
    #[error("no certificate in bundle")]
    MissingCertificate,
    #[error("unparsable leaf certificate: {0}")]
    X509(String),
    #[error("unsupported private key: {0}")]
    Key(#[from] rustls::Error),
}

/// A certificate ready to be served.
#[derive(Debug)]
pub struct CachedCert {
    /// Chain and signing key as used by rustls.
    pub certified: Arc<CertifiedKey>,
    /// Leaf expiry, seconds since the Unix epoch.
    pub not_after: i64,
}

impl CachedCert {
    /// Whether the leaf has expired at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.not_after
    }

    /// Whether the leaf expires within `window` of `now`.
    pub fn needs_renewal(&self, now: i64, window: Duration) -> bool {
        let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        self.not_after.saturating_sub(now) <= window
    }
}

/// Current time in seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parse a key-then-chain PEM bundle.
pub fn parse_bundle(pem: &str) -> Result<CachedCert, BundleError> {
    let mut key: Option<PrivateKeyDer<'static>> = None;
    let mut chain: Vec<CertificateDer<'static>> = Vec::new();

    for item in rustls_pemfile::read_all(&mut pem.as_bytes()) {
        match item? {
            rustls_pemfile::Item::X509Certificate(cert) => chain.push(cert),
            rustls_pemfile::Item::Pkcs8Key(k) if key.is_none() => key = Some(k.into()),
            rustls_pemfile::Item::Pkcs1Key(k) if key.is_none() => key = Some(k.into()),
            rustls_pemfile::Item::Sec1Key(k) if key.is_none() => key = Some(k.into()),
            _ => {}
        }
    }

    let key = key.ok_or(BundleError::MissingKey)?;
    let leaf = chain.first().ok_or(BundleError::MissingCertificate)?;

    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| BundleError::X509(e.to_string()))?;
    let not_after = parsed.validity().not_after.timestamp();

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)?;

    Ok(CachedCert {
        certified: Arc::new(CertifiedKey::new(chain, signing_key)),
        not_after,
    })
}

/// Directory-backed cache.
#[derive(Debug, Clone)]
pub struct DirCache {
    dir: PathBuf,
}

impl DirCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read an entry. A missing file is `Ok(None)`.
    pub async fn load(&self, name: &str) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(self.dir.join(name)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write an entry atomically: temp file in the same directory, then rename.
    pub async fn store(&self, name: &str, content: &str) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.dir.join(name);
        let temp = self.dir.join(format!(".{}.tmp", name));

        if let Err(e) = write_private(&temp, content).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }
        tokio::fs::rename(&temp, &target).await
    }
}

async fn write_private(path: &Path, content: &str) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.sync_all().await
}
