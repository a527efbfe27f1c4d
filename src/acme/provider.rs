//! Certificate provider.
//!
//! # Responsibilities
//! - Gate every request through the host policy
//! - Serve certificates from memory, then disk, then issuance
//! - Coalesce concurrent issuance for the same host
//! - Renew certificates approaching expiry in the background
//!
//! # Design Decisions
//! - Lookups past the memory cache run as one detached flight per host;
//!   callers only wait on its outcome, so a caller giving up never cancels
//!   an issuance that is already under way
//! - A flight leaves the in-flight table before publishing its outcome
//! - Entries only become visible after they are fully parsed and persisted
//! - Expired material is never served

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::acme::cache::{parse_bundle, unix_now, CachedCert, DirCache};
use crate::acme::issuer::CertificateIssuer;
use crate::acme::policy::HostPolicy;
use crate::acme::CertError;
use crate::observability::metrics;

type Outcome = Result<Arc<CachedCert>, CertError>;

/// Receiving end of an in-flight lookup. `None` until the flight ends.
type Flight = watch::Receiver<Option<Outcome>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlightKind {
    /// Memory, then disk, then issuance.
    Lookup,
    /// Straight to issuance.
    Renewal,
}

/// Hands out certificates at handshake time.
#[derive(Clone)]
pub struct CertificateProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    policy: HostPolicy,
    cache: DirCache,
    issuer: Arc<dyn CertificateIssuer>,
    memory: DashMap<String, Arc<CachedCert>>,
    inflight: DashMap<String, Flight>,
    renew_before: Duration,
}

impl std::fmt::Debug for CertificateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateProvider")
            .field("policy", &self.inner.policy)
            .field("cache", &self.inner.cache)
            .field("cached", &self.inner.memory.len())
            .field("inflight", &self.inner.inflight.len())
            .finish()
    }
}

impl CertificateProvider {
    pub fn new(policy: HostPolicy, cache: DirCache, issuer: Arc<dyn CertificateIssuer>) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                policy,
                cache,
                issuer,
                memory: DashMap::new(),
                inflight: DashMap::new(),
                renew_before: Duration::from_secs(30 * 24 * 60 * 60),
            }),
        }
    }

    /// Renew certificates expiring within `window`.
    ///
    /// Must be called before the provider is cloned.
    pub fn with_renew_before(mut self, window: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.renew_before = window;
        }
        self
    }

    /// Return a valid certificate for `host`, issuing one if needed.
    ///
    /// Dropping the returned future abandons only the wait. Issuance
    /// keeps running and its result is cached for the next caller.
    pub async fn obtain(&self, host: &str) -> Result<Arc<CachedCert>, CertError> {
        let host = match self.inner.policy.check(host) {
            Ok(host) => host,
            Err(e) => {
                metrics::record_certificate("rejected");
                tracing::warn!(host = %host, "Certificate request rejected by host policy");
                return Err(e);
            }
        };

        if let Some(cert) = self.from_memory(&host) {
            metrics::record_certificate("hit");
            self.maybe_renew(&host, &cert);
            return Ok(cert);
        }

        let mut flight = self.join_or_start(&host, FlightKind::Lookup);
        let outcome = match flight.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        let cert = outcome.unwrap_or_else(|| {
            Err(CertError::Unavailable {
                host: host.clone(),
                reason: "certificate lookup ended without a result".to_string(),
            })
        })?;
        self.maybe_renew(&host, &cert);
        Ok(cert)
    }

    /// Join the running flight for `host`, or spawn one of `kind`.
    fn join_or_start(&self, host: &str, kind: FlightKind) -> Flight {
        match self.inner.inflight.entry(host.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx.clone());

                let provider = self.clone();
                let host = host.to_string();
                tokio::spawn(async move {
                    let outcome = match kind {
                        FlightKind::Lookup => provider.lookup(&host).await,
                        FlightKind::Renewal => {
                            tracing::info!(host = %host, "Renewing certificate");
                            let outcome = provider.issue(&host).await;
                            if let Err(e) = &outcome {
                                tracing::warn!(host = %host, error = %e, "Renewal failed, keeping current certificate");
                            }
                            outcome
                        }
                    };
                    provider.inner.inflight.remove(&host);
                    let _ = tx.send(Some(outcome));
                });
                rx
            }
        }
    }

    async fn lookup(&self, host: &str) -> Outcome {
        if let Some(cert) = self.from_memory(host) {
            metrics::record_certificate("hit");
            return Ok(cert);
        }

        if let Some(cert) = self.from_disk(host).await {
            metrics::record_certificate("disk");
            return Ok(cert);
        }

        self.issue(host).await
    }

    fn from_memory(&self, host: &str) -> Option<Arc<CachedCert>> {
        let cert = self.inner.memory.get(host).map(|e| Arc::clone(e.value()))?;
        (!cert.is_expired(unix_now())).then_some(cert)
    }

    async fn from_disk(&self, host: &str) -> Option<Arc<CachedCert>> {
        let pem = match self.inner.cache.load(host).await {
            Ok(Some(pem)) => pem,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(host = %host, error = %e, "Failed to read cached certificate");
                return None;
            }
        };

        let cert = match parse_bundle(&pem) {
            Ok(cert) => cert,
            Err(e) => {
                tracing::warn!(host = %host, error = %e, "Ignoring unusable cached certificate");
                return None;
            }
        };

        if cert.is_expired(unix_now()) {
            tracing::info!(host = %host, "Cached certificate expired");
            return None;
        }

        let cert = Arc::new(cert);
        self.inner.memory.insert(host.to_string(), Arc::clone(&cert));
        tracing::debug!(host = %host, "Certificate loaded from disk cache");
        Some(cert)
    }

    /// Issue, persist and publish. Runs inside a flight.
    async fn issue(&self, host: &str) -> Result<Arc<CachedCert>, CertError> {
        let unavailable = |reason: String| {
            metrics::record_certificate("failed");
            tracing::error!(host = %host, reason = %reason, "Certificate unavailable");
            CertError::Unavailable {
                host: host.to_string(),
                reason,
            }
        };

        tracing::info!(host = %host, "Issuing certificate");
        let issued = self
            .inner
            .issuer
            .issue(host)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let bundle = issued.bundle();
        let cert = parse_bundle(&bundle).map_err(|e| unavailable(e.to_string()))?;
        if cert.is_expired(unix_now()) {
            return Err(unavailable("issued certificate is already expired".to_string()));
        }

        self.inner
            .cache
            .store(host, &bundle)
            .await
            .map_err(|e| unavailable(format!("cache write failed: {}", e)))?;

        let cert = Arc::new(cert);
        self.inner.memory.insert(host.to_string(), Arc::clone(&cert));
        metrics::record_certificate("issued");
        Ok(cert)
    }

    /// Start a background renewal unless a flight for `host` is running.
    fn maybe_renew(&self, host: &str, cert: &CachedCert) {
        if !cert.needs_renewal(unix_now(), self.inner.renew_before) {
            return;
        }
        if self.inner.inflight.contains_key(host) {
            return;
        }
        drop(self.join_or_start(host, FlightKind::Renewal));
    }
}
