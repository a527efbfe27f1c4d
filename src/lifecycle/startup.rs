//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging and metrics from the validated configuration
//! - Bootstrap listeners (inherited or fallback)
//! - Build the certificate provider when a TLS listener exists
//! - Run every server until shutdown, then drain connections and tunnels
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Servers start last (traffic only when ready)

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::acme::{
    AcmeIssuer, AcmeSettings, CertificateIssuer, CertificateProvider, ChallengeStore, DirCache,
    HostPolicy,
};
use crate::config::EdgeConfig;
use crate::http::{build_app, redirect_router, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::net::listener::{self, ListenerError, Listeners};
use crate::net::{TlsAcceptor, TunnelTracker};
use crate::observability::{logging, metrics};
use crate::routing::{RouteError, VirtualHosts};

/// Fatal errors before or while serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("invalid {field} address {value:?}")]
    Address { field: &'static str, value: String },

    #[error("metrics: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("listeners: {0}")]
    Listener(#[from] ListenerError),

    #[error("sites: {0}")]
    Routes(#[from] RouteError),

    #[error("signal handlers: {0}")]
    Signals(#[source] io::Error),

    #[error("server: {0}")]
    Serve(#[from] io::Error),
}

/// Run the process: logging, metrics, listeners, then the servers until a
/// termination signal.
pub async fn run(config: EdgeConfig) -> Result<(), StartupError> {
    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-server starting");

    if let Some(addr) = &config.observability.metrics_address {
        let addr: SocketAddr = addr.parse().map_err(|_| StartupError::Address {
            field: "metrics",
            value: addr.clone(),
        })?;
        metrics::init_metrics(addr)?;
    }

    let fallback: SocketAddr =
        config
            .listener
            .fallback_address
            .parse()
            .map_err(|_| StartupError::Address {
                field: "listener",
                value: config.listener.fallback_address.clone(),
            })?;
    let listeners = listener::bootstrap(fallback)?;

    let shutdown = Shutdown::new();
    signals::install(shutdown.clone()).map_err(StartupError::Signals)?;

    EdgeServer::new(config, listeners).run(shutdown).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// All servers of one process over a set of listeners.
pub struct EdgeServer {
    config: EdgeConfig,
    listeners: Listeners,
    issuer: Option<Arc<dyn CertificateIssuer>>,
}

impl EdgeServer {
    pub fn new(config: EdgeConfig, listeners: Listeners) -> Self {
        Self {
            config,
            listeners,
            issuer: None,
        }
    }

    /// Replace the ACME issuer, e.g. with a local CA.
    pub fn with_issuer(mut self, issuer: Arc<dyn CertificateIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Serve until `shutdown` fires or a server fails, then drain.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), StartupError> {
        let timeouts = self.config.timeouts.clone();
        let idle = Duration::from_secs(timeouts.idle_secs);
        let grace = Duration::from_secs(timeouts.shutdown_grace_secs);

        let tunnels = TunnelTracker::new();
        let vhosts = Arc::new(VirtualHosts::from_config(
            &self.config.sites,
            tunnels.clone(),
            idle,
        )?);
        tracing::info!(sites = vhosts.len(), "Virtual hosts loaded");

        let mut handles = Vec::new();
        let mut servers = JoinSet::new();

        match self.listeners {
            Listeners::Fallback(listener) => {
                let handle = Handle::new();
                let server = HttpServer::new(
                    "http",
                    build_app(Arc::clone(&vhosts), false, &timeouts),
                    handle.clone(),
                    &timeouts,
                );
                handles.push(handle);
                servers.spawn(server.serve_plain(listener));
            }
            Listeners::Activated { tls, plain } => {
                let acceptor = tls_acceptor(&self.config, self.issuer, &timeouts);

                let handle = Handle::new();
                let server = HttpServer::new(
                    "https",
                    build_app(Arc::clone(&vhosts), true, &timeouts),
                    handle.clone(),
                    &timeouts,
                );
                handles.push(handle);
                servers.spawn(server.serve_tls(tls, acceptor));

                if let Some(plain) = plain {
                    let handle = Handle::new();
                    let server =
                        HttpServer::new("redirect", redirect_router(), handle.clone(), &timeouts);
                    handles.push(handle);
                    servers.spawn(server.serve_plain(plain));
                }
            }
        }

        let mut failure = None;
        tokio::select! {
            _ = shutdown.wait() => {}
            Some(result) = servers.join_next() => {
                failure = server_error(result);
                tracing::error!("Server stopped unexpectedly, shutting down");
            }
        }

        tracing::info!(grace_secs = grace.as_secs(), "Draining connections");
        for handle in &handles {
            handle.graceful_shutdown(Some(grace));
        }
        while let Some(result) = servers.join_next().await {
            if let Some(e) = server_error(result) {
                failure.get_or_insert(e);
            }
        }

        if tunnels.active_count() > 0 {
            tracing::info!(active = tunnels.active_count(), "Waiting for tunnels to close");
            if tokio::time::timeout(grace, tunnels.wait_idle()).await.is_err() {
                tracing::warn!(
                    active = tunnels.active_count(),
                    "Grace period elapsed with tunnels still open"
                );
            }
        }

        match failure {
            Some(e) => Err(StartupError::Serve(e)),
            None => Ok(()),
        }
    }
}

fn tls_acceptor(
    config: &EdgeConfig,
    issuer: Option<Arc<dyn CertificateIssuer>>,
    timeouts: &crate::config::TimeoutConfig,
) -> TlsAcceptor {
    let policy = HostPolicy::from_allow_list(&config.acme.allow);
    let cache = DirCache::new(config.acme.cache_dir.clone());
    let challenges = ChallengeStore::new();

    let issuer = issuer.unwrap_or_else(|| {
        let settings = AcmeSettings::new(
            policy.is_staging(),
            config.acme.directory_url.clone(),
            config.acme.email.clone(),
        );
        tracing::info!(
            directory = %settings.directory_url,
            cache = %cache.dir().display(),
            "Using ACME certificate issuer"
        );
        Arc::new(AcmeIssuer::new(settings, cache.clone(), challenges.clone()))
    });

    let provider = CertificateProvider::new(policy, cache, issuer).with_renew_before(
        Duration::from_secs(config.acme.renew_before_days * 24 * 60 * 60),
    );

    TlsAcceptor::new(
        provider,
        challenges,
        Duration::from_secs(timeouts.read_secs),
        Duration::from_secs(timeouts.idle_secs),
    )
}

fn server_error(result: Result<io::Result<()>, tokio::task::JoinError>) -> Option<io::Error> {
    match result {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Server failed");
            Some(e)
        }
        Err(e) => {
            tracing::error!(error = %e, "Server task panicked");
            Some(io::Error::new(io::ErrorKind::Other, e))
        }
    }
}
