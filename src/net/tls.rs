//! TLS termination backed by the certificate provider.
//!
//! # Responsibilities
//! - Read the ClientHello before choosing a certificate
//! - Ask the provider for the SNI host and suspend the handshake meanwhile
//! - Answer ACME TLS-ALPN-01 validation from the challenge store
//! - Bound the handshake and wrap the stream with the idle deadline
//!
//! # Design Decisions
//! - TLS 1.2 and 1.3 only, P-256 and X25519 key exchange
//! - No SNI, no certificate: the connection is dropped without fallback

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum_server::accept::Accept;
use futures_util::future::BoxFuture;
use rustls::crypto::CryptoProvider;
use rustls::server::{Acceptor, ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use crate::acme::{CertificateProvider, ChallengeStore, ACME_TLS_ALPN};
use crate::net::connection::IdleTimeout;

/// Crypto provider restricted to the supported key exchange groups.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    let base = rustls::crypto::ring::default_provider();
    Arc::new(CryptoProvider {
        kx_groups: vec![
            rustls::crypto::ring::kx_group::SECP256R1,
            rustls::crypto::ring::kx_group::X25519,
        ],
        ..base
    })
}

/// Resolver handing out one already chosen certificate.
#[derive(Debug)]
struct Chosen(Arc<CertifiedKey>);

impl ResolvesServerCert for Chosen {
    fn resolve(&self, _hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// axum-server acceptor performing provider-driven TLS handshakes.
#[derive(Clone)]
pub struct TlsAcceptor {
    provider: CertificateProvider,
    challenges: ChallengeStore,
    crypto: Arc<CryptoProvider>,
    handshake_timeout: Duration,
    idle_timeout: Duration,
}

impl TlsAcceptor {
    pub fn new(
        provider: CertificateProvider,
        challenges: ChallengeStore,
        handshake_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            challenges,
            crypto: crypto_provider(),
            handshake_timeout,
            idle_timeout,
        }
    }

    async fn handshake(&self, stream: TcpStream) -> io::Result<TlsStream<TcpStream>> {
        let peer = stream.peer_addr().ok();
        let start = LazyConfigAcceptor::new(Acceptor::default(), stream).await?;
        let (server_name, acme_validation) = {
            let hello = start.client_hello();
            let acme = hello
                .alpn()
                .map(|mut protocols| protocols.any(|p| p == ACME_TLS_ALPN))
                .unwrap_or(false);
            (hello.server_name().map(str::to_owned), acme)
        };

        let Some(server_name) = server_name else {
            tracing::debug!(peer = ?peer, "Handshake without SNI refused");
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing server name"));
        };

        let config = if acme_validation {
            let cert = self.challenges.get(&server_name).ok_or_else(|| {
                tracing::warn!(host = %server_name, "ACME validation without pending challenge");
                io::Error::new(io::ErrorKind::NotFound, "no pending challenge")
            })?;
            tracing::info!(host = %server_name, "Answering TLS-ALPN-01 challenge");
            self.server_config(cert, vec![ACME_TLS_ALPN.to_vec()])?
        } else {
            let cert = self.provider.obtain(&server_name).await.map_err(|e| {
                tracing::debug!(host = %server_name, peer = ?peer, error = %e, "Handshake aborted");
                io::Error::new(io::ErrorKind::PermissionDenied, e)
            })?;
            self.server_config(
                Arc::clone(&cert.certified),
                vec![b"h2".to_vec(), b"http/1.1".to_vec()],
            )?
        };

        start.into_stream(config).await
    }

    fn server_config(
        &self,
        cert: Arc<CertifiedKey>,
        alpn: Vec<Vec<u8>>,
    ) -> io::Result<Arc<ServerConfig>> {
        let mut config = ServerConfig::builder_with_provider(Arc::clone(&self.crypto))
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(Chosen(cert)));
        config.alpn_protocols = alpn;
        Ok(Arc::new(config))
    }
}

impl<S> Accept<TcpStream, S> for TlsAcceptor
where
    S: Send + 'static,
{
    type Stream = IdleTimeout<TlsStream<TcpStream>>;
    type Service = S;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let acceptor = self.clone();
        Box::pin(async move {
            let tls = tokio::time::timeout(acceptor.handshake_timeout, acceptor.handshake(stream))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "tls handshake timed out"))??;
            Ok((IdleTimeout::new(tls, acceptor.idle_timeout), service))
        })
    }
}
