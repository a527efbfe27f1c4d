//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edge_server::acme::{CertificateIssuer, IssueError, IssuedCert};
use edge_server::config::{EdgeConfig, ProxyTargetConfig, SiteConfig};
use edge_server::net::Listeners;
use edge_server::{EdgeServer, Shutdown};
use futures_util::{SinkExt, StreamExt};
use rcgen::{BasicConstraints, Certificate, CertificateParams, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, ServerName};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Request line and headers (lowercased names) seen by a backend.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub request_line: String,
    pub headers: HashMap<String, String>,
}

/// Read an HTTP head up to and including the blank line.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8(head).ok()
}

fn parse_head(head: &str) -> Recorded {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    Recorded {
        request_line,
        headers,
    }
}

/// Start a backend answering every request with `body` and reporting what it saw.
pub async fn start_recording_backend(
    body: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<Recorded>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let Some(head) = read_head(&mut socket).await else {
                    return;
                };
                let _ = tx.send(parse_head(&head));
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Start a backend that reads a request and then never answers.
pub async fn start_stalling_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_head(&mut socket).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(socket);
            });
        }
    });

    addr
}

/// Start a backend that accepts upgrades with 101 and then echoes raw bytes.
/// Receiving `quit` makes it close the connection.
pub async fn start_raw_upgrade_backend() -> (SocketAddr, mpsc::UnboundedReceiver<Recorded>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let Some(head) = read_head(&mut socket).await else {
                    return;
                };
                let _ = tx.send(parse_head(&head));
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
                    )
                    .await;

                let mut buf = [0u8; 1024];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    if &buf[..n] == b"quit" {
                        break;
                    }
                    if socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (addr, rx)
}

/// Start a WebSocket echo backend.
pub async fn start_websocket_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() || msg.is_binary() {
                        if ws.send(msg).await.is_err() {
                            break;
                        }
                    } else if msg.is_close() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

/// Issuer signing leaf certificates with a throwaway CA.
pub struct TestCa {
    ca_cert: Certificate,
    ca_key: KeyPair,
    calls: AtomicUsize,
}

impl TestCa {
    pub fn new() -> Arc<Self> {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = params.self_signed(&ca_key).unwrap();
        Arc::new(Self {
            ca_cert,
            ca_key,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn root(&self) -> CertificateDer<'static> {
        self.ca_cert.der().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateIssuer for TestCa {
    async fn issue(&self, host: &str) -> Result<IssuedCert, IssueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let params = CertificateParams::new(vec![host.to_string()])?;
        let key = KeyPair::generate()?;
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key)?;
        Ok(IssuedCert {
            key_pem: key.serialize_pem(),
            chain_pem: cert.pem(),
        })
    }
}

/// Bind a non-blocking std listener on an ephemeral port.
pub fn ephemeral_listener() -> (std::net::TcpListener, SocketAddr) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Configuration with one proxied site and short timeouts.
pub fn proxy_config(host: &str, backend: SocketAddr, cache_dir: &std::path::Path) -> EdgeConfig {
    let mut config = EdgeConfig::default();
    config.timeouts.shutdown_grace_secs = 2;
    config.acme.cache_dir = cache_dir.to_path_buf();
    config.sites.push(SiteConfig {
        host: host.to_string(),
        proxy: Some(ProxyTargetConfig {
            target: format!("http://{}", backend),
        }),
        services: vec![],
    });
    config
}

/// Run an edge server in the background. Trigger the returned handle to stop it.
pub async fn spawn_edge(
    config: EdgeConfig,
    listeners: Listeners,
    issuer: Option<Arc<dyn CertificateIssuer>>,
) -> Shutdown {
    let shutdown = Shutdown::new();
    let mut server = EdgeServer::new(config, listeners);
    if let Some(issuer) = issuer {
        server = server.with_issuer(issuer);
    }
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(stop).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown
}

/// HTTP client that never pools, never proxies and sends no User-Agent.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// TLS client trusting only `root`, using the ring provider explicitly.
pub fn tls_connector(root: CertificateDer<'static>) -> tokio_rustls::TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(root).unwrap();
    let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    tokio_rustls::TlsConnector::from(Arc::new(config))
}

/// Open a TLS connection presenting `host` as SNI.
pub async fn tls_connect(
    connector: &tokio_rustls::TlsConnector,
    addr: SocketAddr,
    host: &str,
) -> std::io::Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let stream = TcpStream::connect(addr).await?;
    let name = ServerName::try_from(host.to_string())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    connector.connect(name, stream).await
}

/// Send one `Connection: close` GET and read the whole response.
pub async fn raw_get<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    path: &str,
) -> String {
    let request = format!("GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", path, host);
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
