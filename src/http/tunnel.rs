//! Raw tunnel for upgraded connections.
//!
//! # Data Flow
//! ```text
//! client request (OnUpgrade taken from its extensions)
//!     → dial target → HTTP/1 handshake → send rewritten upgrade request
//!     ├─ backend answers 101 → 101 to client, then both sides detach
//!     │      → relay(): two copy directions, first to finish ends both
//!     └─ anything else       → returned to the client as is
//! ```
//!
//! Ownership of both connections moves into the relay task once hyper
//! releases them; no HTTP framing is applied afterwards.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::http::proxy::{ProxyError, ProxyTarget};
use crate::net::connection::{IdleTimeout, TunnelTracker};

/// Upper bound for flushing and closing each side after the relay ends.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Start a tunnel for an already rewritten upgrade request.
pub async fn open(
    target: &ProxyTarget,
    tunnels: &TunnelTracker,
    idle_timeout: Duration,
    mut req: Request<Body>,
) -> Result<Response, ProxyError> {
    let client_upgrade = req
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or(ProxyError::NotUpgradable)?;

    let stream = TcpStream::connect(target.authority())
        .await
        .map_err(|source| ProxyError::Connect {
            target: target.to_string(),
            source,
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(target = %target, error = %e, "Failed to set TCP_NODELAY on tunnel");
    }
    let stream = IdleTimeout::new(stream, idle_timeout);

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.with_upgrades().await {
            tracing::debug!(error = %e, "Backend tunnel connection ended");
        }
    });

    let mut response = sender.send_request(req).await?;
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        tracing::debug!(status = %response.status(), "Backend declined upgrade");
        return Ok(response.map(Body::new));
    }

    let backend_upgrade = hyper::upgrade::on(&mut response);
    let guard = tunnels.track();
    let target_name = target.to_string();

    tokio::spawn(async move {
        let (client, backend) = match tokio::try_join!(client_upgrade, backend_upgrade) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(tunnel = %guard.id(), error = %e, "Upgrade failed");
                return;
            }
        };

        tracing::debug!(tunnel = %guard.id(), target = %target_name, "Tunnel established");
        let (to_backend, to_client) = relay(TokioIo::new(client), TokioIo::new(backend)).await;
        tracing::debug!(
            tunnel = %guard.id(),
            bytes_to_backend = to_backend,
            bytes_to_client = to_client,
            "Tunnel closed"
        );
        drop(guard);
    });

    let (parts, _) = response.into_parts();
    Ok(Response::from_parts(parts, Body::empty()))
}

/// Copy bytes both ways until either direction ends, then close both sides.
///
/// Returns the bytes copied client→backend and backend→client.
pub async fn relay<C, B>(client: C, backend: B) -> (u64, u64)
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let mut to_backend = 0u64;
    let mut to_client = 0u64;

    tokio::select! {
        result = copy_counting(&mut client_read, &mut backend_write, &mut to_backend) => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "Client side of tunnel failed");
            }
        }
        result = copy_counting(&mut backend_read, &mut client_write, &mut to_client) => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "Backend side of tunnel failed");
            }
        }
    }

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, client_write.shutdown()).await;
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, backend_write.shutdown()).await;

    (to_backend, to_client)
}

async fn copy_counting<R, W>(reader: &mut R, writer: &mut W, total: &mut u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *total += n as u64;
    }
}
