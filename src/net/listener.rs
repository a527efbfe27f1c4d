//! Listener bootstrap.
//!
//! # Responsibilities
//! - Adopt listening sockets inherited through socket activation
//! - Bind a single fallback listener when nothing was inherited
//! - Hand std listeners to the servers; no accept happens here
//!
//! # Design Decisions
//! - Adoption checks the descriptor really is a listening stream socket
//! - Adopted descriptors are marked close-on-exec and non-blocking
//! - Only the fallback path binds, so activation never performs network I/O

use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{FromRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::net::activation::{self, ActivationEnv, ActivationError};

/// Backlog used for the fallback listener.
const BACKLOG: i32 = 1024;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Inherited descriptor set is malformed or unusable.
    Activation(ActivationError),
    /// Failed to bind the fallback address.
    Bind(SocketAddr, std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Activation(e) => write!(f, "Socket activation: {}", e),
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
        }
    }
}

impl std::error::Error for ListenerError {}

impl From<ActivationError> for ListenerError {
    fn from(e: ActivationError) -> Self {
        ListenerError::Activation(e)
    }
}

/// Listeners the process serves on.
#[derive(Debug)]
pub enum Listeners {
    /// Freshly bound plain listener serving the whole application.
    Fallback(TcpListener),
    /// Inherited listeners: one TLS, optionally one plain redirector.
    Activated {
        tls: TcpListener,
        plain: Option<TcpListener>,
    },
}

impl Listeners {
    /// Whether a TLS listener is present.
    pub fn has_tls(&self) -> bool {
        matches!(self, Listeners::Activated { .. })
    }
}

/// Produce the process listeners from the environment.
pub fn bootstrap(fallback: SocketAddr) -> Result<Listeners, ListenerError> {
    bootstrap_from(&ActivationEnv::from_env(), std::process::id(), fallback)
}

/// Produce listeners from an explicit activation environment.
pub fn bootstrap_from(
    env: &ActivationEnv,
    pid: u32,
    fallback: SocketAddr,
) -> Result<Listeners, ListenerError> {
    match activation::parse(env, pid)? {
        None => {
            let listener = bind(fallback)?;
            tracing::info!(
                address = %display_addr(&listener),
                "No inherited sockets, serving plain HTTP on fallback listener"
            );
            Ok(Listeners::Fallback(listener))
        }
        Some(set) => {
            // SAFETY: descriptors named by LISTEN_FDS belong to this process
            // and are adopted exactly once.
            let tls = unsafe { adopt(set.tls)? };
            let plain = match set.plain {
                Some(fd) => Some(unsafe { adopt(fd)? }),
                None => None,
            };
            tracing::info!(
                tls = %display_addr(&tls),
                plain = %plain.as_ref().map(display_addr).unwrap_or_else(|| "-".into()),
                "Adopted inherited listeners"
            );
            Ok(Listeners::Activated { tls, plain })
        }
    }
}

/// Take ownership of an inherited listening socket.
///
/// # Safety
/// `fd` must be an open descriptor owned by nothing else in this process.
pub unsafe fn adopt(fd: RawFd) -> Result<TcpListener, ActivationError> {
    let socket = Socket::from_raw_fd(fd);

    let adopt_err = |source| ActivationError::Adopt { fd, source };

    let ty = socket.r#type().map_err(adopt_err)?;
    if ty != Type::STREAM || !socket.is_listener().map_err(adopt_err)? {
        // Leave the descriptor open for whoever passed it.
        std::mem::forget(socket);
        return Err(ActivationError::NotAListener(fd));
    }

    socket.set_cloexec(true).map_err(adopt_err)?;
    socket.set_nonblocking(true).map_err(adopt_err)?;
    Ok(socket.into())
}

/// Bind a fresh non-blocking listener.
pub fn bind(addr: SocketAddr) -> Result<TcpListener, ListenerError> {
    let err = |e| ListenerError::Bind(addr, e);

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(err)?;
    socket.set_reuse_address(true).map_err(err)?;
    socket.bind(&addr.into()).map_err(err)?;
    socket.listen(BACKLOG).map_err(err)?;
    socket.set_nonblocking(true).map_err(err)?;
    Ok(socket.into())
}

fn display_addr(listener: &TcpListener) -> String {
    listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into())
}
