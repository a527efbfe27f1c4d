//! Socket activation environment parsing.
//!
//! A supervisor (systemd or anything speaking the same protocol) may hand the
//! process pre-opened listening sockets. They start at descriptor 3 and are
//! described by three environment variables:
//!
//! - `LISTEN_FDS`: number of inherited descriptors
//! - `LISTEN_PID`: pid the descriptors are meant for (optional)
//! - `LISTEN_FDNAMES`: colon separated role names (optional)
//!
//! # Design Decisions
//! - Names are authoritative when present; every name must map to a role
//! - Without names the positional layout is used: fd 3 is TLS, fd 4 is plain
//! - Parsing is pure so the rules can be tested without touching descriptors

use std::os::unix::io::RawFd;

use thiserror::Error;

/// First inherited descriptor number.
pub const LISTEN_FDS_START: RawFd = 3;

/// Role a listener plays once wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Plain HTTP, served by the HTTPS redirector.
    Plain,
    /// TLS terminated with certificates from the provider.
    Tls,
}

impl Role {
    /// Map a declared descriptor name to a role.
    pub fn from_name(name: &str) -> Option<Role> {
        match name.trim().to_ascii_lowercase().as_str() {
            "https" | "tls" => Some(Role::Tls),
            "http" | "plain" => Some(Role::Plain),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Plain => write!(f, "plain"),
            Role::Tls => write!(f, "tls"),
        }
    }
}

/// Errors raised while interpreting the activation environment.
///
/// All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("LISTEN_FDS must be a positive integer, got {0:?}")]
    InvalidCount(String),

    #[error("LISTEN_FDNAMES names {names} descriptors but LISTEN_FDS is {fds}")]
    NameCountMismatch { names: usize, fds: usize },

    #[error("unrecognized role {name:?} for descriptor {fd}")]
    UnknownRole { fd: RawFd, name: String },

    #[error("{0} descriptors inherited without LISTEN_FDNAMES, at most 2 are supported")]
    TooManyPositional(usize),

    #[error("expected exactly one tls listener, found {0}")]
    TlsCount(usize),

    #[error("expected at most one plain listener, found {0}")]
    PlainCount(usize),

    #[error("descriptor {0} is not a listening stream socket")]
    NotAListener(RawFd),

    #[error("failed to adopt descriptor {fd}: {source}")]
    Adopt {
        fd: RawFd,
        #[source]
        source: std::io::Error,
    },
}

/// Raw values of the activation variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationEnv {
    pub listen_pid: Option<String>,
    pub listen_fds: Option<String>,
    pub listen_fdnames: Option<String>,
}

impl ActivationEnv {
    /// Read the variables from the process environment.
    pub fn from_env() -> Self {
        Self {
            listen_pid: std::env::var("LISTEN_PID").ok(),
            listen_fds: std::env::var("LISTEN_FDS").ok(),
            listen_fdnames: std::env::var("LISTEN_FDNAMES").ok(),
        }
    }
}

/// An inherited descriptor tagged with its role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedFd {
    pub fd: RawFd,
    pub role: Role,
}

/// Classified set of inherited listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationSet {
    pub tls: RawFd,
    pub plain: Option<RawFd>,
}

/// Interpret the activation environment for process `pid`.
///
/// Returns `Ok(None)` when nothing was inherited (or the descriptors were
/// meant for another process), in which case the caller binds a fresh
/// listener.
pub fn parse(env: &ActivationEnv, pid: u32) -> Result<Option<ActivationSet>, ActivationError> {
    let Some(raw_count) = env.listen_fds.as_deref() else {
        return Ok(None);
    };

    if let Some(target) = env.listen_pid.as_deref() {
        if target.trim().parse::<u32>().ok() != Some(pid) {
            tracing::warn!(
                listen_pid = %target,
                pid = pid,
                "Inherited descriptors are addressed to another process, ignoring them"
            );
            return Ok(None);
        }
    }

    let count = match raw_count.trim().parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => return Err(ActivationError::InvalidCount(raw_count.to_string())),
    };

    let inherited = match env.listen_fdnames.as_deref().filter(|n| !n.is_empty()) {
        Some(names) => classify_named(count, names)?,
        None => classify_positional(count)?,
    };

    classify(&inherited).map(Some)
}

fn classify_named(count: usize, names: &str) -> Result<Vec<InheritedFd>, ActivationError> {
    let names: Vec<&str> = names.split(':').collect();
    if names.len() != count {
        return Err(ActivationError::NameCountMismatch {
            names: names.len(),
            fds: count,
        });
    }

    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let fd = LISTEN_FDS_START + i as RawFd;
            Role::from_name(name)
                .map(|role| InheritedFd { fd, role })
                .ok_or_else(|| ActivationError::UnknownRole {
                    fd,
                    name: name.to_string(),
                })
        })
        .collect()
}

fn classify_positional(count: usize) -> Result<Vec<InheritedFd>, ActivationError> {
    if count > 2 {
        return Err(ActivationError::TooManyPositional(count));
    }

    tracing::warn!(
        fds = count,
        "LISTEN_FDNAMES not set, assuming fd 3 is https and fd 4 is http"
    );

    let roles = [Role::Tls, Role::Plain];
    Ok(roles
        .iter()
        .take(count)
        .enumerate()
        .map(|(i, role)| InheritedFd {
            fd: LISTEN_FDS_START + i as RawFd,
            role: *role,
        })
        .collect())
}

/// Check the role counts of an inherited set.
pub fn classify(inherited: &[InheritedFd]) -> Result<ActivationSet, ActivationError> {
    let tls: Vec<RawFd> = inherited
        .iter()
        .filter(|f| f.role == Role::Tls)
        .map(|f| f.fd)
        .collect();
    let plain: Vec<RawFd> = inherited
        .iter()
        .filter(|f| f.role == Role::Plain)
        .map(|f| f.fd)
        .collect();

    if tls.len() != 1 {
        return Err(ActivationError::TlsCount(tls.len()));
    }
    if plain.len() > 1 {
        return Err(ActivationError::PlainCount(plain.len()));
    }

    Ok(ActivationSet {
        tls: tls[0],
        plain: plain.first().copied(),
    })
}
