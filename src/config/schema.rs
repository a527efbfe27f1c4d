//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the edge server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration for the edge server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EdgeConfig {
    /// Listener configuration (fallback bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Automatic certificate management.
    pub acme: AcmeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Virtual hosts served by this process.
    pub sites: Vec<SiteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address bound when no listening sockets are inherited (e.g., "0.0.0.0:8080").
    pub fallback_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            fallback_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration applied at the listener level.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TLS handshake and request header read deadline in seconds.
    pub read_secs: u64,

    /// Deadline for producing a response head in seconds.
    pub write_secs: u64,

    /// Connections without any read or write progress are closed after this many seconds.
    pub idle_secs: u64,

    /// How long shutdown waits for in-flight connections and tunnels.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_secs: 5,
            write_secs: 10,
            idle_secs: 120,
            shutdown_grace_secs: 30,
        }
    }
}

/// ACME client and certificate cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcmeConfig {
    /// Directory holding cached certificates and the account credentials.
    pub cache_dir: PathBuf,

    /// Hostnames certificates may be issued for.
    /// Empty means "allow every host" against the staging directory.
    pub allow: Vec<String>,

    /// Contact address registered with the ACME account.
    pub email: Option<String>,

    /// Directory URL override. Defaults to Let's Encrypt production or staging.
    pub directory_url: Option<String>,

    /// Certificates closer than this many days to expiry are renewed in the background.
    pub renew_before_days: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("."),
            allow: Vec::new(),
            email: None,
            directory_url: None,
            renew_before_days: 30,
        }
    }
}

impl AcmeConfig {
    /// Staging mode is selected when no allow-list is configured.
    pub fn is_staging(&self) -> bool {
        self.allow.iter().all(|h| h.trim().is_empty())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Prometheus exporter bind address. Metrics are not exported when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "edge_server=info,tower_http=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_address: None,
        }
    }
}

/// A virtual host and the handler serving it.
///
/// Exactly one of `proxy` or `services` must be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    /// Host header value this site answers to (port ignored, case-insensitive).
    pub host: String,

    /// Forward all traffic to a single backend.
    #[serde(default)]
    pub proxy: Option<ProxyTargetConfig>,

    /// First-match service chain.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Reverse proxy target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyTargetConfig {
    /// Backend URL, e.g. "http://172.17.0.2:8000".
    pub target: String,
}

/// A service inside a site's chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ServiceConfig {
    /// `/_debug/version` endpoint.
    Version,

    /// Static redirect for a set of exact paths.
    Redirect {
        target: String,
        #[serde(default = "default_redirect_status")]
        status: u16,
        paths: Vec<String>,
    },

    /// Vanity import metadata for `go get`.
    GoImport {
        imports: BTreeMap<String, ImportConfig>,
    },
}

fn default_redirect_status() -> u16 {
    302
}

/// One vanity import entry, keyed by request path.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ImportConfig {
    /// Import prefix without the host part.
    pub prefix: String,

    /// Version control system ("git", "hg", ...).
    pub vcs: String,

    /// Repository root URL.
    pub repo: String,

    /// Where browsers are sent. Defaults to godoc for the import path.
    #[serde(default)]
    pub redirect: Option<String>,
}
