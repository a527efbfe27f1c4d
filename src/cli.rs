//! Command line and environment overrides.
//!
//! Every flag can also be given through the environment variable named
//! next to it. Empty values are treated as unset.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{read_config, validate_config, ConfigError, EdgeConfig, LogFormat};

#[derive(Debug, Parser)]
#[command(name = "edge-server")]
#[command(version, about = "TLS edge server with automatic certificates and reverse proxying")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "EDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for cached certificates and ACME account credentials
    #[arg(long, env = "ACME_CACHE")]
    pub acme_cache: Option<String>,

    /// Hosts certificates may be issued for (colon separated)
    #[arg(long, env = "ACME_WHITELIST", value_delimiter = ':')]
    pub acme_whitelist: Vec<String>,

    /// Contact address for the ACME account
    #[arg(long, env = "ACME_EMAIL")]
    pub acme_email: Option<String>,

    /// Fallback listen address when no sockets are inherited
    #[arg(long, env = "EDGE_LISTEN")]
    pub listen: Option<String>,

    /// Log format: pretty or json
    #[arg(long, env = "EDGE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Prometheus exporter address
    #[arg(long, env = "EDGE_METRICS_ADDRESS")]
    pub metrics_address: Option<String>,
}

impl Cli {
    /// Read the configuration file (if any), apply overrides and validate.
    pub fn load_config(&self) -> Result<EdgeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => EdgeConfig::default(),
        };
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn apply(&self, config: &mut EdgeConfig) {
        if let Some(dir) = non_empty(&self.acme_cache) {
            config.acme.cache_dir = PathBuf::from(dir);
        }

        let allow: Vec<String> = self
            .acme_whitelist
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(str::to_owned)
            .collect();
        if !allow.is_empty() {
            config.acme.allow = allow;
        }

        if let Some(email) = non_empty(&self.acme_email) {
            config.acme.email = Some(email);
        }
        if let Some(addr) = non_empty(&self.listen) {
            config.listener.fallback_address = addr;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
        if let Some(addr) = non_empty(&self.metrics_address) {
            config.observability.metrics_address = Some(addr);
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
