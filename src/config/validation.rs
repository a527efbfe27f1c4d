//! Configuration validation.
//!
//! Semantic checks run after serde has accepted the file. Every problem is
//! collected so an operator sees the whole list at once.

use std::collections::HashSet;
use std::fmt;

use url::Url;

use crate::config::schema::{EdgeConfig, ServiceConfig, SiteConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human readable description.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &EdgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config
        .listener
        .fallback_address
        .parse::<std::net::SocketAddr>()
        .is_err()
    {
        errors.push(ValidationError::new(
            "listener.fallback_address",
            format!("'{}' is not a socket address", config.listener.fallback_address),
        ));
    }

    let timeouts = &config.timeouts;
    for (name, value) in [
        ("timeouts.read_secs", timeouts.read_secs),
        ("timeouts.write_secs", timeouts.write_secs),
        ("timeouts.idle_secs", timeouts.idle_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(name, "must be greater than zero"));
        }
    }

    if let Some(url) = &config.acme.directory_url {
        if Url::parse(url).is_err() {
            errors.push(ValidationError::new(
                "acme.directory_url",
                format!("'{}' is not a URL", url),
            ));
        }
    }

    let mut seen = HashSet::new();
    for (i, site) in config.sites.iter().enumerate() {
        let host = site.host.trim().to_ascii_lowercase();
        if host.is_empty() {
            errors.push(ValidationError::new(format!("sites[{}].host", i), "must not be empty"));
        } else if !seen.insert(host.clone()) {
            errors.push(ValidationError::new(
                format!("sites[{}].host", i),
                format!("duplicate host '{}'", host),
            ));
        }
        validate_site(i, site, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_site(i: usize, site: &SiteConfig, errors: &mut Vec<ValidationError>) {
    match (&site.proxy, site.services.is_empty()) {
        (Some(_), false) => errors.push(ValidationError::new(
            format!("sites[{}]", i),
            "set either proxy or services, not both",
        )),
        (None, true) => errors.push(ValidationError::new(
            format!("sites[{}]", i),
            "needs a proxy target or at least one service",
        )),
        _ => {}
    }

    if let Some(proxy) = &site.proxy {
        if let Err(msg) = check_proxy_target(&proxy.target) {
            errors.push(ValidationError::new(format!("sites[{}].proxy.target", i), msg));
        }
    }

    for (j, service) in site.services.iter().enumerate() {
        let field = format!("sites[{}].services[{}]", i, j);
        match service {
            ServiceConfig::Version => {}
            ServiceConfig::Redirect { target, status, paths } => {
                if !(300..=399).contains(status) {
                    errors.push(ValidationError::new(
                        format!("{}.status", field),
                        format!("{} is not a redirect status", status),
                    ));
                }
                if target.parse::<axum::http::HeaderValue>().is_err() {
                    errors.push(ValidationError::new(
                        format!("{}.target", field),
                        "not a valid Location value",
                    ));
                }
                if paths.is_empty() {
                    errors.push(ValidationError::new(format!("{}.paths", field), "must not be empty"));
                }
            }
            ServiceConfig::GoImport { imports } => {
                if imports.is_empty() {
                    errors.push(ValidationError::new(format!("{}.imports", field), "must not be empty"));
                }
            }
        }
    }
}

/// Proxy targets must be plain `http://host:port` URLs without a path.
pub fn check_proxy_target(target: &str) -> Result<(), String> {
    let url = Url::parse(target).map_err(|e| format!("'{}' is not a URL: {}", target, e))?;
    if url.scheme() != "http" {
        return Err(format!("scheme '{}' is not supported, use http", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    if url.path() != "/" || url.query().is_some() {
        return Err("target must not carry a path or query".to_string());
    }
    Ok(())
}
