//! Virtual-host lookup.
//!
//! # Responsibilities
//! - Compile configured sites into proxies or service chains
//! - Look up the site for a request's host
//! - Return the matched site or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - O(1) host lookup via HashMap, keys lowercased
//! - Unknown hosts are a 404 at the caller, never a default site

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::config::SiteConfig;
use crate::http::proxy::{ProxyTarget, ReverseProxy, TargetError};
use crate::net::connection::TunnelTracker;
use crate::routing::matcher::ServiceChain;
use crate::services::{self, RedirectError};

/// Errors compiling the site table.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("site {host}: {source}")]
    Target {
        host: String,
        #[source]
        source: TargetError,
    },

    #[error("site {host}: {source}")]
    Service {
        host: String,
        #[source]
        source: RedirectError,
    },

    #[error("site {0} configured twice")]
    Duplicate(String),
}

/// What a virtual host does with its requests.
#[derive(Debug)]
pub enum Site {
    /// Forward everything to one backend.
    Proxy(ReverseProxy),
    /// First-match service chain.
    Services(ServiceChain),
}

/// Host → site table.
#[derive(Debug, Default)]
pub struct VirtualHosts {
    sites: HashMap<String, Site>,
}

impl VirtualHosts {
    /// Build the table. Every proxy site shares `tunnels` and `idle_timeout`.
    pub fn from_config(
        sites: &[SiteConfig],
        tunnels: TunnelTracker,
        idle_timeout: Duration,
    ) -> Result<Self, RouteError> {
        let mut table = HashMap::with_capacity(sites.len());

        for site in sites {
            let host = site.host.trim().trim_end_matches('.').to_ascii_lowercase();

            let compiled = match &site.proxy {
                Some(proxy) => {
                    let target = ProxyTarget::parse(&proxy.target).map_err(|source| {
                        RouteError::Target {
                            host: host.clone(),
                            source,
                        }
                    })?;
                    Site::Proxy(ReverseProxy::new(target, tunnels.clone(), idle_timeout))
                }
                None => {
                    let chain = site
                        .services
                        .iter()
                        .map(services::build)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|source| RouteError::Service {
                            host: host.clone(),
                            source,
                        })?;
                    Site::Services(ServiceChain::new(chain))
                }
            };

            if table.insert(host.clone(), compiled).is_some() {
                return Err(RouteError::Duplicate(host));
            }
        }

        tracing::debug!(sites = table.len(), "Virtual hosts compiled");
        Ok(Self { sites: table })
    }

    /// Find the site for an already normalized host.
    pub fn lookup(&self, host: &str) -> Option<(&str, &Site)> {
        self.sites
            .get_key_value(host)
            .map(|(name, site)| (name.as_str(), site))
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Configured host names.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }
}
