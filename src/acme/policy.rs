//! Host policy consulted before any certificate work.

use std::collections::HashSet;

use crate::acme::CertError;

/// Which hostnames certificates may be obtained for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPolicy {
    /// Any syntactically valid hostname (staging mode).
    AllowAll,
    /// Only the listed hostnames.
    AllowList(HashSet<String>),
}

impl HostPolicy {
    /// Build a policy from an allow-list. An empty list allows every host.
    pub fn from_allow_list<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: HashSet<String> = hosts
            .into_iter()
            .filter_map(|h| normalize_host(h.as_ref()))
            .collect();
        if set.is_empty() {
            HostPolicy::AllowAll
        } else {
            HostPolicy::AllowList(set)
        }
    }

    /// Whether this policy is the permissive staging one.
    pub fn is_staging(&self) -> bool {
        matches!(self, HostPolicy::AllowAll)
    }

    /// Check `host` and return its normalized form.
    pub fn check(&self, host: &str) -> Result<String, CertError> {
        let normalized =
            normalize_host(host).ok_or_else(|| CertError::PolicyRejected(host.to_string()))?;
        match self {
            HostPolicy::AllowAll => Ok(normalized),
            HostPolicy::AllowList(hosts) if hosts.contains(&normalized) => Ok(normalized),
            HostPolicy::AllowList(_) => Err(CertError::PolicyRejected(normalized)),
        }
    }
}

/// Lowercase, drop a trailing dot and reject anything that is not a DNS name.
pub fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || host.len() > 253 {
        return None;
    }

    let valid = host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    });

    valid.then_some(host)
}
