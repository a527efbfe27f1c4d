//! Certificate issuance.
//!
//! # Responsibilities
//! - Define the issuer seam used by the provider
//! - Speak ACME (RFC 8555) with TLS-ALPN-01 validation
//! - Persist and reuse the ACME account credentials
//!
//! # Data Flow
//! ```text
//! issue(host)
//!     → account (load credentials from cache dir, or register)
//!     → new order for the DNS identifier
//!     → per pending authorization: publish challenge cert, set ready
//!     → poll order until Ready / Invalid
//!     → finalize (CSR with fresh key) → download chain
//!     → IssuedCert { key_pem, chain_pem }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, Order, OrderStatus,
};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::acme::cache::DirCache;
use crate::acme::challenge::{challenge_certificate, ChallengeStore};

/// Attempts while waiting for the order to become ready.
const ORDER_POLL_ATTEMPTS: u32 = 30;
const ORDER_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CERT_POLL_ATTEMPTS: u32 = 10;

/// Errors raised while obtaining a certificate from an authority.
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("acme protocol error: {0}")]
    Acme(#[from] instant_acme::Error),

    #[error("authorization for {host} is {status}")]
    Authorization { host: String, status: String },

    #[error("no tls-alpn-01 challenge offered for {0}")]
    NoChallenge(String),

    #[error("order for {host} ended as {status}")]
    Order { host: String, status: String },

    #[error("timed out waiting for the authority to process {0}")]
    Timeout(String),

    #[error("account storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("account credentials: {0}")]
    Credentials(#[from] serde_json::Error),

    #[error("challenge certificate: {0}")]
    ChallengeCert(#[from] rcgen::Error),

    #[error("challenge key: {0}")]
    ChallengeKey(#[from] rustls::Error),
}

/// Freshly issued key and chain, PEM encoded.
#[derive(Debug, Clone)]
pub struct IssuedCert {
    pub key_pem: String,
    pub chain_pem: String,
}

impl IssuedCert {
    /// Key followed by chain, the on-disk layout.
    pub fn bundle(&self) -> String {
        let mut out = self.key_pem.clone();
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.chain_pem);
        out
    }
}

/// Source of new certificates.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Obtain a certificate for an already policy-checked host.
    async fn issue(&self, host: &str) -> Result<IssuedCert, IssueError>;
}

/// ACME issuer settings.
#[derive(Debug, Clone)]
pub struct AcmeSettings {
    pub directory_url: String,
    pub contact: Option<String>,
}

impl AcmeSettings {
    /// Let's Encrypt production or staging, unless overridden.
    pub fn new(staging: bool, directory_url: Option<String>, email: Option<String>) -> Self {
        let directory_url = directory_url.unwrap_or_else(|| {
            if staging {
                LetsEncrypt::Staging.url().to_string()
            } else {
                LetsEncrypt::Production.url().to_string()
            }
        });
        Self {
            directory_url,
            contact: email,
        }
    }

    /// File name for the account credentials of this directory.
    pub fn account_file(&self) -> String {
        let host = url::Url::parse(&self.directory_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_else(|| "directory".to_string());
        format!("acme_account+{}.json", host)
    }
}

/// Issuer talking to an ACME directory.
pub struct AcmeIssuer {
    settings: AcmeSettings,
    cache: DirCache,
    challenges: ChallengeStore,
    account: OnceCell<Account>,
}

impl AcmeIssuer {
    pub fn new(settings: AcmeSettings, cache: DirCache, challenges: ChallengeStore) -> Self {
        tracing::info!(directory = %settings.directory_url, "ACME issuer configured");
        Self {
            settings,
            cache,
            challenges,
            account: OnceCell::new(),
        }
    }

    async fn account(&self) -> Result<&Account, IssueError> {
        self.account
            .get_or_try_init(|| async {
                let file = self.settings.account_file();
                if let Some(json) = self.cache.load(&file).await? {
                    let creds: AccountCredentials = serde_json::from_str(&json)?;
                    let account = Account::builder()?.from_credentials(creds).await?;
                    tracing::debug!(file = %file, "Loaded ACME account");
                    return Ok(account);
                }

                let contact: Vec<String> = self
                    .settings
                    .contact
                    .iter()
                    .map(|email| format!("mailto:{}", email))
                    .collect();
                let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();

                let (account, creds) = Account::builder()?
                    .create(
                        &NewAccount {
                            contact: &contact_refs,
                            terms_of_service_agreed: true,
                            only_return_existing: false,
                        },
                        self.settings.directory_url.clone(),
                        None,
                    )
                    .await?;

                self.cache
                    .store(&file, &serde_json::to_string_pretty(&creds)?)
                    .await?;
                tracing::info!(file = %file, "Registered ACME account");
                Ok::<Account, IssueError>(account)
            })
            .await
    }

    async fn authorize(&self, order: &mut Order, host: &str) -> Result<(), IssueError> {
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result?;
            match &authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                status => {
                    return Err(IssueError::Authorization {
                        host: host.to_string(),
                        status: format!("{:?}", status),
                    })
                }
            }

            let mut challenge = authz
                .challenge(ChallengeType::TlsAlpn01)
                .ok_or_else(|| IssueError::NoChallenge(host.to_string()))?;

            let cert = challenge_certificate(host, challenge.key_authorization().as_str())?;
            self.challenges.insert(host, cert);
            challenge.set_ready().await?;
        }
        Ok(())
    }

    async fn wait_ready(&self, order: &mut Order, host: &str) -> Result<(), IssueError> {
        for _ in 0..ORDER_POLL_ATTEMPTS {
            tokio::time::sleep(ORDER_POLL_INTERVAL).await;
            order.refresh().await?;
            match &order.state().status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(IssueError::Order {
                        host: host.to_string(),
                        status: "invalid".to_string(),
                    })
                }
                status => tracing::debug!(host = %host, status = ?status, "Order pending"),
            }
        }
        Err(IssueError::Timeout(host.to_string()))
    }

    async fn validate(&self, order: &mut Order, host: &str) -> Result<(), IssueError> {
        self.authorize(order, host).await?;
        self.wait_ready(order, host).await
    }
}

#[async_trait]
impl CertificateIssuer for AcmeIssuer {
    async fn issue(&self, host: &str) -> Result<IssuedCert, IssueError> {
        let account = self.account().await?;

        let identifiers = [Identifier::Dns(host.to_string())];
        let mut order = account.new_order(&NewOrder::new(&identifiers)).await?;
        tracing::debug!(host = %host, status = ?order.state().status, "ACME order created");

        let validated = self.validate(&mut order, host).await;
        self.challenges.remove(host);
        validated?;

        let key_pem = order.finalize().await?;

        for _ in 0..CERT_POLL_ATTEMPTS {
            if let Some(chain_pem) = order.certificate().await? {
                tracing::info!(host = %host, "Certificate issued");
                return Ok(IssuedCert { key_pem, chain_pem });
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(IssueError::Timeout(host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_selection() {
        let prod = AcmeSettings::new(false, None, None);
        assert_eq!(prod.directory_url, LetsEncrypt::Production.url());
        assert_eq!(prod.account_file(), "acme_account+acme-v02.api.letsencrypt.org.json");

        let staging = AcmeSettings::new(true, None, None);
        assert_eq!(staging.directory_url, LetsEncrypt::Staging.url());
        assert_eq!(
            staging.account_file(),
            "acme_account+acme-staging-v02.api.letsencrypt.org.json"
        );

        let custom = AcmeSettings::new(true, Some("https://ca.internal:14000/dir".into()), None);
        assert_eq!(custom.account_file(), "acme_account+ca.internal.json");
    }

    #[test]
    fn bundle_joins_key_and_chain() {
        let issued = IssuedCert {
            key_pem: "KEY".into(),
            chain_pem: "CHAIN\n".into(),
        };
        assert_eq!(issued.bundle(), "KEY\nCHAIN\n");
    }
}
