//! TLS certificate issuance

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, PipelineResult};
use crate::http::HttpClient;

/// Outcome of a successful issuance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub provider: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Issues certificates for verified domains
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn issue(&self, domain: &str) -> PipelineResult<IssuedCertificate>;
}

#[derive(Serialize)]
struct IssueRequest<'a> {
    domain: &'a str,
}

/// Certificate authority reached over its HTTP API
#[derive(Debug, Clone)]
pub struct HttpCertificateAuthority {
    client: HttpClient,
}

impl HttpCertificateAuthority {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        Ok(Self {
            client: HttpClient::new(base_url, timeout)?.with_api_key(api_key),
        })
    }
}

#[async_trait]
impl CertificateAuthority for HttpCertificateAuthority {
    async fn issue(&self, domain: &str) -> PipelineResult<IssuedCertificate> {
        self.client
            .post("/certificates", &IssueRequest { domain })
            .await
    }
}

/// Authority that issues immediately with a fixed validity
#[derive(Debug)]
pub struct StaticAuthority {
    provider: String,
    validity: chrono::Duration,
    failures: AtomicU32,
    issued: RwLock<Vec<String>>,
}

impl StaticAuthority {
    pub fn new(provider: impl Into<String>, validity_days: i64) -> Self {
        Self {
            provider: provider.into(),
            validity: chrono::Duration::days(validity_days),
            failures: AtomicU32::new(0),
            issued: RwLock::new(Vec::new()),
        }
    }

    /// Fail the next `count` requests with an external error
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Domains issued so far, in order
    pub fn issued(&self) -> Vec<String> {
        self.issued.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for StaticAuthority {
    fn default() -> Self {
        Self::new("letsencrypt", 90)
    }
}

#[async_trait]
impl CertificateAuthority for StaticAuthority {
    async fn issue(&self, domain: &str) -> PipelineResult<IssuedCertificate> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PipelineError::external("certificate authority unavailable"));
        }

        self.issued
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(domain.to_string());
        Ok(IssuedCertificate {
            provider: self.provider.clone(),
            expires_at: Some(Utc::now() + self.validity),
        })
    }
}
