//! Finite state machine for domain verification and certificate issuance

use chrono::{DateTime, Utc};

use crate::errors::{PipelineError, PipelineResult};
use crate::models::domain::{DomainRecord, DomainStatus, SslStatus};

/// Domain event
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// The expected DNS records were observed
    Verified,

    /// Verification gave up
    VerificationFailed(String),

    /// Records were regenerated; verification starts over
    Reset,

    /// A certificate was issued
    CertificateIssued {
        provider: String,
        expires_at: Option<DateTime<Utc>>,
    },

    /// Certificate issuance gave up
    IssuanceFailed(String),
}

/// Domain FSM
///
/// Tracks the verification status and the TLS sub-status together since
/// issuance is only legal once the domain is active.
#[derive(Debug, Clone)]
pub struct DomainFsm {
    status: DomainStatus,
    ssl_status: SslStatus,
}

impl DomainFsm {
    pub fn new() -> Self {
        Self {
            status: DomainStatus::Pending,
            ssl_status: SslStatus::Pending,
        }
    }

    pub fn resume(status: DomainStatus, ssl_status: SslStatus) -> Self {
        Self { status, ssl_status }
    }

    pub fn status(&self) -> DomainStatus {
        self.status
    }

    pub fn ssl_status(&self) -> SslStatus {
        self.ssl_status
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: &DomainEvent) -> Result<(), String> {
        let (status, ssl_status) = match (self.status, self.ssl_status, event) {
            (DomainStatus::Pending | DomainStatus::Failed, ssl, DomainEvent::Verified) => {
                (DomainStatus::Active, ssl)
            }

            (DomainStatus::Pending | DomainStatus::Failed, ssl, DomainEvent::VerificationFailed(reason)) => {
                if reason.trim().is_empty() {
                    return Err("A failed verification requires a reason".to_string());
                }
                (DomainStatus::Failed, ssl)
            }

            (_, _, DomainEvent::Reset) => (DomainStatus::Pending, SslStatus::Pending),

            (
                DomainStatus::Active,
                SslStatus::Pending | SslStatus::Failed,
                DomainEvent::CertificateIssued { .. },
            ) => (DomainStatus::Active, SslStatus::Issued),

            (DomainStatus::Active, SslStatus::Pending, DomainEvent::IssuanceFailed(reason)) => {
                if reason.trim().is_empty() {
                    return Err("A failed issuance requires a reason".to_string());
                }
                (DomainStatus::Active, SslStatus::Failed)
            }

            // Invalid transitions
            (status, ssl, event) => {
                return Err(format!(
                    "Invalid transition: {:?}/{:?} -> {:?}",
                    status, ssl, event
                ));
            }
        };

        self.status = status;
        self.ssl_status = ssl_status;
        Ok(())
    }
}

impl Default for DomainFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainRecord {
    /// Apply an event; rejected transitions leave the record unchanged
    pub fn apply(&mut self, event: DomainEvent) -> PipelineResult<()> {
        let mut fsm = DomainFsm::resume(self.status, self.ssl_status);
        fsm.process(&event).map_err(|e| {
            PipelineError::Conflict(format!("domain {}: {}", self.domain, e))
        })?;

        let now = Utc::now();
        match event {
            DomainEvent::Verified => {
                self.verified_at = Some(now);
                self.error = None;
            }
            DomainEvent::VerificationFailed(reason) => {
                self.error = Some(reason);
            }
            DomainEvent::Reset => {
                self.verified_at = None;
                self.error = None;
                self.ssl_error = None;
                self.ssl_provider = None;
                self.certificate_expires_at = None;
            }
            DomainEvent::CertificateIssued {
                provider,
                expires_at,
            } => {
                self.ssl_provider = Some(provider);
                self.certificate_expires_at = expires_at;
                self.ssl_error = None;
            }
            DomainEvent::IssuanceFailed(reason) => {
                self.ssl_error = Some(reason);
            }
        }
        self.status = fsm.status();
        self.ssl_status = fsm.ssl_status();
        self.updated_at = now;
        Ok(())
    }
}
