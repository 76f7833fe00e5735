//! Domain provisioning: DNS verification followed by TLS issuance

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domains::authority::CertificateAuthority;
use crate::domains::records::{normalize_domain, required_records, RecordTargets};
use crate::domains::resolver::{missing_records, DnsResolver};
use crate::errors::{PipelineError, PipelineResult};
use crate::fsm::DomainEvent;
use crate::metrics::{Metric, PipelineMetrics};
use crate::models::{DomainId, DomainRecord, DomainStatus, DomainType, SiteId, SslStatus};
use crate::store::PipelineStore;
use crate::utils::{retry_transient, with_timeout, RetryOptions};

/// Domain provisioner options
#[derive(Debug, Clone)]
pub struct DomainOptions {
    pub targets: RecordTargets,
    /// Wait before the first check of a new or updated domain
    pub propagation_delay: Duration,
    /// Maximum duration of one verification, retries included
    pub verify_timeout: Duration,
    pub verify_retry: RetryOptions,
    /// Maximum duration of one issuance, retries included
    pub issue_timeout: Duration,
    pub issue_retry: RetryOptions,
}

impl Default for DomainOptions {
    fn default() -> Self {
        Self {
            targets: RecordTargets::default(),
            propagation_delay: Duration::from_secs(30),
            verify_timeout: Duration::from_secs(60),
            verify_retry: RetryOptions::default(),
            issue_timeout: Duration::from_secs(120),
            issue_retry: RetryOptions::default(),
        }
    }
}

/// In-flight provisioning for one domain
struct DomainTask {
    seq: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Binds domains to sites and drives their verification lifecycle
pub struct DomainProvisioner {
    store: Arc<dyn PipelineStore>,
    resolver: Arc<dyn DnsResolver>,
    authority: Arc<dyn CertificateAuthority>,
    metrics: Arc<PipelineMetrics>,
    options: DomainOptions,
    tasks: DashMap<DomainId, DomainTask>,
    next_seq: AtomicU64,
}

impl DomainProvisioner {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        resolver: Arc<dyn DnsResolver>,
        authority: Arc<dyn CertificateAuthority>,
        metrics: Arc<PipelineMetrics>,
        options: DomainOptions,
    ) -> Self {
        Self {
            store,
            resolver,
            authority,
            metrics,
            options,
            tasks: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Bind a domain to a site and start verifying it after the propagation delay
    pub async fn add_domain(
        self: &Arc<Self>,
        site_id: &SiteId,
        domain: &str,
        domain_type: DomainType,
    ) -> PipelineResult<DomainRecord> {
        if self.store.get_site(site_id).await?.is_none() {
            return Err(PipelineError::not_found(format!("site {}", site_id)));
        }

        let domain = normalize_domain(domain)?;
        let records = required_records(&domain, domain_type, &self.options.targets);
        let record = DomainRecord::new(site_id.clone(), domain, domain_type, records);
        self.store.insert_domain(&record).await?;

        self.metrics.record(Metric::DomainAdded);
        info!(domain_id = %record.id, site_id = %site_id, domain = %record.domain, "Domain added");

        self.spawn(&record.id, self.options.propagation_delay);
        Ok(record)
    }

    pub async fn get_domain(&self, id: &DomainId) -> PipelineResult<DomainRecord> {
        self.store
            .get_domain(id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("domain {}", id)))
    }

    pub async fn list_domains(&self, site_id: &SiteId) -> PipelineResult<Vec<DomainRecord>> {
        self.store.list_domains(site_id).await
    }

    /// Change how a domain is bound; verification starts over
    pub async fn update_domain(
        self: &Arc<Self>,
        id: &DomainId,
        domain_type: DomainType,
    ) -> PipelineResult<DomainRecord> {
        self.cancel_task(id);

        let targets = self.options.targets.clone();
        let record = self
            .store
            .update_domain(
                id,
                Box::new(move |d: &mut DomainRecord| {
                    d.apply(DomainEvent::Reset)?;
                    d.domain_type = domain_type;
                    d.dns_records = required_records(&d.domain, domain_type, &targets);
                    Ok(())
                }),
            )
            .await?;

        info!(domain_id = %id, domain = %record.domain, ?domain_type, "Domain updated");
        self.spawn(id, self.options.propagation_delay);
        Ok(record)
    }

    /// Unbind a domain, stopping any verification or issuance in flight
    pub async fn delete_domain(&self, id: &DomainId) -> PipelineResult<DomainRecord> {
        self.cancel_task(id);

        let record = self
            .store
            .delete_domain(id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("domain {}", id)))?;
        info!(domain_id = %id, domain = %record.domain, "Domain deleted");
        Ok(record)
    }

    /// Check DNS now instead of waiting for the background check.
    ///
    /// An active domain is returned unchanged. Fails with a conflict when the
    /// domain is updated while its records are being looked up.
    pub async fn verify_domain(self: &Arc<Self>, id: &DomainId) -> PipelineResult<DomainRecord> {
        let record = self.get_domain(id).await?;
        if record.status == DomainStatus::Active {
            debug!(domain_id = %id, "Domain already active");
            return Ok(record);
        }

        self.cancel_task(id);
        let record = self.verify(id).await?;
        if record.status == DomainStatus::Active {
            self.spawn(id, Duration::ZERO);
        }
        Ok(record)
    }

    /// Stop every in-flight task
    pub fn shutdown(&self) {
        for task in self.tasks.iter() {
            task.token.cancel();
        }
        self.tasks.clear();
    }

    /// Number of domains with provisioning in flight
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    fn cancel_task(&self, id: &DomainId) {
        if let Some((_, task)) = self.tasks.remove(id) {
            task.token.cancel();
            task.handle.abort();
            debug!(domain_id = %id, "Cancelled domain task");
        }
    }

    /// Start verification (after `delay`) and issuance in the background
    fn spawn(self: &Arc<Self>, id: &DomainId, delay: Duration) {
        self.cancel_task(id);

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let this = Arc::clone(self);
        let task_id = id.clone();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {}
                _ = this.provision(&task_id, delay) => {}
            }
            this.tasks.remove_if(&task_id, |_, task| task.seq == seq);
        });

        // A task that already ran to completion has removed itself
        if !handle.is_finished() {
            self.tasks.insert(id.clone(), DomainTask { seq, token, handle });
        }
    }

    async fn provision(&self, id: &DomainId, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let record = match self.verify(id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(domain_id = %id, "Domain verification stopped: {}", e);
                return;
            }
        };

        if record.status == DomainStatus::Active && record.ssl_status != SslStatus::Issued {
            if let Err(e) = self.issue(&record).await {
                warn!(domain_id = %id, "Certificate issuance stopped: {}", e);
            }
        }
    }

    /// Check the domain's records and record the outcome
    async fn verify(&self, id: &DomainId) -> PipelineResult<DomainRecord> {
        let record = self.get_domain(id).await?;
        if record.status == DomainStatus::Active {
            return Ok(record);
        }

        let checked = with_timeout(
            "dns verification",
            self.options.verify_timeout,
            retry_transient(&self.options.verify_retry, "dns lookup", |_| {
                missing_records(self.resolver.as_ref(), &record.domain, &record.dns_records)
            }),
        )
        .await;

        let event = match checked {
            Ok(missing) if missing.is_empty() => DomainEvent::Verified,
            Ok(missing) => {
                DomainEvent::VerificationFailed(format!("records not found: {}", missing.join(", ")))
            }
            Err(e) => DomainEvent::VerificationFailed(e.to_string()),
        };
        let verified = matches!(event, DomainEvent::Verified);

        let checked_type = record.domain_type;
        let checked_records = record.dns_records;
        let updated = self
            .store
            .update_domain(
                id,
                Box::new(move |d: &mut DomainRecord| {
                    // The outcome only holds for the records that were looked up
                    if d.domain_type != checked_type || d.dns_records != checked_records {
                        return Err(PipelineError::conflict(format!(
                            "domain {} changed during verification",
                            d.domain
                        )));
                    }
                    // A concurrent check already activated it
                    if d.status == DomainStatus::Active {
                        return Ok(());
                    }
                    d.apply(event)
                }),
            )
            .await?;

        if verified {
            self.metrics.record(Metric::DomainVerified);
            info!(domain_id = %id, domain = %updated.domain, "Domain verified");
        } else if updated.status == DomainStatus::Failed {
            self.metrics.record(Metric::DomainFailed);
            error!(
                domain_id = %id,
                domain = %updated.domain,
                "Domain verification failed: {}",
                updated.error.as_deref().unwrap_or_default()
            );
        }
        Ok(updated)
    }

    async fn issue(&self, record: &DomainRecord) -> PipelineResult<DomainRecord> {
        let issued = with_timeout(
            "certificate issuance",
            self.options.issue_timeout,
            retry_transient(&self.options.issue_retry, "certificate request", |_| {
                self.authority.issue(&record.domain)
            }),
        )
        .await;

        match issued {
            Ok(cert) => {
                let provider = cert.provider.clone();
                let updated = self
                    .store
                    .update_domain(
                        &record.id,
                        Box::new(move |d: &mut DomainRecord| {
                            if d.ssl_status == SslStatus::Issued {
                                return Ok(());
                            }
                            d.apply(DomainEvent::CertificateIssued {
                                provider: cert.provider,
                                expires_at: cert.expires_at,
                            })
                        }),
                    )
                    .await?;
                self.metrics.record(Metric::CertificateIssued);
                info!(domain_id = %record.id, domain = %record.domain, provider = %provider, "Certificate issued");
                Ok(updated)
            }
            Err(e) => {
                let reason = e.to_string();
                error!(domain_id = %record.id, domain = %record.domain, "Certificate issuance failed: {}", reason);
                let updated = self
                    .store
                    .update_domain(
                        &record.id,
                        Box::new(move |d: &mut DomainRecord| {
                            if d.ssl_status != SslStatus::Pending {
                                return Ok(());
                            }
                            d.apply(DomainEvent::IssuanceFailed(reason))
                        }),
                    )
                    .await?;
                self.metrics.record(Metric::CertificateFailed);
                Ok(updated)
            }
        }
    }
}
