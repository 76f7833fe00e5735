//! DNS resolution used to verify customer records

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::domains::records::same_value;
use crate::errors::{PipelineError, PipelineResult};
use crate::http::HttpClient;
use crate::models::{DnsRecord, DnsRecordType};

/// Looks up published DNS records
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Values published for `name`; empty when the name does not exist
    async fn lookup(&self, name: &str, record_type: DnsRecordType) -> PipelineResult<Vec<String>>;
}

/// Expected records that are not published, as `TYPE name -> value`.
///
/// Resolver failures are returned as errors so callers can retry them.
pub async fn missing_records(
    resolver: &dyn DnsResolver,
    domain: &str,
    expected: &[DnsRecord],
) -> PipelineResult<Vec<String>> {
    let mut missing = Vec::new();
    for record in expected {
        let name = record.fqdn(domain);
        let values = resolver.lookup(&name, record.record_type).await?;
        debug!(name = %name, record_type = %record.record_type, ?values, "Resolved record");

        if !values.iter().any(|v| same_value(v, &record.value)) {
            missing.push(format!("{} {} -> {}", record.record_type, name, record.value));
        }
    }
    Ok(missing)
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

const RCODE_NOERROR: u32 = 0;
const RCODE_NXDOMAIN: u32 = 3;

fn wire_type(record_type: DnsRecordType) -> u16 {
    match record_type {
        DnsRecordType::A => 1,
        DnsRecordType::Cname => 5,
    }
}

/// Resolver backed by a DNS-over-HTTPS JSON endpoint
#[derive(Debug, Clone)]
pub struct DohResolver {
    client: HttpClient,
}

impl DohResolver {
    pub fn new(base_url: &str, timeout: Duration) -> PipelineResult<Self> {
        Ok(Self {
            client: HttpClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl DnsResolver for DohResolver {
    async fn lookup(&self, name: &str, record_type: DnsRecordType) -> PipelineResult<Vec<String>> {
        let query = [("name", name), ("type", record_type.as_str())];
        let response: DohResponse = self
            .client
            .get("/resolve", &query)
            .await?
            .ok_or_else(|| PipelineError::external("DNS-over-HTTPS endpoint not found"))?;

        match response.status {
            RCODE_NOERROR => {
                let wanted = wire_type(record_type);
                Ok(response
                    .answer
                    .into_iter()
                    .filter(|a| a.record_type == wanted)
                    .map(|a| a.data)
                    .collect())
            }
            RCODE_NXDOMAIN => Ok(Vec::new()),
            rcode => Err(PipelineError::external(format!(
                "DNS lookup of {} {} failed with rcode {}",
                record_type, name, rcode
            ))),
        }
    }
}

/// Resolver answering from a fixed table
#[derive(Debug, Default)]
pub struct StaticResolver {
    records: RwLock<HashMap<(String, DnsRecordType), Vec<String>>>,
    failures: AtomicU32,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish values for a name, replacing earlier ones
    pub fn set(&self, name: &str, record_type: DnsRecordType, values: Vec<String>) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert((name.to_ascii_lowercase(), record_type), values);
    }

    /// Publish every record in `expected` exactly as required
    pub fn publish(&self, domain: &str, expected: &[DnsRecord]) {
        for record in expected {
            self.set(&record.fqdn(domain), record.record_type, vec![record.value.clone()]);
        }
    }

    /// Make the next `count` lookups fail as if the resolver were down
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn lookup(&self, name: &str, record_type: DnsRecordType) -> PipelineResult<Vec<String>> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PipelineError::external("resolver unavailable"));
        }

        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(&(name.to_ascii_lowercase(), record_type))
            .cloned()
            .unwrap_or_default())
    }
}
