//! Domain record models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ids::{DomainId, SiteId};

/// How a domain is bound to a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    /// A name under the platform's hosting zone
    Subdomain,
    /// A customer-owned apex domain
    Custom,
}

/// DNS verification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Pending,
    Active,
    Failed,
}

/// TLS certificate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslStatus {
    Pending,
    Issued,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    A,
    Cname,
}

impl DnsRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsRecordType::A => "A",
            DnsRecordType::Cname => "CNAME",
        }
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DNS record the customer must publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    #[serde(rename = "type")]
    pub record_type: DnsRecordType,
    /// Record name relative to the domain; `@` is the apex
    pub name: String,
    pub value: String,
    pub ttl: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
}

impl DnsRecord {
    /// Fully qualified name to query for this record
    pub fn fqdn(&self, domain: &str) -> String {
        match self.name.as_str() {
            "@" => domain.to_string(),
            name if name == domain || name.ends_with(&format!(".{}", domain)) => name.to_string(),
            name => format!("{}.{}", name, domain),
        }
    }
}

/// A domain bound to a site with its verification and TLS sub-lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRecord {
    pub id: DomainId,
    pub site_id: SiteId,
    pub domain: String,
    #[serde(rename = "type")]
    pub domain_type: DomainType,
    pub status: DomainStatus,
    pub dns_records: Vec<DnsRecord>,
    pub ssl_status: SslStatus,
    pub ssl_provider: Option<String>,
    pub certificate_expires_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    /// Reason for the last verification failure
    pub error: Option<String>,
    /// Reason for the last issuance failure
    pub ssl_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DomainRecord {
    pub fn new(
        site_id: SiteId,
        domain: String,
        domain_type: DomainType,
        dns_records: Vec<DnsRecord>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DomainId::generate(),
            site_id,
            domain,
            domain_type,
            status: DomainStatus::Pending,
            dns_records,
            ssl_status: SslStatus::Pending,
            ssl_provider: None,
            certificate_expires_at: None,
            verified_at: None,
            error: None,
            ssl_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> DnsRecord {
        DnsRecord {
            record_type: DnsRecordType::Cname,
            name: name.to_string(),
            value: "hosting.example.net".to_string(),
            ttl: 300,
            priority: None,
        }
    }

    #[test]
    fn test_fqdn_resolution() {
        assert_eq!(record("@").fqdn("example.com"), "example.com");
        assert_eq!(record("www").fqdn("example.com"), "www.example.com");
        assert_eq!(record("blog.example.com").fqdn("blog.example.com"), "blog.example.com");
    }

    #[test]
    fn test_record_type_wire_name() {
        let json = serde_json::to_value(record("www")).unwrap();
        assert_eq!(json["type"], "CNAME");
    }
}
