//! Domain name validation and required DNS record generation

use crate::errors::{PipelineError, PipelineResult};
use crate::models::{DnsRecord, DnsRecordType, DomainType};

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Where customer records must point
#[derive(Debug, Clone)]
pub struct RecordTargets {
    /// Address apex `A` records resolve to
    pub platform_ipv4: String,
    /// Host subdomain `CNAME` records resolve to
    pub hosting_endpoint: String,
    pub ttl: u32,
}

impl Default for RecordTargets {
    fn default() -> Self {
        Self {
            platform_ipv4: "203.0.113.10".to_string(),
            hosting_endpoint: "hosting.sitepipe.dev".to_string(),
            ttl: 300,
        }
    }
}

/// Canonical form of a user supplied domain.
///
/// Lowercases, drops one trailing dot and checks every label.
pub fn normalize_domain(input: &str) -> PipelineResult<String> {
    let domain = input.trim().trim_end_matches('.').to_ascii_lowercase();

    if domain.is_empty() {
        return Err(PipelineError::validation("domain must not be empty"));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(PipelineError::validation(format!(
            "domain {} is longer than {} characters",
            domain, MAX_DOMAIN_LEN
        )));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(PipelineError::validation(format!(
            "domain {} needs at least two labels",
            domain
        )));
    }

    for label in &labels {
        let valid = !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(PipelineError::validation(format!(
                "domain {} has an invalid label '{}'",
                domain, label
            )));
        }
    }

    Ok(domain)
}

/// Records the customer must publish for `domain` to be verified
pub fn required_records(domain: &str, domain_type: DomainType, targets: &RecordTargets) -> Vec<DnsRecord> {
    match domain_type {
        DomainType::Custom => vec![
            DnsRecord {
                record_type: DnsRecordType::A,
                name: "@".to_string(),
                value: targets.platform_ipv4.clone(),
                ttl: targets.ttl,
                priority: None,
            },
            DnsRecord {
                record_type: DnsRecordType::Cname,
                name: "www".to_string(),
                value: domain.to_string(),
                ttl: targets.ttl,
                priority: None,
            },
        ],
        DomainType::Subdomain => vec![DnsRecord {
            record_type: DnsRecordType::Cname,
            name: domain.to_string(),
            value: targets.hosting_endpoint.clone(),
            ttl: targets.ttl,
            priority: None,
        }],
    }
}

/// Compare record values ignoring case and the root dot
pub(crate) fn same_value(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain(" Example.COM. ").unwrap(), "example.com");
        assert_eq!(normalize_domain("my-site.example.com").unwrap(), "my-site.example.com");

        for bad in ["", "localhost", "-bad.com", "bad-.com", "a..com", "sp ace.com", "under_score.com"] {
            assert!(
                matches!(normalize_domain(bad), Err(PipelineError::Validation(_))),
                "{} should be rejected",
                bad
            );
        }

        let long_label = format!("{}.com", "a".repeat(64));
        assert!(normalize_domain(&long_label).is_err());
    }

    #[test]
    fn test_custom_domain_records() {
        let targets = RecordTargets::default();
        let records = required_records("example.com", DomainType::Custom, &targets);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_type, DnsRecordType::A);
        assert_eq!(records[0].name, "@");
        assert_eq!(records[0].value, targets.platform_ipv4);
        assert_eq!(records[1].record_type, DnsRecordType::Cname);
        assert_eq!(records[1].fqdn("example.com"), "www.example.com");
        assert_eq!(records[1].value, "example.com");
        assert!(records.iter().all(|r| r.ttl == 300));
    }

    #[test]
    fn test_subdomain_records() {
        let targets = RecordTargets::default();
        let records = required_records("shop.example.com", DomainType::Subdomain, &targets);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, DnsRecordType::Cname);
        assert_eq!(records[0].fqdn("shop.example.com"), "shop.example.com");
        assert_eq!(records[0].value, targets.hosting_endpoint);
    }

    #[test]
    fn test_same_value() {
        assert!(same_value("Example.com.", "example.com"));
        assert!(!same_value("example.org", "example.com"));
    }
}
