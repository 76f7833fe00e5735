//! Custom domains
//!
//! Each domain bound to a site goes through DNS verification and, once
//! active, TLS certificate issuance. Both stages talk to external services
//! through the [`DnsResolver`] and [`CertificateAuthority`] traits.

pub mod authority;
pub mod provisioner;
pub mod records;
pub mod resolver;

pub use authority::{
    CertificateAuthority, HttpCertificateAuthority, IssuedCertificate, StaticAuthority,
};
pub use provisioner::{DomainOptions, DomainProvisioner};
pub use records::{normalize_domain, required_records, RecordTargets};
pub use resolver::{DnsResolver, DohResolver, StaticResolver};
