//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::builder::BuildOptions;
use crate::cache::CacheOptions;
use crate::deploy::DeployOptions;
use crate::domains::{DomainOptions, RecordTargets};
use crate::pipeline::PipelineOptions;
use crate::storage::settings::Settings;
use crate::utils::RetryOptions;
use crate::workers::promoter;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Component options
    pub pipeline: PipelineOptions,

    /// External collaborators
    pub adapters: AdapterOptions,

    /// Operations server configuration
    pub server: ServerOptions,

    /// Promoter worker options
    pub promoter: promoter::Options,
}

impl AppOptions {
    /// Runtime view of a settings file
    pub fn from_settings(settings: &Settings) -> Self {
        let secs = Duration::from_secs;
        let retry = |max_attempts: u32| RetryOptions {
            max_attempts,
            ..Default::default()
        };

        let pipeline = PipelineOptions {
            builds: BuildOptions {
                max_concurrency: settings.builds.max_concurrency,
                timeout: secs(settings.builds.timeout_secs),
                retry: retry(settings.builds.max_attempts),
                ..Default::default()
            },
            deployments: DeployOptions {
                max_concurrency: settings.deployments.max_concurrency,
                publish_timeout: secs(settings.deployments.publish_timeout_secs),
                publish_retry: retry(settings.deployments.max_attempts),
                publish_parallelism: settings.deployments.publish_parallelism,
            },
            domains: DomainOptions {
                targets: RecordTargets {
                    platform_ipv4: settings.domains.platform_ipv4.clone(),
                    hosting_endpoint: settings.domains.hosting_endpoint.clone(),
                    ttl: settings.domains.ttl,
                },
                propagation_delay: secs(settings.domains.propagation_delay_secs),
                verify_timeout: secs(settings.domains.verify_timeout_secs),
                verify_retry: retry(settings.domains.max_attempts),
                issue_timeout: secs(settings.domains.issue_timeout_secs),
                issue_retry: retry(settings.domains.max_attempts),
            },
            cache: CacheOptions {
                retry: retry(settings.cache.max_attempts),
                stage_timeout: secs(settings.cache.stage_timeout_secs),
            },
            enabled_kinds: settings.builds.enabled_kinds.clone(),
        };

        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: secs(settings.max_shutdown_delay_secs),
            },
            pipeline,
            adapters: AdapterOptions {
                blob_root: settings.blobs.root.clone(),
                blob_base_url: settings.blobs.base_url.clone(),
                edge_url: settings.cache.edge_url.clone(),
                edge_api_key: settings.cache.edge_api_key.clone(),
                edge_capacity: settings.cache.capacity,
                resolver_url: settings.domains.resolver_url.clone(),
                authority_url: settings.domains.authority_url.clone(),
                authority_api_key: settings.domains.authority_api_key.clone(),
                ..Default::default()
            },
            server: ServerOptions {
                enabled: settings.server.enabled,
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            promoter: promoter::Options {
                deploy_all: settings.deployments.deploy_all_builds,
            },
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Which adapter serves each external collaborator.
///
/// Unset URLs select the in-process implementation.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub blob_root: Option<PathBuf>,
    pub blob_base_url: String,
    pub edge_url: Option<String>,
    pub edge_api_key: Option<SecretString>,
    pub edge_capacity: usize,
    pub resolver_url: Option<String>,
    pub authority_url: Option<String>,
    pub authority_api_key: Option<SecretString>,
    /// Per-request timeout of every HTTP adapter
    pub http_timeout: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            blob_root: None,
            blob_base_url: "http://localhost:8080/blobs".to_string(),
            edge_url: None,
            edge_api_key: None,
            edge_capacity: 10_000,
            resolver_url: None,
            authority_url: None,
            authority_api_key: None,
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Operations HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub enabled: bool,

    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
