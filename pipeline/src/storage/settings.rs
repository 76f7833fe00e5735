//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::{PipelineError, PipelineResult};
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::SourceKind;

/// Daemon settings, read from a JSON file.
///
/// Every field is optional in the file; missing ones take their defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory for daily-rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Maximum delay for graceful shutdown in seconds
    #[serde(default = "default_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,

    #[serde(default)]
    pub builds: BuildSettings,

    #[serde(default)]
    pub deployments: DeploymentSettings,

    #[serde(default)]
    pub domains: DomainSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub blobs: BlobSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

fn default_true() -> bool {
    true
}

fn default_shutdown_delay() -> u64 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_attempts() -> u32 {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            max_shutdown_delay_secs: default_shutdown_delay(),
            builds: BuildSettings::default(),
            deployments: DeploymentSettings::default(),
            domains: DomainSettings::default(),
            cache: CacheSettings::default(),
            blobs: BlobSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file
    pub async fn load(path: impl Into<PathBuf>) -> PipelineResult<Self> {
        let file = File::new(path);
        if !file.exists().await {
            return Err(PipelineError::ConfigError(format!(
                "settings file {} does not exist",
                file.path().display()
            )));
        }
        let settings: Settings = file.read_json().await.map_err(|e| {
            PipelineError::ConfigError(format!("{}: {}", file.path().display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings no component could run with
    pub fn validate(&self) -> PipelineResult<()> {
        if self.builds.max_concurrency == 0 {
            return Err(PipelineError::ConfigError(
                "builds.max_concurrency must be positive".to_string(),
            ));
        }
        if self.deployments.max_concurrency == 0 {
            return Err(PipelineError::ConfigError(
                "deployments.max_concurrency must be positive".to_string(),
            ));
        }
        if self.builds.enabled_kinds.is_empty() {
            return Err(PipelineError::ConfigError(
                "builds.enabled_kinds must name at least one source kind".to_string(),
            ));
        }
        if self.domains.platform_ipv4.parse::<std::net::Ipv4Addr>().is_err() {
            return Err(PipelineError::ConfigError(format!(
                "domains.platform_ipv4 {} is not an IPv4 address",
                self.domains.platform_ipv4
            )));
        }
        for (name, url) in [
            ("cache.edge_url", &self.cache.edge_url),
            ("domains.resolver_url", &self.domains.resolver_url),
            ("domains.authority_url", &self.domains.authority_url),
        ] {
            if let Some(url) = url {
                url::Url::parse(url).map_err(|e| {
                    PipelineError::ConfigError(format!("{} {}: {}", name, url, e))
                })?;
            }
        }
        Ok(())
    }
}

/// Build orchestrator settings
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSettings {
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,

    /// Attempts per build for transient builder errors
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_kinds")]
    pub enabled_kinds: Vec<SourceKind>,
}

fn default_build_timeout() -> u64 {
    600
}

fn default_kinds() -> Vec<SourceKind> {
    SourceKind::ALL.to_vec()
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            timeout_secs: default_build_timeout(),
            max_attempts: default_attempts(),
            enabled_kinds: default_kinds(),
        }
    }
}

/// Deployment manager settings
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentSettings {
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,

    /// Files copied concurrently per deployment
    #[serde(default = "default_publish_parallelism")]
    pub publish_parallelism: usize,

    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    /// Deploy every completed build, even without `deploy_on_success`
    #[serde(default)]
    pub deploy_all_builds: bool,
}

fn default_publish_timeout() -> u64 {
    300
}

fn default_publish_parallelism() -> usize {
    8
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            publish_timeout_secs: default_publish_timeout(),
            publish_parallelism: default_publish_parallelism(),
            max_attempts: default_attempts(),
            deploy_all_builds: false,
        }
    }
}

/// Domain provisioner settings
#[derive(Debug, Clone, Deserialize)]
pub struct DomainSettings {
    #[serde(default = "default_platform_ipv4")]
    pub platform_ipv4: String,

    #[serde(default = "default_hosting_endpoint")]
    pub hosting_endpoint: String,

    #[serde(default = "default_ttl")]
    pub ttl: u32,

    #[serde(default = "default_propagation_delay")]
    pub propagation_delay_secs: u64,

    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,

    #[serde(default = "default_issue_timeout")]
    pub issue_timeout_secs: u64,

    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    /// DNS-over-HTTPS endpoint; records are answered from memory when unset
    #[serde(default)]
    pub resolver_url: Option<String>,

    /// Certificate authority API; certificates are issued locally when unset
    #[serde(default)]
    pub authority_url: Option<String>,

    #[serde(default)]
    pub authority_api_key: Option<SecretString>,
}

fn default_platform_ipv4() -> String {
    "203.0.113.10".to_string()
}

fn default_hosting_endpoint() -> String {
    "hosting.sitepipe.dev".to_string()
}

fn default_ttl() -> u32 {
    300
}

fn default_propagation_delay() -> u64 {
    30
}

fn default_verify_timeout() -> u64 {
    60
}

fn default_issue_timeout() -> u64 {
    120
}

impl Default for DomainSettings {
    fn default() -> Self {
        Self {
            platform_ipv4: default_platform_ipv4(),
            hosting_endpoint: default_hosting_endpoint(),
            ttl: default_ttl(),
            propagation_delay_secs: default_propagation_delay(),
            verify_timeout_secs: default_verify_timeout(),
            issue_timeout_secs: default_issue_timeout(),
            max_attempts: default_attempts(),
            resolver_url: None,
            authority_url: None,
            authority_api_key: None,
        }
    }
}

/// Edge cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Edge API base URL; an in-memory edge is used when unset
    #[serde(default)]
    pub edge_url: Option<String>,

    #[serde(default)]
    pub edge_api_key: Option<SecretString>,

    /// Entries kept by the in-memory edge
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_stage_timeout() -> u64 {
    60
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            edge_url: None,
            edge_api_key: None,
            capacity: default_cache_capacity(),
            stage_timeout_secs: default_stage_timeout(),
            max_attempts: default_attempts(),
        }
    }
}

/// Blob store settings
#[derive(Debug, Clone, Deserialize)]
pub struct BlobSettings {
    /// Directory holding artifacts; kept in memory when unset
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Public URL prefix of stored blobs
    #[serde(default = "default_blob_url")]
    pub base_url: String,
}

fn default_blob_url() -> String {
    "http://localhost:8080/blobs".to_string()
}

impl Default for BlobSettings {
    fn default() -> Self {
        Self {
            root: None,
            base_url: default_blob_url(),
        }
    }
}

/// Operations server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.log_level, LogLevel::Info);
        assert_eq!(settings.builds.max_concurrency, 4);
        assert_eq!(settings.builds.enabled_kinds.len(), 3);
        assert_eq!(settings.domains.ttl, 300);
        assert!(settings.cache.edge_url.is_none());
        assert!(settings.server.enabled);
        settings.validate().unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "log_level": "debug",
                "builds": { "max_concurrency": 2, "enabled_kinds": ["template"] },
                "cache": { "edge_url": "https://edge.example.net", "edge_api_key": "k3y" }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.builds.max_concurrency, 2);
        assert_eq!(settings.builds.timeout_secs, 600);
        assert_eq!(settings.builds.enabled_kinds, vec![SourceKind::Template]);
        assert_eq!(
            settings.cache.edge_api_key.as_ref().unwrap().expose_secret(),
            "k3y"
        );
        assert!(!format!("{:?}", settings).contains("k3y"));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.deployments.max_concurrency = 0;
        assert!(matches!(
            settings.validate(),
            Err(PipelineError::ConfigError(_))
        ));

        let mut settings = Settings::default();
        settings.domains.resolver_url = Some("not a url".to_string());
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.domains.platform_ipv4 = "example.com".to_string();
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "server": { "port": 9090 } }"#).unwrap();

        let settings = Settings::load(&path).await.unwrap();
        assert_eq!(settings.server.port, 9090);

        let missing = Settings::load(dir.path().join("missing.json")).await;
        assert!(matches!(missing, Err(PipelineError::ConfigError(_))));
    }
}
