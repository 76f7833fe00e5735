//! Build job models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::models::ids::{BuildId, SiteId, UserId};
use crate::utils::sha256_hash;

/// Kind of source a build starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    VisualEditor,
    RawCode,
    Template,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::VisualEditor,
        SourceKind::RawCode,
        SourceKind::Template,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::VisualEditor => "visual-editor",
            SourceKind::RawCode => "raw-code",
            SourceKind::Template => "template",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visual-editor" | "visual_editor" => Ok(SourceKind::VisualEditor),
            "raw-code" | "code" => Ok(SourceKind::RawCode),
            "template" => Ok(SourceKind::Template),
            _ => Err(PipelineError::validation(format!(
                "unsupported source kind: {}",
                s
            ))),
        }
    }
}

/// One section of a visual-editor page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualSection {
    pub heading: String,
    #[serde(default)]
    pub body: String,
}

/// Colours and typography chosen in the visual editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualTheme {
    pub primary_color: String,
    pub background_color: String,
    pub font_family: String,
}

impl Default for VisualTheme {
    fn default() -> Self {
        Self {
            primary_color: "#333333".to_string(),
            background_color: "#ffffff".to_string(),
            font_family: "Arial, sans-serif".to_string(),
        }
    }
}

/// Document produced by the visual editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualDocument {
    pub title: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub sections: Vec<VisualSection>,
    #[serde(default)]
    pub theme: VisualTheme,
}

/// A single hand-written source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// Raw code uploaded as a bundle of files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBundle {
    pub files: Vec<SourceFile>,
    /// Entry document, defaults to `/index.html`
    #[serde(default)]
    pub entry: Option<String>,
}

/// A catalog template plus the values for its placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSelection {
    pub template_id: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// What a build starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum SourceDescriptor {
    VisualEditor(VisualDocument),
    RawCode(CodeBundle),
    Template(TemplateSelection),
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::VisualEditor(_) => SourceKind::VisualEditor,
            SourceDescriptor::RawCode(_) => SourceKind::RawCode,
            SourceDescriptor::Template(_) => SourceKind::Template,
        }
    }
}

/// Optimization switches applied by builders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptimization {
    pub minify_html: bool,
    pub minify_css: bool,
    pub minify_js: bool,
}

/// SEO metadata injected into generated pages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeoConfig {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
}

/// Build configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Target framework, "static" when unset
    pub framework: String,
    pub theme: Option<String>,
    pub optimization: BuildOptimization,
    pub environment: BTreeMap<String, String>,
    pub seo: SeoConfig,

    /// Create a deployment automatically once the build completes
    pub deploy_on_success: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            framework: "static".to_string(),
            theme: None,
            optimization: BuildOptimization::default(),
            environment: BTreeMap::new(),
            seo: SeoConfig::default(),
            deploy_on_success: false,
        }
    }
}

/// Build job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Building,
    Completed,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Completed | BuildStatus::Failed | BuildStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Building => "building",
            BuildStatus::Completed => "completed",
            BuildStatus::Failed => "failed",
            BuildStatus::Cancelled => "cancelled",
        }
    }
}

/// Severity of a build log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured log entry appended to a build job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildLogEntry {
    pub level: BuildLogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl BuildLogEntry {
    pub fn new(level: BuildLogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A file produced by a build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFile {
    pub path: String,
    pub content: String,
    pub content_type: String,
    pub size: u64,
    /// SHA256 of the content
    pub hash: String,
    #[serde(default)]
    pub optimized: bool,
    /// Blob store location once the artifact is uploaded
    #[serde(default)]
    pub url: Option<String>,
}

impl BuildFile {
    /// A file with its size and content hash filled in
    pub fn new(path: impl Into<String>, content: String, content_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: content.len() as u64,
            hash: sha256_hash(content.as_bytes()),
            content,
            content_type: content_type.into(),
            optimized: false,
            url: None,
        }
    }

    /// Replace the content with an optimized rendition
    pub fn optimized(mut self, content: String) -> Self {
        self.size = content.len() as u64;
        self.hash = sha256_hash(content.as_bytes());
        self.content = content;
        self.optimized = true;
        self
    }
}

/// Aggregate build statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub total_files: usize,
    /// Bytes of source before optimization
    pub total_size: u64,
    /// Bytes of the emitted artifact
    pub compressed_size: u64,
    pub optimized_files: usize,
    pub duration_ms: u64,
}

/// Artifact produced by a successful build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub files: Vec<BuildFile>,
    pub stats: BuildStats,
}

impl BuildOutput {
    /// Assemble an output and compute its aggregate stats
    pub fn from_files(files: Vec<BuildFile>) -> Self {
        let artifact_size = files.iter().map(|f| f.size).sum();
        let stats = BuildStats {
            total_files: files.len(),
            total_size: artifact_size,
            compressed_size: artifact_size,
            optimized_files: files.iter().filter(|f| f.optimized).count(),
            duration_ms: 0,
        };
        Self { files, stats }
    }

    /// Record the pre-optimization source size
    pub fn with_source_size(mut self, bytes: u64) -> Self {
        self.stats.total_size = bytes;
        self
    }
}

/// One execution attempt turning a source descriptor into an artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: BuildId,
    pub site_id: SiteId,
    pub user_id: UserId,
    pub source: SourceDescriptor,
    pub config: BuildConfig,
    pub status: BuildStatus,
    pub logs: Vec<BuildLogEntry>,
    pub output: Option<BuildOutput>,
    pub error: Option<String>,
    /// Job this one was retried from
    pub retry_of: Option<BuildId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BuildJob {
    pub fn new(
        site_id: SiteId,
        user_id: UserId,
        source: SourceDescriptor,
        config: BuildConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: BuildId::generate(),
            site_id,
            user_id,
            source,
            config,
            status: BuildStatus::Pending,
            logs: Vec::new(),
            output: None,
            error: None,
            retry_of: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
        }
    }

    /// A fresh pending job with the same source and config
    pub fn retried(&self) -> Self {
        let mut job = Self::new(
            self.site_id.clone(),
            self.user_id.clone(),
            self.source.clone(),
            self.config.clone(),
        );
        job.retry_of = Some(self.id.clone());
        job
    }
}
