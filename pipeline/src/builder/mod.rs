//! Build execution
//!
//! A build runs one [`Builder`] strategy chosen by the job's source kind.
//! Strategies report progress through the [`BuildContext`], which appends
//! structured entries to the job and lets them observe cancellation between
//! stages.

pub mod code;
pub mod orchestrator;
pub mod template;
pub mod visual;

pub use code::RawCodeBuilder;
pub use orchestrator::{BuildOptions, BuildOrchestrator};
pub use template::TemplateBuilder;
pub use visual::VisualEditorBuilder;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{PipelineError, PipelineResult};
use crate::models::{
    BuildConfig, BuildId, BuildJob, BuildLogEntry, BuildLogLevel, BuildOutput, SiteId,
    SourceDescriptor, SourceKind,
};
use crate::store::PipelineStore;

/// A build strategy for one kind of source
#[async_trait]
pub trait Builder: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Turn the job's source into an artifact.
    ///
    /// Implementations call [`BuildContext::checkpoint`] between stages.
    async fn build(&self, ctx: &BuildContext) -> PipelineResult<BuildOutput>;
}

/// Everything a builder sees of the job it runs
pub struct BuildContext {
    pub job_id: BuildId,
    pub site_id: SiteId,
    pub source: SourceDescriptor,
    pub config: BuildConfig,
    store: Arc<dyn PipelineStore>,
    cancel: CancellationToken,
}

impl BuildContext {
    pub fn new(
        job_id: BuildId,
        site_id: SiteId,
        source: SourceDescriptor,
        config: BuildConfig,
        store: Arc<dyn PipelineStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            site_id,
            source,
            config,
            store,
            cancel,
        }
    }

    /// Fail with `Cancelled` if a cancel was requested for this job
    pub fn checkpoint(&self, stage: &str) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(format!(
                "build {} cancelled before {}",
                self.job_id, stage
            )));
        }
        Ok(())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn log(&self, level: BuildLogLevel, message: impl Into<String>) {
        self.append(BuildLogEntry::new(level, message)).await;
    }

    pub async fn log_with(
        &self,
        level: BuildLogLevel,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        self.append(BuildLogEntry::new(level, message).with_data(data))
            .await;
    }

    async fn append(&self, entry: BuildLogEntry) {
        if let Err(e) = append_log(self.store.as_ref(), &self.job_id, entry).await {
            warn!(build_id = %self.job_id, "Failed to append build log: {}", e);
        }
    }
}

/// Append an entry to a job's log and mirror it to tracing
pub(crate) async fn append_log(
    store: &dyn PipelineStore,
    job_id: &BuildId,
    entry: BuildLogEntry,
) -> PipelineResult<()> {
    match entry.level {
        BuildLogLevel::Debug => debug!(build_id = %job_id, "{}", entry.message),
        BuildLogLevel::Info => info!(build_id = %job_id, "{}", entry.message),
        BuildLogLevel::Warn => warn!(build_id = %job_id, "{}", entry.message),
        BuildLogLevel::Error => error!(build_id = %job_id, "{}", entry.message),
    }

    store
        .update_build(
            job_id,
            Box::new(move |job: &mut BuildJob| {
                job.logs.push(entry);
                Ok(())
            }),
        )
        .await?;
    Ok(())
}

/// The closed set of enabled builders, keyed by source kind
#[derive(Clone, Default)]
pub struct BuilderSet {
    builders: HashMap<SourceKind, Arc<dyn Builder>>,
}

impl BuilderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in strategies for the given kinds
    pub fn standard(enabled: &[SourceKind]) -> Self {
        let mut set = Self::new();
        for kind in enabled {
            let builder: Arc<dyn Builder> = match kind {
                SourceKind::VisualEditor => Arc::new(VisualEditorBuilder),
                SourceKind::RawCode => Arc::new(RawCodeBuilder),
                SourceKind::Template => Arc::new(TemplateBuilder::with_catalog()),
            };
            set = set.with(builder);
        }
        set
    }

    /// Register a builder, replacing any previous one of the same kind
    pub fn with(mut self, builder: Arc<dyn Builder>) -> Self {
        self.builders.insert(builder.kind(), builder);
        self
    }

    pub fn get(&self, kind: SourceKind) -> PipelineResult<Arc<dyn Builder>> {
        self.builders.get(&kind).cloned().ok_or_else(|| {
            PipelineError::validation(format!("unsupported source kind: {}", kind))
        })
    }

    pub fn supports(&self, kind: SourceKind) -> bool {
        self.builders.contains_key(&kind)
    }
}

/// Content type inferred from a file extension
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "webmanifest" => "application/manifest+json",
        _ => "application/octet-stream",
    }
}

/// Minimal markup escaping for text placed into generated HTML
pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `<meta>` tags for the SEO settings of a build
pub(crate) fn seo_meta_tags(config: &BuildConfig) -> String {
    let mut tags = String::new();
    if let Some(description) = &config.seo.description {
        tags.push_str(&format!(
            "    <meta name=\"description\" content=\"{}\">\n",
            escape_html(description)
        ));
    }
    if !config.seo.keywords.is_empty() {
        tags.push_str(&format!(
            "    <meta name=\"keywords\" content=\"{}\">\n",
            escape_html(&config.seo.keywords.join(", "))
        ));
    }
    tags
}
