//! Builder for hand-written code bundles

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;

use crate::blob::validate_path;
use crate::builder::{content_type_for, BuildContext, Builder};
use crate::errors::{PipelineError, PipelineResult};
use crate::models::build::BuildOptimization;
use crate::models::{BuildFile, BuildLogLevel, BuildOutput, SourceDescriptor, SourceKind};

/// Validates an uploaded bundle and optionally minifies it
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodeBuilder;

#[async_trait]
impl Builder for RawCodeBuilder {
    fn kind(&self) -> SourceKind {
        SourceKind::RawCode
    }

    async fn build(&self, ctx: &BuildContext) -> PipelineResult<BuildOutput> {
        let bundle = match &ctx.source {
            SourceDescriptor::RawCode(bundle) => bundle,
            other => {
                return Err(PipelineError::validation(format!(
                    "raw-code builder cannot build {} sources",
                    other.kind()
                )))
            }
        };
        if bundle.files.is_empty() {
            return Err(PipelineError::validation("code bundle has no files"));
        }

        ctx.log_with(
            BuildLogLevel::Info,
            "Building from code",
            json!({ "files": bundle.files.len() }),
        )
        .await;

        ctx.checkpoint("validate")?;
        let mut seen = HashSet::new();
        for file in &bundle.files {
            let path = normalize(&file.path);
            validate_path(path)?;
            if !seen.insert(path) {
                return Err(PipelineError::validation(format!("duplicate path: {}", path)));
            }
        }
        let entry = bundle.entry.as_deref().map(normalize).unwrap_or("index.html");
        if !seen.contains(entry) {
            return Err(PipelineError::validation(format!(
                "entry document {} is missing from the bundle",
                entry
            )));
        }

        let optimization = &ctx.config.optimization;
        let mut source_size = 0u64;
        let mut files = Vec::with_capacity(bundle.files.len());
        for file in &bundle.files {
            ctx.checkpoint("optimize")?;
            let path = normalize(&file.path);
            let content_type = content_type_for(path);
            source_size += file.content.len() as u64;

            let built = BuildFile::new(path, file.content.clone(), content_type);
            let built = match minify(content_type, &file.content, optimization) {
                Some(min) => built.optimized(min),
                None => built,
            };
            files.push(built);
        }

        let output = BuildOutput::from_files(files).with_source_size(source_size);
        if output.stats.optimized_files > 0 {
            ctx.log_with(
                BuildLogLevel::Debug,
                "Minified assets",
                json!({
                    "optimized_files": output.stats.optimized_files,
                    "saved_bytes": source_size.saturating_sub(output.stats.compressed_size),
                }),
            )
            .await;
        }
        Ok(output)
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn minify(content_type: &str, content: &str, optimization: &BuildOptimization) -> Option<String> {
    match content_type {
        "text/html" if optimization.minify_html => Some(collapse_lines(content)),
        "text/css" if optimization.minify_css => Some(minify_css(content)),
        "application/javascript" if optimization.minify_js => Some(collapse_lines(content)),
        _ => None,
    }
}

/// Trim every line and drop the blank ones
fn collapse_lines(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip comments and insignificant whitespace from a stylesheet
fn minify_css(content: &str) -> String {
    let mut without_comments = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("/*") {
        without_comments.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
            }
        }
    }
    without_comments.push_str(rest);

    let mut out = String::with_capacity(without_comments.len());
    let mut pending_space = false;
    for c in without_comments.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() && !matches!(c, '{' | '}' | ':' | ';' | ',' | '>') {
            let last = out.chars().last().unwrap_or(' ');
            if !matches!(last, '{' | '}' | ':' | ';' | ',' | '>') {
                out.push(' ');
            }
        }
        pending_space = false;
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build::{CodeBundle, SourceFile};
    use crate::models::{BuildConfig, BuildId, SiteId};
    use crate::store::MemoryStore;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context(files: &[(&str, &str)], config: BuildConfig) -> BuildContext {
        BuildContext::new(
            BuildId::new("build_test"),
            SiteId::new("site_test"),
            SourceDescriptor::RawCode(CodeBundle {
                files: files
                    .iter()
                    .map(|(path, content)| SourceFile {
                        path: path.to_string(),
                        content: content.to_string(),
                    })
                    .collect(),
                entry: None,
            }),
            config,
            Arc::new(MemoryStore::new()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_minify_css() {
        let css = "/* header */\nbody {\n  margin: 0;\n  color: red;\n}\n\na > b { x: 1 }";
        assert_eq!(minify_css(css), "body{margin:0;color:red;}a>b{x:1}");
    }

    #[tokio::test]
    async fn test_bundle_is_validated() {
        let err = RawCodeBuilder
            .build(&context(&[("../x.html", "")], BuildConfig::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let err = RawCodeBuilder
            .build(&context(&[("about.html", "")], BuildConfig::default()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("entry document"));

        let err = RawCodeBuilder
            .build(&context(
                &[("/index.html", "a"), ("index.html", "b")],
                BuildConfig::default(),
            ))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[tokio::test]
    async fn test_minification_updates_stats() {
        let mut config = BuildConfig::default();
        config.optimization.minify_css = true;

        let output = RawCodeBuilder
            .build(&context(
                &[
                    ("/index.html", "<html></html>"),
                    ("css/site.css", "body {\n    margin: 0;\n}\n"),
                ],
                config,
            ))
            .await
            .unwrap();

        assert_eq!(output.files[0].path, "index.html");
        assert!(!output.files[0].optimized);
        assert_eq!(output.files[1].content, "body{margin:0;}");
        assert_eq!(output.files[1].content_type, "text/css");
        assert_eq!(output.stats.optimized_files, 1);
        assert!(output.stats.compressed_size < output.stats.total_size);
    }
}
