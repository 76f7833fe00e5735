//! Builder for visual-editor documents

use async_trait::async_trait;
use serde_json::json;

use crate::builder::{escape_html, seo_meta_tags, BuildContext, Builder};
use crate::errors::{PipelineError, PipelineResult};
use crate::models::build::VisualDocument;
use crate::models::{BuildFile, BuildLogLevel, BuildOutput, SourceDescriptor, SourceKind};

/// Renders a visual-editor document to `index.html` plus `style.css`
#[derive(Debug, Default, Clone, Copy)]
pub struct VisualEditorBuilder;

#[async_trait]
impl Builder for VisualEditorBuilder {
    fn kind(&self) -> SourceKind {
        SourceKind::VisualEditor
    }

    async fn build(&self, ctx: &BuildContext) -> PipelineResult<BuildOutput> {
        let doc = match &ctx.source {
            SourceDescriptor::VisualEditor(doc) => doc,
            other => {
                return Err(PipelineError::validation(format!(
                    "visual-editor builder cannot build {} sources",
                    other.kind()
                )))
            }
        };
        if doc.title.trim().is_empty() {
            return Err(PipelineError::validation("document title is empty"));
        }

        ctx.log_with(
            BuildLogLevel::Info,
            "Building from visual editor data",
            json!({ "sections": doc.sections.len() }),
        )
        .await;

        ctx.checkpoint("render html")?;
        let html = render_html(doc, ctx);

        ctx.checkpoint("render css")?;
        let css = render_css(doc);

        Ok(BuildOutput::from_files(vec![
            BuildFile::new("index.html", html, "text/html"),
            BuildFile::new("style.css", css, "text/css"),
        ]))
    }
}

fn render_html(doc: &VisualDocument, ctx: &BuildContext) -> String {
    let title = ctx.config.seo.title.as_deref().unwrap_or(&doc.title);
    let language = doc.language.as_deref().unwrap_or("en");

    let mut sections = String::new();
    for section in &doc.sections {
        sections.push_str(&format!(
            "        <section>\n            <h2>{}</h2>\n            <p>{}</p>\n        </section>\n",
            escape_html(&section.heading),
            escape_html(&section.body)
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
{meta}    <link rel="stylesheet" href="style.css">
</head>
<body>
    <header>
        <h1>{heading}</h1>
    </header>
    <main>
{sections}    </main>
</body>
</html>
"#,
        lang = escape_html(language),
        title = escape_html(title),
        meta = seo_meta_tags(&ctx.config),
        heading = escape_html(&doc.title),
        sections = sections,
    )
}

fn render_css(doc: &VisualDocument) -> String {
    format!(
        r#"body {{
    font-family: {font};
    background: {background};
    margin: 0;
    padding: 0;
    line-height: 1.6;
}}

header {{
    background: {primary};
    color: white;
    padding: 1rem;
    text-align: center;
}}

main {{
    padding: 2rem;
    max-width: 1200px;
    margin: 0 auto;
}}
"#,
        font = doc.theme.font_family,
        background = doc.theme.background_color,
        primary = doc.theme.primary_color,
    )
}
