//! Builder for catalog templates

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::json;

use crate::builder::{content_type_for, escape_html, BuildContext, Builder};
use crate::errors::{PipelineError, PipelineResult};
use crate::models::{BuildFile, BuildLogLevel, BuildOutput, SourceDescriptor, SourceKind};

/// A template in the catalog
#[derive(Debug, Clone)]
pub struct SiteTemplate {
    pub id: String,
    pub name: String,
    /// Relative path to file body with `{{variable}}` placeholders
    pub files: Vec<(String, String)>,
    /// Values used when the selection leaves a variable out
    pub defaults: BTreeMap<String, String>,
}

/// Renders a template from its catalog with variable substitution
#[derive(Debug, Clone, Default)]
pub struct TemplateBuilder {
    catalog: HashMap<String, SiteTemplate>,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder loaded with the built-in catalog
    pub fn with_catalog() -> Self {
        builtin_catalog()
            .into_iter()
            .fold(Self::new(), |builder, template| builder.with_template(template))
    }

    pub fn with_template(mut self, template: SiteTemplate) -> Self {
        self.catalog.insert(template.id.clone(), template);
        self
    }

    pub fn template_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.catalog.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl Builder for TemplateBuilder {
    fn kind(&self) -> SourceKind {
        SourceKind::Template
    }

    async fn build(&self, ctx: &BuildContext) -> PipelineResult<BuildOutput> {
        let selection = match &ctx.source {
            SourceDescriptor::Template(selection) => selection,
            other => {
                return Err(PipelineError::validation(format!(
                    "template builder cannot build {} sources",
                    other.kind()
                )))
            }
        };
        let template = self.catalog.get(&selection.template_id).ok_or_else(|| {
            PipelineError::validation(format!("unknown template: {}", selection.template_id))
        })?;

        ctx.log_with(
            BuildLogLevel::Info,
            "Building from template",
            json!({ "template_id": template.id, "name": template.name }),
        )
        .await;

        let mut variables = template.defaults.clone();
        if let Some(title) = &ctx.config.seo.title {
            variables.insert("title".to_string(), title.clone());
        }
        if let Some(description) = &ctx.config.seo.description {
            variables.insert("description".to_string(), description.clone());
        }
        variables.extend(selection.variables.clone());

        let mut files = Vec::with_capacity(template.files.len());
        for (path, body) in &template.files {
            ctx.checkpoint(&format!("render {}", path))?;
            let content_type = content_type_for(path);
            let escape = content_type == "text/html";
            let content = render(body, &variables, escape).map_err(|missing| {
                PipelineError::validation(format!(
                    "template {} needs variable '{}' in {}",
                    template.id, missing, path
                ))
            })?;
            files.push(BuildFile::new(path.clone(), content, content_type));
        }

        Ok(BuildOutput::from_files(files))
    }
}

/// Substitute `{{name}}` placeholders; returns the first missing name on error
pub fn render(
    body: &str,
    variables: &BTreeMap<String, String>,
    escape: bool,
) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated placeholder is literal text
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let name = after[..end].trim();
        let value = variables.get(name).ok_or_else(|| name.to_string())?;
        if escape {
            out.push_str(&escape_html(value));
        } else {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn defaults(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="{{language}}">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <meta name="description" content="{{description}}">
    <title>{{title}}</title>
    <link rel="stylesheet" href="style.css">
</head>
"#;

fn builtin_catalog() -> Vec<SiteTemplate> {
    let blank = SiteTemplate {
        id: "blank".to_string(),
        name: "Blank page".to_string(),
        files: vec![(
            "index.html".to_string(),
            format!(
                "{}<body>\n    <h1>{{{{title}}}}</h1>\n</body>\n</html>\n",
                PAGE_HEAD
            ),
        ), (
            "style.css".to_string(),
            "body {\n    font-family: Arial, sans-serif;\n    margin: 2rem;\n}\n".to_string(),
        )],
        defaults: defaults(&[("language", "en"), ("description", ""), ("title", "My site")]),
    };

    let landing = SiteTemplate {
        id: "landing".to_string(),
        name: "Landing page".to_string(),
        files: vec![(
            "index.html".to_string(),
            format!(
                concat!(
                    "{}<body>\n",
                    "    <header><h1>{{{{title}}}}</h1><p>{{{{tagline}}}}</p></header>\n",
                    "    <main><a class=\"cta\" href=\"{{{{cta_url}}}}\">{{{{cta_label}}}}</a></main>\n",
                    "    <footer><p>{{{{footer}}}}</p></footer>\n",
                    "</body>\n</html>\n"
                ),
                PAGE_HEAD
            ),
        ), (
            "style.css".to_string(),
            concat!(
                "header {\n    background: {{primary_color}};\n    color: white;\n    padding: 3rem;\n}\n",
                ".cta {\n    display: inline-block;\n    padding: 1rem 2rem;\n    background: {{primary_color}};\n    color: white;\n}\n"
            )
            .to_string(),
        )],
        defaults: defaults(&[
            ("language", "en"),
            ("description", ""),
            ("tagline", ""),
            ("cta_label", "Get started"),
            ("cta_url", "#"),
            ("footer", ""),
            ("primary_color", "#333333"),
        ]),
    };

    let portfolio = SiteTemplate {
        id: "portfolio".to_string(),
        name: "Portfolio".to_string(),
        files: vec![(
            "index.html".to_string(),
            format!(
                concat!(
                    "{}<body>\n",
                    "    <header><h1>{{{{title}}}}</h1><p>{{{{owner}}}}</p></header>\n",
                    "    <main><section id=\"about\"><p>{{{{about}}}}</p></section></main>\n",
                    "    <footer><a href=\"mailto:{{{{email}}}}\">{{{{email}}}}</a></footer>\n",
                    "</body>\n</html>\n"
                ),
                PAGE_HEAD
            ),
        ), (
            "style.css".to_string(),
            "body {\n    font-family: Georgia, serif;\n    max-width: 800px;\n    margin: 0 auto;\n}\n"
                .to_string(),
        )],
        defaults: defaults(&[("language", "en"), ("description", ""), ("about", "")]),
    };

    vec![blank, landing, portfolio]
}
