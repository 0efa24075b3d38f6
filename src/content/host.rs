use super::{ItemKind, markdown};
use crate::frontmatter;
use crate::path::ContentPath;
use crate::site::Site;
use crate::template::{RenderHost, Scope, TemplateError, render};
use serde_json::Value;

/// Site access shared by every template host: includes and blurbs,
/// resolved against the directory of the template being rendered.
pub struct SiteServices<'a> {
    site: &'a Site,
    base: ContentPath,
}

impl<'a> SiteServices<'a> {
    pub fn new(site: &'a Site, base: ContentPath) -> Self {
        Self { site, base }
    }

    /// Render an included file. Partials see the includer's scope and host,
    /// so `{% body %}` inside a partial included by a layout works.
    pub async fn include(
        &self,
        host: &dyn RenderHost,
        reference: &str,
        scope: &Scope,
    ) -> Result<String, TemplateError> {
        let fail = |message: String| TemplateError::Include {
            path: reference.to_string(),
            message,
        };
        let path = self.base.join(reference).map_err(|e| fail(e.to_string()))?;
        match path.extension() {
            Some("tpl") => {
                let template = self.site.templates().fetch(&path).await?;
                let mut child = scope.descend()?;
                let rendered = render(&template, &mut child, host)
                    .await
                    .map_err(|e| e.at(path.as_str()))?;
                Ok(rendered.html)
            }
            Some("md") => {
                let full = path.to_fs_path(&self.site.paths().input_root);
                let source = tokio::fs::read_to_string(&full)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                let (_, body) = frontmatter::extract(&source).map_err(|e| fail(e.to_string()))?;
                Ok(markdown::to_html(body, self.site.config().markdown.options()))
            }
            _ => Err(fail("only .tpl and .md files can be included".into())),
        }
    }

    /// Blurb of a markdown page, given its path or its page object.
    pub async fn blurb(&self, target: &Value) -> Result<Option<String>, TemplateError> {
        let reference = match target {
            Value::String(s) => s.as_str(),
            Value::Object(page) => page.get("path").and_then(Value::as_str).unwrap_or_default(),
            _ => "",
        };
        let fail = |message: String| TemplateError::Blurb {
            path: reference.to_string(),
            message,
        };
        if reference.is_empty() {
            return Err(fail("expected a page path or a page".into()));
        }
        let path = self.base.join(reference).map_err(|e| fail(e.to_string()))?;
        let item = self
            .site
            .graph()
            .find_by_source(&path)
            .ok_or_else(|| fail("no such page".into()))?;
        if item.kind() != ItemKind::Markdown {
            return Err(fail("only markdown pages have blurbs".into()));
        }
        item.blurb(self.site).await.map_err(|e| fail(e.to_string()))
    }
}
