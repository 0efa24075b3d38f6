use super::{ContentError, ContentItem, Identity, ItemKind, RenderedBody, Renderer};
use crate::frontmatter::{self, Format, FrontMatter};
use crate::path::ContentPath;
use crate::site::Site;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::OnceLock;

/// A second output path for another item's content.
///
/// `old/page.html.alias` containing `source: /new/page.html` writes
/// whatever `/new/page.html` writes to `/old/page.html`. The YAML may be
/// bare or fenced like front matter. Relative sources resolve against the
/// alias file's directory.
#[derive(Debug, Default)]
pub struct Alias {
    target: OnceLock<ContentPath>,
}

#[async_trait]
impl Renderer for Alias {
    fn kind(&self) -> ItemKind {
        ItemKind::Alias
    }

    async fn initialize(&self, item: &ContentItem, _site: &Site) -> Result<Identity, ContentError> {
        let input = item.origin().input_file();
        let path = input.content_path();
        let text = tokio::fs::read_to_string(input.full_path())
            .await
            .map_err(|source| ContentError::Io {
                path: path.to_string(),
                source,
            })?;
        let front_matter_error = |source| ContentError::FrontMatter {
            path: path.to_string(),
            source,
        };
        let fields = match frontmatter::extract(&text).map_err(front_matter_error)? {
            (Some(fields), _) => fields,
            (None, body) => frontmatter::parse(Format::Yaml, body).map_err(front_matter_error)?,
        };
        let Some(source) = fields.get("source").and_then(Value::as_str) else {
            return Err(ContentError::Render {
                path: path.to_string(),
                message: "an alias needs a `source` output path".into(),
            });
        };
        let dir = path.parent().unwrap_or_else(ContentPath::root);
        let _ = self.target.set(dir.join(source.trim())?);

        Ok(Identity {
            output_path: Some(path.with_extension(None)),
            front_matter: Some(FrontMatter::new(fields)),
        })
    }

    async fn generate(&self, item: &ContentItem, site: &Site) -> Result<RenderedBody, ContentError> {
        let origin = item.origin().to_string();
        let target_path = self.target.get().ok_or_else(|| ContentError::InvalidState {
            origin: origin.clone(),
            message: "alias target was not resolved".into(),
        })?;
        let target = site
            .graph()
            .find_by_output(target_path)
            .ok_or_else(|| ContentError::Render {
                path: origin.clone(),
                message: format!("no item produces '{target_path}'"),
            })?;
        if target.kind() == ItemKind::Alias {
            return Err(ContentError::Render {
                path: origin,
                message: format!("'{target_path}' is itself an alias"),
            });
        }
        target.prepare_content(site).await?;
        Ok(RenderedBody::Delegate(target))
    }
}
