use super::{ContentError, ContentItem, Identity, ItemKind, RenderedBody, Renderer};
use crate::site::Site;
use async_trait::async_trait;

/// Any other file, copied to the same path.
#[derive(Debug, Default)]
pub struct Asset;

#[async_trait]
impl Renderer for Asset {
    fn kind(&self) -> ItemKind {
        ItemKind::Asset
    }

    async fn initialize(&self, item: &ContentItem, _site: &Site) -> Result<Identity, ContentError> {
        Ok(Identity {
            output_path: Some(item.content_path().clone()),
            front_matter: None,
        })
    }

    async fn generate(&self, item: &ContentItem, _site: &Site) -> Result<RenderedBody, ContentError> {
        Ok(RenderedBody::Passthrough(
            item.origin().input_file().full_path().to_path_buf(),
        ))
    }
}
