//! Content items and their renderers.
//!
//! Every unit of output is a [`ContentItem`]: an [`Origin`] saying where it
//! comes from, a [`Renderer`] deciding what it produces, and a three-stage
//! lifecycle driven by the graph and the reconciler:
//!
//! ```text
//! initialize ─▶ prepare ─▶ write (repeatable)
//!   output path,  body +     serialize the
//!   front matter  layouts    prepared state
//! ```
//!
//! | Renderer | Source | Output |
//! |----------|--------|--------|
//! | [`MarkdownPage`] | `*.md` | `.html` or permalink, wrapped in layouts |
//! | [`TemplatePage`] | `*.tpl` | `.html` or permalink; enumerators fan out into instances |
//! | [`Asset`] | anything else | same path, copied |
//! | [`Alias`] | `*.alias` | path without `.alias`, another item's content |

mod alias;
mod asset;
pub mod enumerate;
mod host;
mod item;
pub mod markdown;
mod origin;
mod page;
mod renderer;

pub use alias::Alias;
pub use asset::Asset;
pub use host::SiteServices;
pub use item::{ContentError, ContentItem, ItemFailures, Lifecycle, Stage};
pub use markdown::MarkdownPage;
pub use origin::{EnumeratedOrigin, GeneratorOrigin, InputFile, Origin, OriginError};
pub use page::TemplatePage;
pub use renderer::{Fragment, Identity, ItemKind, Prepared, RenderedBody, Renderer};

use crate::scan::{SourceFile, SourceKind};
use crate::site::Site;
use crate::template::Scope;
use serde_json::{Value, json};

/// The `page` object templates see for an item: `{path, url, title, meta}`.
pub fn page_value(item: &ContentItem) -> Value {
    let meta = item
        .front_matter()
        .ok()
        .flatten()
        .map(|front_matter| Value::Object(front_matter.fields().clone()))
        .unwrap_or_else(|| json!({}));
    json!({
        "path": item.content_path().as_str(),
        "url": item.output_path().map(|path| path.to_string()),
        "title": item.title(),
        "meta": meta,
    })
}

/// Scope for rendering anything on behalf of `item`: `page`, `site`, and
/// for enumerated items `item` and `parent`.
pub fn template_scope(site: &Site, item: &ContentItem) -> Scope {
    let mut scope = Scope::new()
        .with("page", page_value(item))
        .with("site", site.site_value());
    if let Origin::Enumerated(origin) = item.origin() {
        scope.insert("item", origin.payload().clone());
        scope.insert("parent", origin.parent_payload());
    }
    scope
}

/// The item for a scanned file, or `None` for files that are not content
/// (layouts, partials, site configuration).
pub fn from_source(site: &Site, source: &SourceFile) -> Result<Option<ContentItem>, ContentError> {
    let origin = Origin::Input(InputFile::new(
        &site.paths().input_root,
        source.content_path.clone(),
    ));
    let item = match source.kind {
        SourceKind::Markdown => ContentItem::new(origin, MarkdownPage::default()),
        SourceKind::Template => {
            let template = site.templates().get(&source.content_path)?;
            ContentItem::new(origin, TemplatePage::new(&source.content_path, template)?)
        }
        SourceKind::Alias => ContentItem::new(origin, Alias::default()),
        SourceKind::Asset => ContentItem::new(origin, Asset),
        SourceKind::SiteConfig | SourceKind::Layout | SourceKind::Partial => return Ok(None),
    };
    Ok(Some(item))
}
