use super::{ContentError, ContentItem};
use crate::frontmatter::FrontMatter;
use crate::path::ContentPath;
use crate::site::Site;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Which renderer backs an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Markdown,
    Template,
    Asset,
    Alias,
    /// Renderers supplied from outside the crate (and tests).
    Custom,
}

/// What a renderer decides about an item while it initializes.
#[derive(Debug, Default)]
pub struct Identity {
    pub output_path: Option<ContentPath>,
    pub front_matter: Option<FrontMatter>,
}

/// An HTML body before layouts are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub html: String,
    /// Title shown by `{% title %}` in every layout around this body.
    pub title: Option<String>,
    /// Sections the body declared with `{% define %}`.
    pub sections: BTreeMap<String, String>,
}

impl Fragment {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Self::default()
        }
    }
}

/// Content a renderer generated for an item.
#[derive(Debug)]
pub enum RenderedBody {
    Html(Fragment),
    Bytes(Vec<u8>),
    /// Copy this file verbatim.
    Passthrough(PathBuf),
    /// Write whatever another (prepared) item writes.
    Delegate(Arc<ContentItem>),
}

/// A prepared item: its generated body plus the body wrapped in layouts,
/// when any apply.
#[derive(Debug)]
pub struct Prepared {
    body: Arc<RenderedBody>,
    laid_out: Option<String>,
}

impl Prepared {
    pub fn new(body: Arc<RenderedBody>, laid_out: Option<String>) -> Self {
        Self { body, laid_out }
    }

    pub fn body(&self) -> &RenderedBody {
        &self.body
    }

    /// Final HTML for HTML items.
    pub fn html(&self) -> Option<&str> {
        match (&self.laid_out, self.body.as_ref()) {
            (Some(html), _) => Some(html),
            (None, RenderedBody::Html(fragment)) => Some(&fragment.html),
            _ => None,
        }
    }

    /// Serialize to `out`. Pure projection of the prepared state, so it may
    /// run any number of times.
    pub fn write_to(&self, out: &mut dyn Write, output_path: &str) -> Result<(), ContentError> {
        let io_error = |source: io::Error| ContentError::Io {
            path: output_path.to_string(),
            source,
        };
        match self.body.as_ref() {
            RenderedBody::Html(fragment) => {
                let html = self.laid_out.as_deref().unwrap_or(&fragment.html);
                out.write_all(html.as_bytes()).map_err(io_error)
            }
            RenderedBody::Bytes(bytes) => out.write_all(bytes).map_err(io_error),
            RenderedBody::Passthrough(source) => {
                let mut file = File::open(source).map_err(|e| ContentError::Io {
                    path: source.display().to_string(),
                    source: e,
                })?;
                io::copy(&mut file, out).map(|_| ()).map_err(io_error)
            }
            RenderedBody::Delegate(target) => target.write_content(out, output_path),
        }
    }
}

/// The hooks behind a [`ContentItem`].
///
/// The item drives its lifecycle and calls these at most once per stage;
/// renderers only decide *what* an item is and produces. Anything decided
/// during [`initialize`](Renderer::initialize) that later hooks need
/// (title, layout opt-out) is the renderer's to remember.
#[async_trait]
pub trait Renderer: Send + Sync + fmt::Debug {
    fn kind(&self) -> ItemKind;

    /// Whether this item produces further items when the graph expands.
    fn enumerates(&self) -> bool {
        false
    }

    /// Decide output path and front matter.
    async fn initialize(&self, item: &ContentItem, site: &Site) -> Result<Identity, ContentError>;

    /// Produce the body. Runs once, after a successful initialize.
    async fn generate(&self, item: &ContentItem, site: &Site) -> Result<RenderedBody, ContentError>;

    fn title(&self) -> Option<String> {
        None
    }

    /// HTML bodies of renderers that return true are wrapped in layouts.
    fn wants_layout(&self) -> bool {
        false
    }

    fn serialize(
        &self,
        prepared: &Prepared,
        out: &mut dyn Write,
        output_path: &str,
    ) -> Result<(), ContentError> {
        prepared.write_to(out, output_path)
    }

    /// Payloads of the instances this item enumerates into.
    fn enumerate(
        &self,
        _item: &ContentItem,
        _site: &Site,
    ) -> Result<Box<dyn Iterator<Item = Value> + Send>, ContentError> {
        Ok(Box::new(std::iter::empty()))
    }

    /// Build the item for one enumerated payload.
    fn instantiate(
        &self,
        parent: &Arc<ContentItem>,
        _payload: Value,
    ) -> Result<ContentItem, ContentError> {
        Err(ContentError::InvalidState {
            origin: parent.origin().to_string(),
            message: "item does not enumerate".into(),
        })
    }
}
