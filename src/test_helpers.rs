//! Shared test utilities for the kiln test suite.
//!
//! Provides site fixtures, a scriptable [`TestRenderer`], and shortcuts for
//! building items of every kind.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let site = test_site(tmp.path());
//! let item = static_item("/a.md", Some("/a.html"), "<p>hi</p>");
//!
//! item.initialize(&site).await.unwrap();
//! item.prepare_content(&site).await.unwrap();
//! assert_eq!(item.html().unwrap(), Some("<p>hi</p>"));
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::config::SiteConfig;
use crate::content::{
    ContentError, ContentItem, Fragment, Identity, InputFile, ItemKind, MarkdownPage, Origin,
    RenderedBody, Renderer, TemplatePage,
};
use crate::layout::LayoutResolver;
use crate::path::ContentPath;
use crate::site::{Site, SitePaths};
use crate::template::Template;

// =========================================================================
// Paths and files
// =========================================================================

pub fn path(raw: &str) -> ContentPath {
    ContentPath::parse(raw).unwrap()
}

/// Write `content` to `rel` below `root`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let full = root.join(rel.trim_start_matches('/'));
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
}

// =========================================================================
// Sites
// =========================================================================

/// A site rooted at `root` with the default configuration and no layouts.
pub fn test_site(root: &Path) -> Arc<Site> {
    test_site_with_config(root, SiteConfig::default())
}

pub fn test_site_with_config(root: &Path, config: SiteConfig) -> Arc<Site> {
    let paths = SitePaths::new(root, &config);
    Arc::new(Site::new(paths, config, LayoutResolver::new()).unwrap())
}

/// A site whose layout resolver knows `layouts`. The layout files
/// themselves must already exist below `root`.
pub fn test_site_with_layouts(root: &Path, layouts: &[&str]) -> Arc<Site> {
    let config = SiteConfig::default();
    let paths = SitePaths::new(root, &config);
    let layouts: Vec<ContentPath> = layouts.iter().map(|raw| path(raw)).collect();
    let resolver = LayoutResolver::from_paths(&layouts).unwrap();
    Arc::new(Site::new(paths, config, resolver).unwrap())
}

// =========================================================================
// Renderer
// =========================================================================

/// A renderer that produces fixed HTML, or fails on request.
#[derive(Debug, Default)]
pub struct TestRenderer {
    output: Option<String>,
    html: String,
    initialize_error: Option<String>,
    generate_error: Option<String>,
    calls: Option<Arc<AtomicUsize>>,
}

impl TestRenderer {
    pub fn html(output: Option<&str>, html: &str) -> Self {
        Self {
            output: output.map(str::to_string),
            html: html.to_string(),
            ..Self::default()
        }
    }

    pub fn failing_initialize(message: &str) -> Self {
        Self {
            initialize_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_generate(output: Option<&str>, message: &str) -> Self {
        Self {
            generate_error: Some(message.to_string()),
            ..Self::html(output, "")
        }
    }

    /// Count calls to the initialize hook in `calls`.
    pub fn counting(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = Some(calls);
        self
    }
}

#[async_trait]
impl Renderer for TestRenderer {
    fn kind(&self) -> ItemKind {
        ItemKind::Custom
    }

    async fn initialize(&self, item: &ContentItem, _site: &Site) -> Result<Identity, ContentError> {
        if let Some(calls) = &self.calls {
            calls.fetch_add(1, Ordering::SeqCst);
        }
        // Give concurrent callers a chance to pile up on the stage.
        tokio::task::yield_now().await;
        if let Some(message) = &self.initialize_error {
            return Err(ContentError::Render {
                path: item.content_path().to_string(),
                message: message.clone(),
            });
        }
        Ok(Identity {
            output_path: self.output.as_deref().map(path),
            front_matter: None,
        })
    }

    async fn generate(&self, item: &ContentItem, _site: &Site) -> Result<RenderedBody, ContentError> {
        tokio::task::yield_now().await;
        if let Some(message) = &self.generate_error {
            return Err(ContentError::Render {
                path: item.content_path().to_string(),
                message: message.clone(),
            });
        }
        Ok(RenderedBody::Html(Fragment::new(self.html.clone())))
    }
}

// =========================================================================
// Items
// =========================================================================

/// An input item at `content_path` (below a nonexistent root) driven by
/// `renderer`.
pub fn item_with(content_path: &str, renderer: impl Renderer + 'static) -> ContentItem {
    ContentItem::new(
        Origin::Input(InputFile::new(Path::new("/nonexistent"), path(content_path))),
        renderer,
    )
}

/// An item that renders `html` to `output`.
pub fn static_item(content_path: &str, output: Option<&str>, html: &str) -> ContentItem {
    item_with(content_path, TestRenderer::html(output, html))
}

pub fn static_item_at(origin: Origin, output: Option<&str>, html: &str) -> ContentItem {
    ContentItem::new(origin, TestRenderer::html(output, html))
}

/// Write `source` to `content_path` below `root` and build the template
/// page for it.
pub fn template_item(root: &Path, content_path: &str, source: &str) -> ContentItem {
    write_file(root, content_path, source);
    let template = Arc::new(Template::compile(source).unwrap());
    let page = TemplatePage::new(&path(content_path), template).unwrap();
    ContentItem::new(Origin::Input(InputFile::new(root, path(content_path))), page)
}

/// A markdown page for an existing file below `root`.
pub fn markdown_item(root: &Path, content_path: &str) -> ContentItem {
    ContentItem::new(
        Origin::Input(InputFile::new(root, path(content_path))),
        MarkdownPage::default(),
    )
}
