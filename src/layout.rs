//! Layout resolution and composition.
//!
//! A layout is a template that wraps page bodies. Layout files live next to
//! the content they wrap and apply to everything in their directory and
//! below:
//!
//! ```text
//! /_layout.tpl                      default for the whole site
//! /posts/_layout.tpl                default for /posts/**
//! /posts/_layout{drafts%2F**}.tpl   only for /posts/drafts/**
//! ```
//!
//! The part between the braces is a glob, percent-encoded so it survives as
//! a file name, matched against the item's path relative to the layout's
//! directory.
//!
//! ## Resolution
//!
//! For an item at `/posts/drafts/x.md` every ancestor directory is asked
//! for a layout, nearest first. Each directory offers at most one: the
//! patterned layout whose glob matches the relative path (`drafts/x.md` for
//! `/posts`, `posts/drafts/x.md` for `/`), otherwise its default. Two
//! matching patterned layouts in one directory are a configuration error.
//!
//! ## Composition
//!
//! The body is rendered first, then each layout in the chain from innermost
//! outwards, every layer seeing the result of the previous one as
//! `{% body %}`. `{% section %}` searches the layers already applied,
//! nearest first, and finally the page body itself. `{% title %}` always
//! shows the page's title.

use crate::content::{self, ContentError, ContentItem, Fragment, SiteServices};
use crate::glob::PathGlob;
use crate::path::ContentPath;
use crate::site::Site;
use crate::template::{RenderHost, Scope, Template, TemplateError, render};
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Extension of layout (and every other template) file.
pub const LAYOUT_EXTENSION: &str = "tpl";

const LAYOUT_STEM: &str = "_layout";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("invalid layout pattern in {file}: {message}")]
    Pattern { file: String, message: String },
    #[error("ambiguous layouts in {dir} for {path}: both {first} and {second} match")]
    Ambiguous {
        dir: String,
        path: String,
        first: String,
        second: String,
    },
}

/// What a file name says about being a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutName {
    Default,
    /// Decoded glob from `_layout{...}.tpl`.
    Patterned(String),
}

/// Parse a file name as a layout name. `None` for anything else,
/// including near misses like `_layouts.tpl`.
pub fn parse_layout_name(name: &str) -> Option<Result<LayoutName, LayoutError>> {
    let rest = name.strip_prefix(LAYOUT_STEM)?;
    let rest = rest.strip_suffix(LAYOUT_EXTENSION)?.strip_suffix('.')?;
    if rest.is_empty() {
        return Some(Ok(LayoutName::Default));
    }
    let encoded = rest.strip_prefix('{')?.strip_suffix('}')?;
    let decoded = percent_decode_str(encoded)
        .decode_utf8()
        .map(|pattern| pattern.into_owned())
        .map_err(|e| LayoutError::Pattern {
            file: name.to_string(),
            message: e.to_string(),
        });
    Some(decoded.and_then(|pattern| {
        if pattern.is_empty() {
            Err(LayoutError::Pattern {
                file: name.to_string(),
                message: "empty pattern".into(),
            })
        } else {
            Ok(LayoutName::Patterned(pattern))
        }
    }))
}

pub fn is_layout_name(name: &str) -> bool {
    parse_layout_name(name).is_some()
}

#[derive(Debug, Default)]
struct DirectoryLayouts {
    default: Option<ContentPath>,
    /// In file-name order.
    patterned: Vec<(PathGlob, ContentPath)>,
}

/// Maps content paths to the chain of layouts that wrap them.
#[derive(Debug, Default)]
pub struct LayoutResolver {
    dirs: BTreeMap<ContentPath, DirectoryLayouts>,
}

impl LayoutResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every layout among `paths`; other paths are ignored.
    pub fn from_paths<'a, I>(paths: I) -> Result<Self, LayoutError>
    where
        I: IntoIterator<Item = &'a ContentPath>,
    {
        let mut resolver = Self::new();
        let mut paths: Vec<&ContentPath> = paths.into_iter().collect();
        paths.sort();
        for path in paths {
            resolver.add(path)?;
        }
        Ok(resolver)
    }

    /// Register one layout file. Returns false when the path is not a
    /// layout.
    pub fn add(&mut self, path: &ContentPath) -> Result<bool, LayoutError> {
        let Some(name) = parse_layout_name(path.file_name()) else {
            return Ok(false);
        };
        let Some(dir) = path.parent() else {
            return Ok(false);
        };
        let entry = self.dirs.entry(dir).or_default();
        match name? {
            LayoutName::Default => entry.default = Some(path.clone()),
            LayoutName::Patterned(pattern) => {
                let glob = PathGlob::relative([&pattern]).map_err(|e| LayoutError::Pattern {
                    file: path.to_string(),
                    message: e.to_string(),
                })?;
                entry.patterned.push((glob, path.clone()));
            }
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.dirs
            .values()
            .map(|d| d.patterned.len() + usize::from(d.default.is_some()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The layout `dir` offers for an item at `relative` below it.
    pub fn layout_in(
        &self,
        dir: &ContentPath,
        relative: &str,
    ) -> Result<Option<&ContentPath>, LayoutError> {
        let Some(layouts) = self.dirs.get(dir) else {
            return Ok(None);
        };
        let mut matching = layouts
            .patterned
            .iter()
            .filter(|(glob, _)| glob.is_match(relative))
            .map(|(_, path)| path);
        match (matching.next(), matching.next()) {
            (Some(first), Some(second)) => Err(LayoutError::Ambiguous {
                dir: dir.to_string(),
                path: relative.to_string(),
                first: first.to_string(),
                second: second.to_string(),
            }),
            (Some(only), None) => Ok(Some(only)),
            _ => Ok(layouts.default.as_ref()),
        }
    }

    /// Layouts wrapping `path`, innermost first.
    pub fn chain(&self, path: &ContentPath) -> Result<Vec<ContentPath>, LayoutError> {
        let mut chain = Vec::new();
        for dir in path.ancestors() {
            let Some(relative) = path.strip_dir(&dir) else {
                continue;
            };
            if let Some(layout) = self.layout_in(&dir, relative)? {
                chain.push(layout.clone());
            }
        }
        Ok(chain)
    }
}

/// A body on its way out through its layouts.
struct Composition<'a> {
    body: &'a Fragment,
    html: String,
    /// Sections defined by each applied layout, innermost first.
    layers: Vec<BTreeMap<String, String>>,
}

impl<'a> Composition<'a> {
    fn new(body: &'a Fragment) -> Self {
        Self {
            body,
            html: body.html.clone(),
            layers: Vec::new(),
        }
    }

    fn section(&self, name: &str) -> Option<&str> {
        self.layers
            .iter()
            .rev()
            .chain(std::iter::once(&self.body.sections))
            .find_map(|sections| sections.get(name))
            .map(String::as_str)
    }

    async fn wrap(
        &mut self,
        layout: &Template,
        scope: &mut Scope,
        services: &SiteServices<'_>,
    ) -> Result<(), TemplateError> {
        let rendered = {
            let host = LayerHost {
                composition: self,
                services,
            };
            render(layout, scope, &host).await?
        };
        self.html = rendered.html;
        self.layers.push(rendered.sections);
        Ok(())
    }
}

struct LayerHost<'a> {
    composition: &'a Composition<'a>,
    services: &'a SiteServices<'a>,
}

#[async_trait]
impl RenderHost for LayerHost<'_> {
    fn body(&self) -> Result<&str, TemplateError> {
        Ok(&self.composition.html)
    }

    fn section(&self, name: &str) -> Result<Option<&str>, TemplateError> {
        Ok(self.composition.section(name))
    }

    fn title(&self) -> Option<&str> {
        self.composition.body.title.as_deref()
    }

    async fn include(&self, path: &str, scope: &Scope) -> Result<String, TemplateError> {
        self.services.include(self, path, scope).await
    }

    async fn blurb(&self, target: &Value) -> Result<Option<String>, TemplateError> {
        self.services.blurb(target).await
    }
}

/// Wrap `body` in every layout that applies to `item`. `None` when no
/// layout applies.
pub async fn apply(
    site: &Site,
    item: &ContentItem,
    body: &Fragment,
) -> Result<Option<String>, ContentError> {
    let chain = site.layouts().chain(item.content_path())?;
    if chain.is_empty() {
        return Ok(None);
    }
    let mut composition = Composition::new(body);
    for layout_path in &chain {
        let layout = site.templates().fetch(layout_path).await?;
        let dir = layout_path.parent().unwrap_or_else(ContentPath::root);
        let services = SiteServices::new(site, dir);
        let mut scope = content::template_scope(site, item);
        composition
            .wrap(&layout, &mut scope, &services)
            .await
            .map_err(|e| e.at(layout_path.as_str()))?;
    }
    debug!(item = %item.origin(), layouts = chain.len(), "layouts applied");
    Ok(Some(composition.html))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{path, static_item, test_site};
    use std::fs;
    use tempfile::TempDir;

    fn resolver(paths: &[&str]) -> LayoutResolver {
        let paths: Vec<ContentPath> = paths.iter().map(|p| path(p)).collect();
        LayoutResolver::from_paths(&paths).unwrap()
    }

    fn chain(resolver: &LayoutResolver, item: &str) -> Vec<String> {
        resolver
            .chain(&path(item))
            .unwrap()
            .into_iter()
            .map(|p| p.to_string())
            .collect()
    }

    // =========================================================================
    // Names
    // =========================================================================

    #[test]
    fn layout_names() {
        assert_eq!(parse_layout_name("_layout.tpl"), Some(Ok(LayoutName::Default)));
        assert_eq!(
            parse_layout_name("_layout{drafts%2F**}.tpl"),
            Some(Ok(LayoutName::Patterned("drafts/**".into())))
        );
        assert_eq!(
            parse_layout_name("_layout{*.md}.tpl"),
            Some(Ok(LayoutName::Patterned("*.md".into())))
        );
        for other in ["_layouts.tpl", "_layout.md", "layout.tpl", "_layout{x.tpl", "_nav.tpl"] {
            assert_eq!(parse_layout_name(other), None, "{other}");
        }
        assert!(matches!(
            parse_layout_name("_layout{}.tpl"),
            Some(Err(LayoutError::Pattern { .. }))
        ));
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    #[test]
    fn chain_runs_innermost_to_root() {
        let r = resolver(&["/_layout.tpl", "/posts/_layout.tpl", "/posts/a.md"]);
        assert_eq!(chain(&r, "/posts/a.md"), ["/posts/_layout.tpl", "/_layout.tpl"]);
        assert_eq!(chain(&r, "/about.md"), ["/_layout.tpl"]);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn directories_without_layouts_are_skipped() {
        let r = resolver(&["/_layout.tpl"]);
        assert_eq!(chain(&r, "/a/b/c/page.md"), ["/_layout.tpl"]);
        assert!(resolver(&[]).chain(&path("/x.md")).unwrap().is_empty());
    }

    #[test]
    fn patterned_layout_wins_over_default() {
        let r = resolver(&["/posts/_layout.tpl", "/posts/_layout{drafts%2F**}.tpl"]);
        assert_eq!(chain(&r, "/posts/drafts/x.md"), ["/posts/_layout{drafts%2F**}.tpl"]);
        assert_eq!(chain(&r, "/posts/x.md"), ["/posts/_layout.tpl"]);
    }

    #[test]
    fn patterns_match_the_full_path_below_each_directory() {
        // At the root the relative path includes the /posts prefix.
        let r = resolver(&["/_layout{posts%2F*.md}.tpl", "/_layout.tpl"]);
        assert_eq!(chain(&r, "/posts/a.md"), ["/_layout{posts%2F*.md}.tpl"]);
        assert_eq!(chain(&r, "/posts/deep/a.md"), ["/_layout.tpl"]);
    }

    #[test]
    fn two_matching_patterns_are_ambiguous() {
        let r = resolver(&["/_layout{*.md}.tpl", "/_layout{a*}.tpl"]);
        let err = r.chain(&path("/a.md")).unwrap_err();
        assert!(matches!(err, LayoutError::Ambiguous { .. }));
        assert!(err.to_string().contains("/_layout{*.md}.tpl"));
        assert!(err.to_string().contains("/_layout{a*}.tpl"));
        // Only one matches here.
        assert_eq!(chain(&r, "/b.md"), ["/_layout{*.md}.tpl"]);
    }

    #[test]
    fn non_layout_paths_are_ignored() {
        let mut r = LayoutResolver::new();
        assert!(!r.add(&path("/_nav.tpl")).unwrap());
        assert!(r.add(&path("/_layout.tpl")).unwrap());
        assert_eq!(r.len(), 1);
    }

    // =========================================================================
    // Composition
    // =========================================================================

    #[tokio::test]
    async fn layers_wrap_inside_out_and_share_sections() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("posts")).unwrap();
        fs::write(
            tmp.path().join("_layout.tpl"),
            "<html><title>{% title %}</title>{% section \"head\" optional %}{% body %}</html>",
        )
        .unwrap();
        fs::write(
            tmp.path().join("posts/_layout.tpl"),
            "{% define \"head\" %}<meta>{% end %}<article>{% body %}{% section \"aside\" %}</article>",
        )
        .unwrap();
        let site = crate::test_helpers::test_site_with_layouts(
            tmp.path(),
            &["/_layout.tpl", "/posts/_layout.tpl"],
        );

        let item = static_item("/posts/a.md", Some("/posts/a.html"), "");
        let mut body = Fragment::new("<p>hi</p>");
        body.title = Some("A & B".into());
        body.sections.insert("aside".into(), "<aside/>".into());

        let html = apply(&site, &item, &body).await.unwrap().unwrap();
        assert_eq!(
            html,
            "<html><title>A &amp; B</title><meta><article><p>hi</p><aside/></article></html>"
        );
    }

    #[tokio::test]
    async fn missing_required_section_names_the_layout() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("_layout.tpl"), "{% section \"sidebar\" %}").unwrap();
        let site = crate::test_helpers::test_site_with_layouts(tmp.path(), &["/_layout.tpl"]);
        let item = static_item("/a.md", Some("/a.html"), "");

        let err = apply(&site, &item, &Fragment::new("x")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "/_layout.tpl: Required section 'sidebar' is not defined."
        );
    }

    #[tokio::test]
    async fn no_layouts_leaves_body_alone() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let item = static_item("/a.md", Some("/a.html"), "");
        assert_eq!(apply(&site, &item, &Fragment::new("x")).await.unwrap(), None);
    }
}
