//! Markdown pages.

use super::{ContentError, ContentItem, Fragment, Identity, ItemKind, RenderedBody, Renderer};
use crate::frontmatter::{self, FrontMatter};
use crate::path::ContentPath;
use crate::site::Site;
use async_trait::async_trait;
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd, html};
use std::sync::OnceLock;

/// Render markdown to HTML, without trailing whitespace.
pub fn to_html(markdown: &str, options: Options) -> String {
    let mut out = String::new();
    html::push_html(&mut out, Parser::new_ext(markdown, options));
    out.truncate(out.trim_end().len());
    out
}

/// Text of the first level-one heading.
pub fn first_heading(markdown: &str) -> Option<String> {
    let mut in_heading = false;
    let mut title = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading {
                level: HeadingLevel::H1,
                ..
            }) => in_heading = true,
            Event::End(TagEnd::Heading(HeadingLevel::H1)) if in_heading => break,
            Event::Text(text) | Event::Code(text) if in_heading => title.push_str(&text),
            _ => {}
        }
    }
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Output path of a page: its permalink resolved against the page's
/// directory, or the page's own path with an `.html` extension.
pub(crate) fn page_output_path(
    path: &ContentPath,
    front_matter: &FrontMatter,
) -> Result<ContentPath, ContentError> {
    match front_matter.permalink() {
        Some(permalink) => {
            let dir = path.parent().unwrap_or_else(ContentPath::root);
            Ok(dir.join_output(permalink)?)
        }
        None => Ok(path.with_extension(Some("html"))),
    }
}

#[derive(Debug, Default)]
pub struct MarkdownPage {
    source: OnceLock<String>,
    title: OnceLock<Option<String>>,
    layout: OnceLock<bool>,
}

#[async_trait]
impl Renderer for MarkdownPage {
    fn kind(&self) -> ItemKind {
        ItemKind::Markdown
    }

    async fn initialize(&self, item: &ContentItem, site: &Site) -> Result<Identity, ContentError> {
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
        let (fields, body) = frontmatter::extract(&text).map_err(front_matter_error)?;
        let front_matter = site
            .front_matter()
            .bind(path, fields.unwrap_or_default())
            .map_err(front_matter_error)?;

        let title = front_matter
            .title()
            .map(str::to_string)
            .or_else(|| first_heading(body));
        let output_path = page_output_path(path, &front_matter)?;

        let _ = self.title.set(title);
        let _ = self.layout.set(front_matter.layout_enabled());
        let _ = self.source.set(body.to_string());
        Ok(Identity {
            output_path: Some(output_path),
            front_matter: Some(front_matter),
        })
    }

    async fn generate(&self, item: &ContentItem, site: &Site) -> Result<RenderedBody, ContentError> {
        let source = self.source.get().ok_or_else(|| ContentError::InvalidState {
            origin: item.origin().to_string(),
            message: "markdown source was not loaded".into(),
        })?;
        let html = to_html(source, site.config().markdown.options());
        Ok(RenderedBody::Html(Fragment {
            html,
            title: self.title(),
            sections: Default::default(),
        }))
    }

    fn title(&self) -> Option<String> {
        self.title.get().cloned().flatten()
    }

    fn wants_layout(&self) -> bool {
        self.layout.get().copied().unwrap_or(true)
    }
}
