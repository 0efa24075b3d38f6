use super::enumerate::{self, Level, PageQuery};
use super::markdown::page_output_path;
use super::origin::{EnumeratedOrigin, Origin};
use super::{
    ContentError, ContentItem, Fragment, Identity, ItemKind, RenderedBody, Renderer, SiteServices,
    template_scope,
};
use crate::path::ContentPath;
use crate::site::Site;
use crate::template::{RenderHost, Scope, Template, TemplateError, render, render_inline};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// A `*.tpl` page.
///
/// The scanned template is level 0. When its front matter declares
/// enumeration levels it produces no output itself; each payload of level
/// `k` becomes an instance at level `k + 1`, rendered from the same
/// template with the payload bound to `item`. An instance enumerates again
/// while deeper levels remain.
#[derive(Debug)]
pub struct TemplatePage {
    template: Arc<Template>,
    levels: Arc<[Level]>,
    collect: Option<Arc<PageQuery>>,
    level: usize,
    title: OnceLock<Option<String>>,
    layout: OnceLock<bool>,
}

impl TemplatePage {
    pub fn new(path: &ContentPath, template: Arc<Template>) -> Result<Self, TemplateError> {
        let levels = enumerate::parse_levels(template.meta()).map_err(|e| e.at(path.as_str()))?;
        let collect = enumerate::parse_collect(template.meta()).map_err(|e| e.at(path.as_str()))?;
        Ok(Self {
            template,
            levels: levels.into(),
            collect: collect.map(Arc::new),
            level: 0,
            title: OnceLock::new(),
            layout: OnceLock::new(),
        })
    }

    pub fn level(&self) -> usize {
        self.level
    }

    fn instance(&self) -> Self {
        Self {
            template: Arc::clone(&self.template),
            levels: Arc::clone(&self.levels),
            collect: self.collect.clone(),
            level: self.level + 1,
            title: OnceLock::new(),
            layout: OnceLock::new(),
        }
    }

    /// The level this page was enumerated from; `None` for the scanned
    /// template.
    fn source_level(&self) -> Option<&Level> {
        self.level.checked_sub(1).and_then(|k| self.levels.get(k))
    }

    /// Enumerating templates only produce through their instances.
    fn produces_output(&self) -> bool {
        self.level > 0 || self.levels.is_empty()
    }
}

async fn render_plain(source: &str, scope: &Scope, path: &ContentPath) -> Result<String, TemplateError> {
    render_inline(source, scope.clone())
        .await
        .map_err(|e| e.at(path.as_str()))
}

#[async_trait]
impl Renderer for TemplatePage {
    fn kind(&self) -> ItemKind {
        ItemKind::Template
    }

    fn enumerates(&self) -> bool {
        self.level < self.levels.len()
    }

    async fn initialize(&self, item: &ContentItem, site: &Site) -> Result<Identity, ContentError> {
        let path = item.content_path();
        let front_matter = site
            .front_matter()
            .bind(path, self.template.meta().clone())
            .map_err(|source| ContentError::FrontMatter {
                path: path.to_string(),
                source,
            })?;
        let scope = template_scope(site, item).plain();

        let title_source = self
            .source_level()
            .and_then(|level| level.title.as_deref())
            .or_else(|| front_matter.title());
        let title = match title_source {
            Some(source) => Some(render_plain(source, &scope, path).await?),
            None => None,
        }
        .filter(|title| !title.trim().is_empty());

        let output_path = match self.source_level() {
            _ if !self.produces_output() => None,
            Some(level) => {
                let rendered = render_plain(&level.output, &scope, path).await?;
                let rendered = rendered.trim();
                if rendered.is_empty() {
                    return Err(ContentError::Render {
                        path: item.origin().to_string(),
                        message: format!("output '{}' rendered to an empty path", level.output),
                    });
                }
                let dir = path.parent().unwrap_or_else(ContentPath::root);
                Some(dir.join_output(rendered)?)
            }
            None => Some(page_output_path(path, &front_matter)?),
        };

        let _ = self.title.set(title);
        let _ = self.layout.set(front_matter.layout_enabled());
        Ok(Identity {
            output_path,
            front_matter: Some(front_matter),
        })
    }

    async fn generate(&self, item: &ContentItem, site: &Site) -> Result<RenderedBody, ContentError> {
        let path = item.content_path();
        let mut scope = template_scope(site, item);
        if let Some(query) = &self.collect {
            let pages = enumerate::collect_pages(site, query, item).map_err(|e| e.at(path.as_str()))?;
            scope.insert("pages", Value::Array(pages));
        }
        let host = PageHost {
            services: SiteServices::new(site, path.parent().unwrap_or_else(ContentPath::root)),
            title: self.title(),
        };
        let rendered = render(&self.template, &mut scope, &host)
            .await
            .map_err(|e| e.at(path.as_str()))?;
        Ok(RenderedBody::Html(Fragment {
            html: rendered.html,
            title: self.title(),
            sections: rendered.sections,
        }))
    }

    fn title(&self) -> Option<String> {
        self.title.get().cloned().flatten()
    }

    fn wants_layout(&self) -> bool {
        self.layout.get().copied().unwrap_or(true)
    }

    fn enumerate(
        &self,
        item: &ContentItem,
        site: &Site,
    ) -> Result<Box<dyn Iterator<Item = Value> + Send>, ContentError> {
        let Some(level) = self.levels.get(self.level) else {
            return Ok(Box::new(std::iter::empty()));
        };
        let scope = template_scope(site, item);
        let payloads = enumerate::payloads(level, site, item, &scope)
            .map_err(|e| e.at(item.origin().to_string()))?;
        Ok(Box::new(payloads.into_iter()))
    }

    fn instantiate(
        &self,
        parent: &Arc<ContentItem>,
        payload: Value,
    ) -> Result<ContentItem, ContentError> {
        let template = parent.origin().input_file().clone();
        let origin = EnumeratedOrigin::new(parent, parent.generation() + 1, template, payload)?;
        Ok(ContentItem::new(Origin::Enumerated(origin), self.instance()))
    }
}

struct PageHost<'a> {
    services: SiteServices<'a>,
    title: Option<String>,
}

#[async_trait]
impl RenderHost for PageHost<'_> {
    fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    async fn include(&self, path: &str, scope: &Scope) -> Result<String, TemplateError> {
        self.services.include(self, path, scope).await
    }

    async fn blurb(&self, target: &Value) -> Result<Option<String>, TemplateError> {
        self.services.blurb(target).await
    }
}
