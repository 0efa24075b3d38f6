//! The run context shared by every renderer hook.

use crate::cache::TemplateCache;
use crate::config::SiteConfig;
use crate::frontmatter::{FrontMatterError, FrontMatterRegistry, toml_to_json};
use crate::graph::ContentGraph;
use crate::layout::LayoutResolver;
use crate::template::TemplateStore;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// The three roots of a run. Output and cache roots are resolved from the
/// configuration relative to the input root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitePaths {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub cache_root: PathBuf,
}

impl SitePaths {
    pub fn new(input_root: &Path, config: &SiteConfig) -> Self {
        Self {
            input_root: input_root.to_path_buf(),
            output_root: input_root.join(&config.output_dir),
            cache_root: input_root.join(&config.cache_dir),
        }
    }
}

#[derive(Debug)]
pub struct Site {
    paths: SitePaths,
    config: SiteConfig,
    front_matter: FrontMatterRegistry,
    layouts: LayoutResolver,
    templates: TemplateStore,
    graph: ContentGraph,
}

impl Site {
    pub fn new(
        paths: SitePaths,
        config: SiteConfig,
        layouts: LayoutResolver,
    ) -> Result<Self, FrontMatterError> {
        let front_matter = FrontMatterRegistry::from_config(&config.front_matter)?;
        let templates = TemplateStore::new(&paths.input_root, TemplateCache::new(&paths.cache_root));
        Ok(Self {
            paths,
            config,
            front_matter,
            layouts,
            templates,
            graph: ContentGraph::new(),
        })
    }

    pub fn paths(&self) -> &SitePaths {
        &self.paths
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn front_matter(&self) -> &FrontMatterRegistry {
        &self.front_matter
    }

    pub fn layouts(&self) -> &LayoutResolver {
        &self.layouts
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn graph(&self) -> &ContentGraph {
        &self.graph
    }

    /// The `site` object templates see.
    pub fn site_value(&self) -> Value {
        let info = &self.config.site;
        json!({
            "title": info.title,
            "base_url": info.base_url,
            "params": toml_to_json(toml::Value::Table(info.params.clone())),
        })
    }
}
