//! A whole run: load an input root, expand its content, reconcile output.
//!
//! ```text
//! site.toml ─▶ scan ─▶ layouts + precompiled templates ─▶ items (gen 0)
//!                                                            │
//!                              expand to fixed point ◀───────┘
//!                                        │
//!                              reconcile into the output root ─▶ ChangeReport
//! ```

use crate::config::{ConfigError, SiteConfig, load_config};
use crate::content::{self, ContentItem, ItemFailures};
use crate::frontmatter::FrontMatterError;
use crate::graph::Expansion;
use crate::layout::{LayoutError, LayoutResolver};
use crate::path::ContentPath;
use crate::reconcile::{ChangeReport, ReconcileError, desired_outputs, reconcile};
use crate::scan::{ScanError, SourceKind, scan};
use crate::site::{Site, SitePaths};
use crate::template::TemplateError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

fn templates_message(errors: &[TemplateError]) -> String {
    match errors {
        [only] => only.to_string(),
        _ => {
            let mut message = format!("{} templates failed to compile:", errors.len());
            for error in errors {
                message.push_str("\n  - ");
                message.push_str(&error.to_string());
            }
            message
        }
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("input root '{}': {source}", path.display())]
    InputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    FrontMatter(#[from] FrontMatterError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("{}", templates_message(.0))]
    Templates(Vec<TemplateError>),
    #[error(transparent)]
    Items(#[from] ItemFailures),
    #[error(transparent)]
    Output(#[from] ReconcileError),
    #[error("task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for BuildError {
    fn from(e: tokio::task::JoinError) -> Self {
        BuildError::Task(e.to_string())
    }
}

/// A loaded and fully expanded site.
#[derive(Debug)]
pub struct Project {
    site: Arc<Site>,
    expansion: Expansion,
}

impl Project {
    /// Load the site at `input_root` with its `site.toml`.
    pub async fn load(input_root: &Path) -> Result<Self, BuildError> {
        let root = tokio::fs::canonicalize(input_root)
            .await
            .map_err(|source| BuildError::InputRoot {
                path: input_root.to_path_buf(),
                source,
            })?;
        let config = {
            let root = root.clone();
            tokio::task::spawn_blocking(move || load_config(&root)).await??
        };
        Self::load_with(&root, config).await
    }

    /// Load the site at `input_root` with an explicit configuration.
    pub async fn load_with(input_root: &Path, config: SiteConfig) -> Result<Self, BuildError> {
        let paths = SitePaths::new(input_root, &config);
        let sources = {
            let paths = paths.clone();
            tokio::task::spawn_blocking(move || scan(&paths)).await??
        };

        let layouts = LayoutResolver::from_paths(
            sources
                .iter()
                .filter(|source| source.kind == SourceKind::Layout)
                .map(|source| &source.content_path),
        )?;
        let site = Arc::new(Site::new(paths, config, layouts)?);

        let templates: Vec<ContentPath> = sources
            .iter()
            .filter(|source| source.is_template())
            .map(|source| source.content_path.clone())
            .collect();
        {
            let site = Arc::clone(&site);
            tokio::task::spawn_blocking(move || site.templates().precompile(&templates))
                .await?
                .map_err(BuildError::Templates)?;
        }
        info!(
            sources = sources.len(),
            layouts = site.layouts().len(),
            templates = %site.templates().cache_stats(),
            "site loaded"
        );

        let mut initial = Vec::new();
        let mut failures = Vec::new();
        for source in sources.iter().filter(|source| source.kind.is_content()) {
            match content::from_source(&site, source) {
                Ok(Some(item)) => initial.push(item),
                Ok(None) => {}
                Err(e) => failures.push(e),
            }
        }
        ItemFailures::check(failures)?;

        let expansion = site.graph().expand(&site, initial).await?;
        Ok(Self { site, expansion })
    }

    pub fn site(&self) -> &Arc<Site> {
        &self.site
    }

    pub fn expansion(&self) -> Expansion {
        self.expansion
    }

    pub fn items(&self) -> Vec<Arc<ContentItem>> {
        self.site.graph().items()
    }

    /// Number of output paths, failing on conflicts. Touches nothing.
    pub fn check_outputs(&self) -> Result<usize, BuildError> {
        Ok(desired_outputs(&self.items())?.len())
    }

    /// Prepare every item and reconcile the output root.
    pub async fn generate_output(&self) -> Result<ChangeReport, BuildError> {
        Ok(reconcile(&self.site, &self.items()).await?)
    }
}

/// Load, expand, and reconcile the site at `input_root`.
pub async fn build(input_root: &Path) -> Result<ChangeReport, BuildError> {
    Project::load(input_root).await?.generate_output().await
}
