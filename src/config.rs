//! `site.toml`: the per-site settings file at the input root.
//!
//! The file may be absent. When present it is a sparse overlay on the stock
//! values; a site writes down only the keys it changes.
//!
//! ## Keys and stock values
//!
//! ```toml
//! output_dir = ".out"       # Output root, relative to the input root
//! cache_dir = ".cache"      # Compiled-template cache, relative to the input root
//!
//! [site]
//! title = ""
//! base_url = ""
//!
//! [site.params]             # Free-form values exposed to templates as site.params
//!
//! [markdown]
//! tables = true
//! footnotes = true
//! strikethrough = true
//! tasklists = true
//! smart_punctuation = false
//! heading_attributes = false
//!
//! [processing]
//! max_threads = 4           # Worker threads (omit for auto = CPU cores)
//!
//! [[front_matter]]          # Front-matter schema registrations
//! name = "post"
//! include = ["/posts/*.md"]
//! exclude = []
//! required = ["title"]
//!
//! [front_matter.defaults]
//! author = "anonymous"
//! ```
//!
//! A misspelled key fails the load instead of being ignored.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path};
use thiserror::Error;

/// Name of the configuration file at the input root.
pub const CONFIG_FILENAME: &str = "site.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading site.toml: {0}")]
    Io(#[from] std::io::Error),
    #[error("site.toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("site.toml: {0}")]
    Validation(String),
}

/// Site configuration loaded from `site.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Output root, relative to the input root.
    pub output_dir: String,
    /// Cache root, relative to the input root.
    pub cache_dir: String,
    /// Site-wide values visible to templates.
    pub site: SiteInfo,
    /// Markdown extensions.
    pub markdown: MarkdownConfig,
    /// Worker pool sizing.
    pub processing: ProcessingConfig,
    /// Front-matter schema registrations, in declaration order.
    pub front_matter: Vec<FrontMatterSchemaConfig>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            output_dir: ".out".to_string(),
            cache_dir: ".cache".to_string(),
            site: SiteInfo::default(),
            markdown: MarkdownConfig::default(),
            processing: ProcessingConfig::default(),
            front_matter: Vec::new(),
        }
    }
}

impl SiteConfig {
    /// Validate values that serde alone cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_dir("output_dir", &self.output_dir)?;
        validate_dir("cache_dir", &self.cache_dir)?;
        let output = Path::new(&self.output_dir);
        let cache = Path::new(&self.cache_dir);
        if output.starts_with(cache) || cache.starts_with(output) {
            return Err(ConfigError::Validation(format!(
                "output_dir '{}' and cache_dir '{}' must not overlap",
                self.output_dir, self.cache_dir
            )));
        }
        if self.processing.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_threads must be at least 1".into(),
            ));
        }
        let mut names = std::collections::BTreeSet::new();
        for schema in &self.front_matter {
            if schema.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "front_matter.name must not be empty".into(),
                ));
            }
            if !names.insert(schema.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "front_matter schema '{}' is declared twice",
                    schema.name
                )));
            }
            if schema.include.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "front_matter schema '{}' has no include patterns",
                    schema.name
                )));
            }
        }
        Ok(())
    }
}

fn validate_dir(key: &str, value: &str) -> Result<(), ConfigError> {
    let path = Path::new(value);
    if value.trim().is_empty() || value == "." {
        return Err(ConfigError::Validation(format!("{key} must not be empty")));
    }
    if path.is_absolute() {
        return Err(ConfigError::Validation(format!(
            "{key} must be relative to the input root"
        )));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return Err(ConfigError::Validation(format!(
            "{key} must not contain '.' or '..'"
        )));
    }
    Ok(())
}

/// Site-wide values exposed to templates as `site`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteInfo {
    pub title: String,
    pub base_url: String,
    /// Free-form table, passed through to templates as `site.params`.
    pub params: toml::Table,
}

/// Markdown extensions passed to the markdown renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkdownConfig {
    pub tables: bool,
    pub footnotes: bool,
    pub strikethrough: bool,
    pub tasklists: bool,
    pub smart_punctuation: bool,
    pub heading_attributes: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            tables: true,
            footnotes: true,
            strikethrough: true,
            tasklists: true,
            smart_punctuation: false,
            heading_attributes: false,
        }
    }
}

impl MarkdownConfig {
    pub fn options(&self) -> pulldown_cmark::Options {
        use pulldown_cmark::Options;
        let mut options = Options::empty();
        options.set(Options::ENABLE_TABLES, self.tables);
        options.set(Options::ENABLE_FOOTNOTES, self.footnotes);
        options.set(Options::ENABLE_STRIKETHROUGH, self.strikethrough);
        options.set(Options::ENABLE_TASKLISTS, self.tasklists);
        options.set(Options::ENABLE_SMART_PUNCTUATION, self.smart_punctuation);
        options.set(Options::ENABLE_HEADING_ATTRIBUTES, self.heading_attributes);
        options
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Upper bound on worker threads; absent means one per core. Never
    /// raises the count past the core count.
    pub max_threads: Option<usize>,
}

/// Worker count for the tokio runtime and the rayon pool: the configured
/// bound clamped to the core count, or the core count itself.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    match config.max_threads {
        Some(cap) => cap.clamp(1, cores),
        None => cores,
    }
}

/// One `[[front_matter]]` registration: pattern set → schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrontMatterSchemaConfig {
    pub name: String,
    /// Rooted glob patterns selecting the documents this schema applies to.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Keys every bound document must define.
    pub required: Vec<String>,
    /// Values filled in for keys a document leaves out.
    pub defaults: toml::Table,
}

// =============================================================================
// Loading
// =============================================================================

/// `SiteConfig::default()` as a TOML table, the base every overlay lands on.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(SiteConfig::default())
        .map_err(|e| ConfigError::Validation(format!("stock defaults do not serialize: {e}")))
}

/// Lay `overlay` over `base`. Nested tables combine per key; any other
/// overlay value (arrays included) takes the place of the base value.
pub fn merge_toml(mut base: toml::Value, overlay: toml::Value) -> toml::Value {
    overlay_into(&mut base, overlay);
    base
}

fn overlay_into(slot: &mut toml::Value, overlay: toml::Value) {
    match (slot, overlay) {
        (toml::Value::Table(table), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match table.get_mut(&key) {
                    Some(existing) => overlay_into(existing, value),
                    None => {
                        table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// The parsed but unvalidated `site.toml`, or `None` when the site has none.
pub fn load_raw_config(root: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let text = match fs::read_to_string(root.join(CONFIG_FILENAME)) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(toml::from_str(&text)?))
}

/// Stock values, overlaid with the site's `site.toml`, then validated.
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    let merged = match load_raw_config(root)? {
        Some(overlay) => merge_toml(stock_defaults_value()?, overlay),
        None => stock_defaults_value()?,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Documented stock `site.toml`, printed by `kiln gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# kiln site configuration
# =======================
# Every key below is optional and shows its stock value. Delete what you
# do not change. A key kiln does not know fails the build.

# Output root, relative to this file. Everything in it that no content
# item claims is deleted on each build.
output_dir = ".out"

# Compiled-template cache, relative to this file. Safe to delete.
cache_dir = ".cache"

# ---------------------------------------------------------------------------
# Site values (available to templates as `site.*`)
# ---------------------------------------------------------------------------
[site]
title = ""
base_url = ""

# Free-form values, available as `site.params.*`.
[site.params]

# ---------------------------------------------------------------------------
# Markdown extensions
# ---------------------------------------------------------------------------
[markdown]
tables = true
footnotes = true
strikethrough = true
tasklists = true
smart_punctuation = false
heading_attributes = false

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Worker thread cap. Left unset, kiln runs one worker per core.
# max_threads = 4

# ---------------------------------------------------------------------------
# Front-matter schemas
# ---------------------------------------------------------------------------
# Each schema binds to the documents its patterns select. At most one
# schema may match any document.
#
# [[front_matter]]
# name = "post"
# include = ["/posts/*.md"]
# exclude = []
# required = ["title", "date"]
#
# [front_matter.defaults]
# author = "anonymous"
"##
}
