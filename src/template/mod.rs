//! The template language.
//!
//! Templates (`*.tpl`) are HTML with embedded markers. They serve three
//! roles:
//!
//! | File | Role |
//! |------|------|
//! | `_layout.tpl`, `_layout{glob}.tpl` | layout wrapped around pages in the same directory and below |
//! | other `_*.tpl` | partial, pulled in with `{% include %}` |
//! | `*.tpl` | page; may enumerate into many pages via its front matter |
//!
//! A template compiles to a [`Template`]: its front matter plus a parsed node
//! tree. Compiled templates are plain data, so they serialize straight into
//! the on-disk cache (see [`crate::cache`]) and are shared between
//! concurrent renders behind an `Arc` (see [`TemplateStore`]).
//!
//! See [`parse`] for the syntax and [`render`] for evaluation.

pub mod parse;
pub mod render;
mod store;

pub use parse::{Expr, Node};
pub use render::{Detached, RenderHost, Rendered, Scope, render, render_inline};
pub use store::TemplateStore;

use crate::frontmatter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TemplateError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("front matter: {0}")]
    FrontMatter(String),
    #[error("cannot read '{path}': {message}")]
    Io { path: String, message: String },
    #[error("'{{% {0} %}}' is only available in layouts")]
    NotALayout(&'static str),
    #[error("Required section '{0}' is not defined.")]
    MissingSection(String),
    #[error("includes nested deeper than {0} levels")]
    IncludeDepth(usize),
    #[error("cannot include '{path}': {message}")]
    Include { path: String, message: String },
    #[error("cannot blurb '{path}': {message}")]
    Blurb { path: String, message: String },
    #[error("invalid enumeration: {0}")]
    Enumerate(String),
    #[error("{path}: {source}")]
    Located {
        path: String,
        #[source]
        source: Box<TemplateError>,
    },
}

impl TemplateError {
    /// Attach the template path, unless one is already attached.
    pub fn at(self, path: impl Into<String>) -> Self {
        match self {
            located @ Self::Located { .. } => located,
            other => Self::Located {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    meta: Map<String, Value>,
    nodes: Vec<Node>,
}

impl Template {
    /// Split off the front matter and parse the rest.
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let (meta, body) =
            frontmatter::extract(source).map_err(|e| TemplateError::FrontMatter(e.to_string()))?;
        Ok(Self {
            meta: meta.unwrap_or_default(),
            nodes: parse::parse(body)?,
        })
    }

    /// The template's own front matter.
    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compile_splits_front_matter() {
        let template = Template::compile("---\ntitle: Tags\n---\n<h1>{{ page.title }}</h1>").unwrap();
        assert_eq!(template.meta()["title"], json!("Tags"));
        assert_eq!(template.nodes().len(), 3);
    }

    #[test]
    fn compile_reports_front_matter_errors() {
        let err = Template::compile("---\ntitle: [oops\n---\nx").unwrap_err();
        assert!(matches!(err, TemplateError::FrontMatter(_)));
    }

    #[test]
    fn located_errors_are_not_nested_twice() {
        let err = TemplateError::MissingSection("x".into())
            .at("/_layout.tpl")
            .at("/other.tpl");
        assert_eq!(err.to_string(), "/_layout.tpl: Required section 'x' is not defined.");
    }

    #[test]
    fn compiled_templates_serialize() {
        let template = Template::compile("{% if a %}{{ b }}{% end %}").unwrap();
        let json = serde_json::to_string(&template).unwrap();
        let back: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(back, template);
    }
}
