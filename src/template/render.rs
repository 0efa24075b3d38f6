//! Template evaluation.
//!
//! Rendering walks the node tree against a [`Scope`] of JSON values. The
//! parts of the language that reach outside the template itself (the
//! wrapped body, sections, the composition title, includes, and blurbs of
//! other pages) are answered by a [`RenderHost`]. Page templates, layouts,
//! and inline strings each supply their own host.
//!
//! Blurbs may wait on another page's generated body, and includes read
//! files, so rendering is async.

use super::TemplateError;
use super::parse::{Expr, Node};
use super::Template;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Includes nested deeper than this fail instead of recursing forever.
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Variables visible to a template.
///
/// Globals are set by the caller (`page`, `site`, `item`, ...). Loop
/// bindings shadow globals for the duration of their block.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    globals: Map<String, Value>,
    locals: Vec<(String, Value)>,
    plain: bool,
    depth: usize,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Disable HTML escaping, for rendering paths and titles.
    pub fn plain(mut self) -> Self {
        self.plain = true;
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// A copy of this scope one include level deeper.
    pub fn descend(&self) -> Result<Scope, TemplateError> {
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(TemplateError::IncludeDepth(MAX_INCLUDE_DEPTH));
        }
        let mut child = self.clone();
        child.depth += 1;
        Ok(child)
    }

    pub fn lookup(&self, path: &[String]) -> Option<&Value> {
        let (head, rest) = path.split_first()?;
        let mut current = self
            .locals
            .iter()
            .rev()
            .find(|(name, _)| name == head)
            .map(|(_, value)| value)
            .or_else(|| self.globals.get(head))?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn eval(&self, expr: &Expr) -> Cow<'_, Value> {
        match expr {
            Expr::Literal(s) => Cow::Owned(Value::String(s.clone())),
            Expr::Path(path) => match self.lookup(path) {
                Some(value) => Cow::Borrowed(value),
                None => Cow::Owned(Value::Null),
            },
        }
    }

    fn push(&mut self, name: String, value: Value) {
        self.locals.push((name, value));
    }

    fn pop(&mut self) {
        self.locals.pop();
    }
}

/// Null, false, zero, and empty strings, arrays, and objects are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Text form of a value as it appears in output.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub fn escape_html(text: &str) -> String {
    maud::html! { (text) }.into_string()
}

/// Output of one template evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendered {
    pub html: String,
    /// Sections declared with `{% define %}`.
    pub sections: BTreeMap<String, String>,
}

/// Everything a template can ask of its surroundings.
#[async_trait]
pub trait RenderHost: Send + Sync {
    /// The wrapped body. Only layouts have one.
    fn body(&self) -> Result<&str, TemplateError> {
        Err(TemplateError::NotALayout("body"))
    }

    /// A named section exposed by the wrapped body chain.
    fn section(&self, _name: &str) -> Result<Option<&str>, TemplateError> {
        Err(TemplateError::NotALayout("section"))
    }

    fn title(&self) -> Option<&str>;

    async fn include(&self, path: &str, scope: &Scope) -> Result<String, TemplateError>;

    async fn blurb(&self, target: &Value) -> Result<Option<String>, TemplateError>;
}

/// Host for free-standing strings (output paths, titles) that have no page
/// around them.
pub struct Detached;

#[async_trait]
impl RenderHost for Detached {
    fn title(&self) -> Option<&str> {
        None
    }

    async fn include(&self, path: &str, _scope: &Scope) -> Result<String, TemplateError> {
        Err(TemplateError::Include {
            path: path.to_string(),
            message: "includes are not available here".into(),
        })
    }

    async fn blurb(&self, _target: &Value) -> Result<Option<String>, TemplateError> {
        Err(TemplateError::Blurb {
            path: String::new(),
            message: "blurbs are not available here".into(),
        })
    }
}

pub async fn render(
    template: &Template,
    scope: &mut Scope,
    host: &dyn RenderHost,
) -> Result<Rendered, TemplateError> {
    let mut rendered = Rendered::default();
    render_nodes(
        template.nodes(),
        scope,
        host,
        &mut rendered.html,
        &mut rendered.sections,
    )
    .await?;
    Ok(rendered)
}

/// Parse and render a one-off string with a detached host.
pub async fn render_inline(source: &str, mut scope: Scope) -> Result<String, TemplateError> {
    let nodes = super::parse::parse(source)?;
    let mut html = String::new();
    let mut sections = BTreeMap::new();
    render_nodes(&nodes, &mut scope, &Detached, &mut html, &mut sections).await?;
    Ok(html)
}

type RenderFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TemplateError>> + Send + 'a>>;

fn render_nodes<'a>(
    nodes: &'a [Node],
    scope: &'a mut Scope,
    host: &'a dyn RenderHost,
    out: &'a mut String,
    sections: &'a mut BTreeMap<String, String>,
) -> RenderFuture<'a> {
    Box::pin(async move {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Emit { expr, escape } => {
                    let text = to_text(&scope.eval(expr));
                    if *escape && !scope.plain {
                        out.push_str(&escape_html(&text));
                    } else {
                        out.push_str(&text);
                    }
                }
                Node::If {
                    negate,
                    cond,
                    then,
                    otherwise,
                } => {
                    let branch = if truthy(&scope.eval(cond)) != *negate {
                        then
                    } else {
                        otherwise
                    };
                    render_nodes(branch, scope, host, out, sections).await?;
                }
                Node::For {
                    binding,
                    iter,
                    body,
                } => {
                    for item in iteration_values(scope.eval(iter).into_owned()) {
                        scope.push(binding.clone(), item);
                        let result = render_nodes(body, scope, host, out, sections).await;
                        scope.pop();
                        result?;
                    }
                }
                Node::Define { name, body } => {
                    let mut captured = String::new();
                    render_nodes(body, scope, host, &mut captured, sections).await?;
                    sections.insert(name.clone(), captured);
                }
                Node::Body => out.push_str(host.body()?),
                Node::Section { name, required } => match host.section(name)? {
                    Some(html) => out.push_str(html),
                    None if *required => return Err(TemplateError::MissingSection(name.clone())),
                    None => {}
                },
                Node::Title => {
                    if let Some(title) = host.title() {
                        out.push_str(&escape_html(title));
                    }
                }
                Node::Include(path) => {
                    let html = host.include(path, scope).await?;
                    out.push_str(&html);
                }
                Node::Blurb(expr) => {
                    let target = scope.eval(expr).into_owned();
                    if let Some(blurb) = host.blurb(&target).await? {
                        out.push_str(&blurb);
                    }
                }
            }
        }
        Ok(())
    })
}

/// Arrays iterate their elements, objects iterate `{key, value}` pairs,
/// null iterates nothing, and any other value iterates once.
fn iteration_values(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect(),
        other => vec![other],
    }
}
