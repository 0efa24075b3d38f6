//! Front matter: splitting, parsing, and schema binding.
//!
//! Markdown pages and templates may open with a metadata block in YAML or
//! TOML:
//!
//! ```text
//! ---                      +++
//! title: Hello             title = "Hello"
//! tags: [rust, web]        tags = ["rust", "web"]
//! ---                      +++
//! body...                  body...
//! ```
//!
//! The block is parsed into a JSON object so every consumer (templates,
//! page selections, sorting) works with a single value model regardless of
//! the source syntax.
//!
//! ## Schema registry
//!
//! Sites declare `[[front_matter]]` schemas in `site.toml`, each bound to a
//! set of rooted glob patterns. At startup these become a
//! [`FrontMatterRegistry`]: an explicit pattern → [`SchemaDescriptor`] table.
//! When an item's front matter is bound, at most one schema may match its
//! content path. The matching schema fills in defaults and enforces required
//! keys. Two matching schemas is a configuration error that names both.

use crate::config::FrontMatterSchemaConfig;
use crate::glob::{GlobError, PathGlob};
use crate::path::ContentPath;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontMatterError {
    #[error("invalid {format} front matter: {message}")]
    Syntax {
        format: &'static str,
        message: String,
    },
    #[error("{0} front matter is not terminated")]
    Unterminated(&'static str),
    #[error("front matter must be a mapping of keys to values")]
    NotAMapping,
    #[error("'{path}' matches more than one front matter schema: '{first}' and '{second}'")]
    Ambiguous {
        path: String,
        first: String,
        second: String,
    },
    #[error("front matter is missing required key '{field}' (schema '{schema}')")]
    MissingField { schema: String, field: String },
    #[error("front matter schema '{schema}': {source}")]
    Pattern {
        schema: String,
        #[source]
        source: GlobError,
    },
}

/// Metadata block syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Toml,
}

impl Format {
    fn delimiter(self) -> &'static str {
        match self {
            Self::Yaml => "---",
            Self::Toml => "+++",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Yaml => "YAML",
            Self::Toml => "TOML",
        }
    }
}

/// Split a document into its raw front matter block and body.
///
/// The opening delimiter must be the very first line and the closing
/// delimiter a line of its own. Documents without an opening delimiter
/// have no front matter and are returned whole.
pub fn split(source: &str) -> Result<Option<(Format, &str, &str)>, FrontMatterError> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let format = match first_line(source) {
        "---" => Format::Yaml,
        "+++" => Format::Toml,
        _ => return Ok(None),
    };
    let delimiter = format.delimiter();
    let after_open = match source.find('\n') {
        Some(idx) => &source[idx + 1..],
        None => return Err(FrontMatterError::Unterminated(format.name())),
    };

    let mut offset = 0;
    for line in after_open.split_inclusive('\n') {
        if line.trim_end() == delimiter {
            let block = &after_open[..offset];
            let body = &after_open[offset + line.len()..];
            return Ok(Some((format, block, body)));
        }
        offset += line.len();
    }
    Err(FrontMatterError::Unterminated(format.name()))
}

fn first_line(source: &str) -> &str {
    source.lines().next().unwrap_or("").trim_end()
}

/// Parse a raw block into a JSON object. An empty block is an empty object.
pub fn parse(format: Format, block: &str) -> Result<Map<String, Value>, FrontMatterError> {
    if block.trim().is_empty() {
        return Ok(Map::new());
    }
    let value = match format {
        Format::Yaml => serde_yaml::from_str::<Value>(block).map_err(|e| {
            FrontMatterError::Syntax {
                format: format.name(),
                message: e.to_string(),
            }
        })?,
        Format::Toml => {
            let table: toml::Table = toml::from_str(block).map_err(|e| FrontMatterError::Syntax {
                format: format.name(),
                message: e.to_string(),
            })?;
            toml_to_json(toml::Value::Table(table))
        }
    };
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(FrontMatterError::NotAMapping),
    }
}

/// Split and parse in one step. Returns the fields (if a block was present)
/// and the body that follows it.
pub fn extract(source: &str) -> Result<(Option<Map<String, Value>>, &str), FrontMatterError> {
    match split(source)? {
        Some((format, block, body)) => Ok((Some(parse(format, block)?), body)),
        None => Ok((None, source)),
    }
}

/// Convert TOML into the JSON value model. Datetimes become strings.
pub fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// An item's bound metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter {
    schema: Option<String>,
    fields: Map<String, Value>,
}

impl FrontMatter {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            schema: None,
            fields,
        }
    }

    /// Name of the schema this front matter was bound to, if any.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.get_str("title").filter(|t| !t.trim().is_empty())
    }

    pub fn permalink(&self) -> Option<&str> {
        self.get_str("permalink").filter(|p| !p.trim().is_empty())
    }

    /// `layout: false` opts a page out of layout composition.
    pub fn layout_enabled(&self) -> bool {
        !matches!(self.get("layout"), Some(Value::Bool(false)))
    }
}

/// A registered schema: where it applies and what it requires.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    pub name: String,
    pub glob: PathGlob,
    pub required: Vec<String>,
    pub defaults: Map<String, Value>,
}

impl SchemaDescriptor {
    pub fn from_config(config: &FrontMatterSchemaConfig) -> Result<Self, FrontMatterError> {
        let glob = PathGlob::rooted(&config.include, &config.exclude).map_err(|source| {
            FrontMatterError::Pattern {
                schema: config.name.clone(),
                source,
            }
        })?;
        let defaults = match toml_to_json(toml::Value::Table(config.defaults.clone())) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self {
            name: config.name.clone(),
            glob,
            required: config.required.clone(),
            defaults,
        })
    }
}

/// Pattern → schema registration table.
#[derive(Debug, Clone, Default)]
pub struct FrontMatterRegistry {
    schemas: Vec<SchemaDescriptor>,
}

impl FrontMatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[FrontMatterSchemaConfig]) -> Result<Self, FrontMatterError> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(SchemaDescriptor::from_config(config)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: SchemaDescriptor) {
        self.schemas.push(descriptor);
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// The single schema matching `path`, if any.
    pub fn schema_for(
        &self,
        path: &ContentPath,
    ) -> Result<Option<&SchemaDescriptor>, FrontMatterError> {
        let mut found: Option<&SchemaDescriptor> = None;
        for schema in &self.schemas {
            if !schema.glob.is_match(path.as_str()) {
                continue;
            }
            if let Some(first) = found {
                return Err(FrontMatterError::Ambiguous {
                    path: path.to_string(),
                    first: first.name.clone(),
                    second: schema.name.clone(),
                });
            }
            found = Some(schema);
        }
        Ok(found)
    }

    /// Bind raw fields for the document at `path` to its schema.
    pub fn bind(
        &self,
        path: &ContentPath,
        mut fields: Map<String, Value>,
    ) -> Result<FrontMatter, FrontMatterError> {
        let Some(schema) = self.schema_for(path)? else {
            return Ok(FrontMatter::new(fields));
        };
        for (key, value) in &schema.defaults {
            if !fields.contains_key(key) {
                fields.insert(key.clone(), value.clone());
            }
        }
        if let Some(missing) = schema
            .required
            .iter()
            .find(|key| fields.get(key.as_str()).is_none_or(Value::is_null))
        {
            return Err(FrontMatterError::MissingField {
                schema: schema.name.clone(),
                field: missing.clone(),
            });
        }
        Ok(FrontMatter {
            schema: Some(schema.name.clone()),
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> ContentPath {
        ContentPath::parse(raw).unwrap()
    }

    fn schema(name: &str, include: &[&str], required: &[&str]) -> FrontMatterSchemaConfig {
        FrontMatterSchemaConfig {
            name: name.into(),
            include: include.iter().map(|s| s.to_string()).collect(),
            required: required.iter().map(|s| s.to_string()).collect(),
            ..FrontMatterSchemaConfig::default()
        }
    }

    // =========================================================================
    // Splitting and parsing
    // =========================================================================

    #[test]
    fn split_yaml_block() {
        let (format, block, body) = split("---\ntitle: Hi\n---\nBody\n").unwrap().unwrap();
        assert_eq!(format, Format::Yaml);
        assert_eq!(block, "title: Hi\n");
        assert_eq!(body, "Body\n");
    }

    #[test]
    fn split_toml_block_with_crlf() {
        let (format, block, body) = split("+++\r\ntitle = \"Hi\"\r\n+++\r\nBody").unwrap().unwrap();
        assert_eq!(format, Format::Toml);
        assert_eq!(block, "title = \"Hi\"\r\n");
        assert_eq!(body, "Body");
    }

    #[test]
    fn split_without_front_matter_returns_none() {
        assert!(split("# Just a heading\n").unwrap().is_none());
        assert!(split("--- not a delimiter\n").unwrap().is_none());
    }

    #[test]
    fn split_unterminated_block_is_error() {
        assert!(matches!(
            split("---\ntitle: Hi\n"),
            Err(FrontMatterError::Unterminated("YAML"))
        ));
    }

    #[test]
    fn parse_yaml_and_toml_agree() {
        let yaml = parse(Format::Yaml, "title: Hi\ntags: [a, b]\n").unwrap();
        let toml = parse(Format::Toml, "title = \"Hi\"\ntags = [\"a\", \"b\"]\n").unwrap();
        assert_eq!(yaml, toml);
        assert_eq!(yaml["tags"], json!(["a", "b"]));
    }

    #[test]
    fn parse_toml_datetime_as_string() {
        let fields = parse(Format::Toml, "date = 2024-03-01\n").unwrap();
        assert_eq!(fields["date"], json!("2024-03-01"));
    }

    #[test]
    fn parse_rejects_non_mapping_and_bad_syntax() {
        assert!(matches!(
            parse(Format::Yaml, "- a\n- b\n"),
            Err(FrontMatterError::NotAMapping)
        ));
        assert!(matches!(
            parse(Format::Yaml, "title: [unclosed\n"),
            Err(FrontMatterError::Syntax { format: "YAML", .. })
        ));
    }

    #[test]
    fn empty_block_is_empty_mapping() {
        let (fields, body) = extract("---\n---\nhello").unwrap();
        assert_eq!(fields, Some(Map::new()));
        assert_eq!(body, "hello");
    }

    // =========================================================================
    // Registry
    // =========================================================================

    #[test]
    fn bind_without_schema_keeps_fields() {
        let registry = FrontMatterRegistry::new();
        let fm = registry
            .bind(&path("/a.md"), parse(Format::Yaml, "title: A").unwrap())
            .unwrap();
        assert_eq!(fm.schema(), None);
        assert_eq!(fm.title(), Some("A"));
    }

    #[test]
    fn bind_applies_defaults_and_requires_keys() {
        let mut config = schema("post", &["/posts/*.md"], &["title"]);
        config.defaults.insert("author".into(), toml::Value::String("anon".into()));
        let registry = FrontMatterRegistry::from_config(&[config]).unwrap();

        let fm = registry
            .bind(&path("/posts/a.md"), parse(Format::Yaml, "title: A").unwrap())
            .unwrap();
        assert_eq!(fm.schema(), Some("post"));
        assert_eq!(fm.get_str("author"), Some("anon"));

        let err = registry.bind(&path("/posts/b.md"), Map::new()).unwrap_err();
        assert!(matches!(err, FrontMatterError::MissingField { ref field, .. } if field == "title"));
    }

    #[test]
    fn ambiguous_schemas_are_fatal_and_named() {
        let registry = FrontMatterRegistry::from_config(&[
            schema("post", &["/posts/**"], &[]),
            schema("markdown", &["/**/*.md"], &[]),
        ])
        .unwrap();
        let err = registry.schema_for(&path("/posts/a.md")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("post") && message.contains("markdown"));
        assert!(registry.schema_for(&path("/about.md")).unwrap().is_some());
        assert!(registry.schema_for(&path("/posts/a.html")).unwrap().is_some());
    }

    #[test]
    fn schema_patterns_must_be_rooted() {
        let err = FrontMatterRegistry::from_config(&[schema("post", &["posts/*.md"], &[])]).unwrap_err();
        assert!(matches!(err, FrontMatterError::Pattern { .. }));
    }

    #[test]
    fn layout_flag() {
        let fm = FrontMatter::new(parse(Format::Yaml, "layout: false").unwrap());
        assert!(!fm.layout_enabled());
        assert!(FrontMatter::default().layout_enabled());
    }
}
