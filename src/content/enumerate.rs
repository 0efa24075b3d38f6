//! Enumeration levels and page queries of template pages.
//!
//! A template enumerates when its front matter has `enumerate`: one level,
//! or a list of levels for nested enumeration.
//!
//! ```yaml
//! enumerate:
//!   - pages: /posts/*.md        # payload source: exactly one of
//!     group_by: tags            #   items / pages / from
//!     output: "tags/{{ item.key }}.html"
//!     title: "Tagged {{ item.key }}"
//!   - from: item.pages          # second level walks the first's payload
//!     output: "tags/{{ parent.key }}/{{ item.title }}.html"
//! ```
//!
//! `collect` takes the same page query and hands the result to an ordinary
//! template as `pages`.

use super::{ContentItem, page_value};
use crate::glob::PathGlob;
use crate::site::Site;
use crate::template::render::to_text;
use crate::template::{Scope, TemplateError};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A selection of initialized input pages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PageQuery {
    /// Rooted glob over content paths.
    pub pages: String,
    pub exclude: Vec<String>,
    /// Page field (`title`, `path`, `url`) or front-matter key.
    pub sort_by: Option<String>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadSource {
    Items(Vec<Value>),
    Pages {
        query: PageQuery,
        group_by: Option<String>,
    },
    /// Dotted path to a list in the enclosing scope.
    From(Vec<String>),
}

/// One level of enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub source: PayloadSource,
    /// Unescaped template for the instance's output path, relative to the
    /// template's directory.
    pub output: String,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLevel {
    #[serde(default)]
    items: Option<Vec<Value>>,
    #[serde(default)]
    pages: Option<String>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    group_by: Option<String>,
    #[serde(default)]
    sort_by: Option<String>,
    #[serde(default)]
    reverse: bool,
    #[serde(default)]
    limit: Option<usize>,
    output: String,
    #[serde(default)]
    title: Option<String>,
}

fn invalid(message: impl Into<String>) -> TemplateError {
    TemplateError::Enumerate(message.into())
}

impl TryFrom<RawLevel> for Level {
    type Error = TemplateError;

    fn try_from(raw: RawLevel) -> Result<Self, Self::Error> {
        if raw.output.trim().is_empty() {
            return Err(invalid("`output` must not be empty"));
        }
        let is_query = raw.group_by.is_some()
            || raw.sort_by.is_some()
            || raw.reverse
            || raw.limit.is_some()
            || !raw.exclude.is_empty();
        let sources = usize::from(raw.items.is_some())
            + usize::from(raw.pages.is_some())
            + usize::from(raw.from.is_some());
        if sources != 1 {
            return Err(invalid("each level takes exactly one of `items`, `pages` or `from`"));
        }
        if raw.pages.is_none() && is_query {
            return Err(invalid(
                "`group_by`, `sort_by`, `reverse`, `limit` and `exclude` only apply to `pages`",
            ));
        }
        let source = match (raw.items, raw.pages, raw.from) {
            (Some(items), _, _) => PayloadSource::Items(items),
            (_, Some(pages), _) => PayloadSource::Pages {
                query: PageQuery {
                    pages,
                    exclude: raw.exclude,
                    sort_by: raw.sort_by,
                    reverse: raw.reverse,
                    limit: raw.limit,
                },
                group_by: raw.group_by,
            },
            (_, _, Some(from)) => {
                PayloadSource::From(from.trim().split('.').map(str::to_string).collect())
            }
            (None, None, None) => {
                return Err(invalid("each level takes exactly one of `items`, `pages` or `from`"));
            }
        };
        Ok(Level {
            source,
            output: raw.output,
            title: raw.title,
        })
    }
}

fn level_from(value: &Value) -> Result<Level, TemplateError> {
    let raw: RawLevel = serde_json::from_value(value.clone()).map_err(|e| invalid(e.to_string()))?;
    Level::try_from(raw)
}

/// Levels declared by a template's `enumerate` key; empty when absent.
pub fn parse_levels(meta: &Map<String, Value>) -> Result<Vec<Level>, TemplateError> {
    match meta.get("enumerate") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(levels)) if !levels.is_empty() => levels.iter().map(level_from).collect(),
        Some(level @ Value::Object(_)) => Ok(vec![level_from(level)?]),
        Some(_) => Err(invalid("`enumerate` must be a level or a non-empty list of levels")),
    }
}

/// The query under a template's `collect` key, if any.
pub fn parse_collect(meta: &Map<String, Value>) -> Result<Option<PageQuery>, TemplateError> {
    let Some(raw) = meta.get("collect") else {
        return Ok(None);
    };
    let query: PageQuery = serde_json::from_value(raw.clone()).map_err(|e| invalid(e.to_string()))?;
    if query.pages.trim().is_empty() {
        return Err(invalid("`collect` needs a `pages` pattern"));
    }
    Ok(Some(query))
}

/// Pages matching `query`, sorted and limited, as page objects. The
/// requesting item never lists itself.
pub fn collect_pages(
    site: &Site,
    query: &PageQuery,
    requester: &ContentItem,
) -> Result<Vec<Value>, TemplateError> {
    let mut pages = select_pages(site, query, requester)?;
    limit(&mut pages, query.limit);
    Ok(pages)
}

/// Payloads of one level. `scope` supplies `item`/`parent` for `from`.
pub fn payloads(
    level: &Level,
    site: &Site,
    requester: &ContentItem,
    scope: &Scope,
) -> Result<Vec<Value>, TemplateError> {
    match &level.source {
        PayloadSource::Items(items) => Ok(items.clone()),
        PayloadSource::Pages { query, group_by } => {
            let pages = select_pages(site, query, requester)?;
            let mut payloads = match group_by {
                Some(field) => group_pages(pages, field),
                None => pages,
            };
            limit(&mut payloads, query.limit);
            Ok(payloads)
        }
        PayloadSource::From(path) => match scope.lookup(path) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(invalid(format!("'{}' is not a list", path.join(".")))),
        },
    }
}

fn select_pages(
    site: &Site,
    query: &PageQuery,
    requester: &ContentItem,
) -> Result<Vec<Value>, TemplateError> {
    let glob = PathGlob::rooted([&query.pages], &query.exclude).map_err(|e| invalid(e.to_string()))?;
    let mut pages: Vec<Value> = site
        .graph()
        .pages_matching(&glob)
        .iter()
        .filter(|item| !std::ptr::eq(item.as_ref(), requester))
        .map(|item| page_value(item))
        .collect();
    if let Some(field) = &query.sort_by {
        pages.sort_by(|a, b| compare_fields(page_field(a, field), page_field(b, field)));
    }
    if query.reverse {
        pages.reverse();
    }
    Ok(pages)
}

fn limit(values: &mut Vec<Value>, limit: Option<usize>) {
    if let Some(limit) = limit {
        values.truncate(limit);
    }
}

/// A top-level page field, falling back to the page's front matter.
fn page_field<'a>(page: &'a Value, field: &str) -> Option<&'a Value> {
    page.get(field)
        .filter(|value| !value.is_null())
        .or_else(|| page.get("meta")?.get(field))
        .filter(|value| !value.is_null())
}

/// Numbers compare numerically, everything else by text. Missing values
/// sort last.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (Some(x), Some(y)) => to_text(x).cmp(&to_text(y)),
    }
}

/// `{key, pages}` payloads, one per distinct value of `field`, sorted by
/// key. List-valued fields put a page in every group it names.
fn group_pages(pages: Vec<Value>, field: &str) -> Vec<Value> {
    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for page in pages {
        let mut keys: Vec<String> = match page_field(&page, field) {
            Some(Value::Array(values)) => values.iter().map(to_text).collect(),
            Some(value) => vec![to_text(value)],
            None => Vec::new(),
        };
        keys.retain(|key| !key.is_empty());
        keys.sort();
        keys.dedup();
        for key in keys {
            groups.entry(key).or_default().push(page.clone());
        }
    }
    groups
        .into_iter()
        .map(|(key, pages)| json!({ "key": key, "pages": pages }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(yaml: &str) -> Map<String, Value> {
        crate::frontmatter::parse(crate::frontmatter::Format::Yaml, yaml).unwrap()
    }

    fn page(path: &str, meta: Value) -> Value {
        json!({ "path": path, "url": null, "title": null, "meta": meta })
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    #[test]
    fn single_level_and_list_of_levels() {
        let one = parse_levels(&meta("enumerate:\n  items: [a, b]\n  output: \"{{ item }}.html\"\n")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].source, PayloadSource::Items(vec![json!("a"), json!("b")]));

        let two = parse_levels(&meta(
            "enumerate:\n  - pages: /posts/*.md\n    group_by: tags\n    output: \"t/{{ item.key }}.html\"\n  - from: item.pages\n    output: x.html\n",
        ))
        .unwrap();
        assert_eq!(two.len(), 2);
        assert!(matches!(&two[0].source, PayloadSource::Pages { group_by: Some(g), .. } if g == "tags"));
        assert_eq!(two[1].source, PayloadSource::From(vec!["item".into(), "pages".into()]));
    }

    #[test]
    fn no_enumerate_key_means_no_levels() {
        assert!(parse_levels(&meta("title: x\n")).unwrap().is_empty());
    }

    #[test]
    fn malformed_levels_are_rejected() {
        for bad in [
            "enumerate: 3\n",
            "enumerate: []\n",
            "enumerate:\n  output: x.html\n",
            "enumerate:\n  items: [a]\n  pages: /x\n  output: x.html\n",
            "enumerate:\n  items: [a]\n  group_by: tags\n  output: x.html\n",
            "enumerate:\n  items: [a]\n  output: \" \"\n",
            "enumerate:\n  items: [a]\n",
            "enumerate:\n  items: [a]\n  output: x.html\n  colour: red\n",
        ] {
            assert!(
                matches!(parse_levels(&meta(bad)), Err(TemplateError::Enumerate(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn collect_query() {
        let query = parse_collect(&meta("collect:\n  pages: /posts/*.md\n  sort_by: date\n  reverse: true\n  limit: 3\n"))
            .unwrap()
            .unwrap();
        assert_eq!(query.sort_by.as_deref(), Some("date"));
        assert!(query.reverse);
        assert_eq!(query.limit, Some(3));
        assert_eq!(parse_collect(&meta("title: x\n")).unwrap(), None);
        assert!(parse_collect(&meta("collect:\n  limit: 3\n")).is_err());
    }

    // =========================================================================
    // Sorting and grouping
    // =========================================================================

    #[test]
    fn fields_fall_back_to_front_matter() {
        let p = json!({ "path": "/a.md", "title": "T", "meta": { "date": "2024-01-01", "title": "ignored" } });
        assert_eq!(page_field(&p, "title"), Some(&json!("T")));
        assert_eq!(page_field(&p, "date"), Some(&json!("2024-01-01")));
        assert_eq!(page_field(&p, "missing"), None);
    }

    #[test]
    fn numbers_sort_numerically_and_missing_last() {
        let mut values = vec![Some(json!(10)), None, Some(json!(9))];
        values.sort_by(|a, b| compare_fields(a.as_ref(), b.as_ref()));
        assert_eq!(values, vec![Some(json!(9)), Some(json!(10)), None]);
    }

    #[test]
    fn grouping_by_list_field() {
        let pages = vec![
            page("/a.md", json!({ "tags": ["rust", "web"] })),
            page("/b.md", json!({ "tags": "rust" })),
            page("/c.md", json!({})),
            page("/d.md", json!({ "tags": ["web", "web"] })),
        ];
        let groups = group_pages(pages, "tags");
        let summary: Vec<(String, Vec<String>)> = groups
            .iter()
            .map(|g| {
                let paths = g["pages"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|p| p["path"].as_str().unwrap().to_string())
                    .collect();
                (g["key"].as_str().unwrap().to_string(), paths)
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("rust".to_string(), vec!["/a.md".to_string(), "/b.md".to_string()]),
                ("web".to_string(), vec!["/a.md".to_string(), "/d.md".to_string()]),
            ]
        );
    }

    #[test]
    fn from_reads_the_enclosing_payload() {
        let level = Level {
            source: PayloadSource::From(vec!["item".into(), "pages".into()]),
            output: "x".into(),
            title: None,
        };
        let tmp = tempfile::TempDir::new().unwrap();
        let site = crate::test_helpers::test_site(tmp.path());
        let requester = crate::test_helpers::static_item("/t.tpl", None, "");

        let scope = Scope::new().with("item", json!({ "pages": [1, 2] }));
        assert_eq!(payloads(&level, &site, &requester, &scope).unwrap(), vec![json!(1), json!(2)]);

        let empty = Scope::new();
        assert!(payloads(&level, &site, &requester, &empty).unwrap().is_empty());

        let scalar = Scope::new().with("item", json!({ "pages": "nope" }));
        assert!(payloads(&level, &site, &requester, &scalar).is_err());
    }
}
