//! Content-relative paths.
//!
//! Every item, layout, and output file is addressed by a [`ContentPath`]: a
//! rooted, forward-slash path relative to either the input root or the output
//! root. `/` is the root itself, `/posts/hello.md` a file below it.
//!
//! ```text
//! /                      root
//! /posts                 directory
//! /posts/hello.md        file
//! ```
//!
//! Paths are validated once at construction, so the rest of the engine can
//! treat them as plain strings. A valid path:
//!
//! - starts with `/`
//! - contains no `\`
//! - has no empty segments (`//`, trailing `/` except for the root)
//! - has no `.` or `..` segments
//!
//! Comparison is ordinal and case-sensitive on every platform.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path '{0}' is not rooted (must start with '/')")]
    NotRooted(String),
    #[error("path '{0}' contains a backslash")]
    Backslash(String),
    #[error("path '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("path '{0}' contains a '.' or '..' segment")]
    DotSegment(String),
    #[error("path '{path}' escapes the root when resolved against '{base}'")]
    EscapesRoot { base: String, path: String },
    #[error("'{0}' is not below the input root")]
    OutsideRoot(PathBuf),
    #[error("'{0}' is not valid UTF-8")]
    NotUnicode(PathBuf),
}

/// A validated, rooted, forward-slash path relative to a site root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentPath(String);

impl ContentPath {
    /// The root path `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if !raw.starts_with('/') {
            return Err(PathError::NotRooted(raw.to_string()));
        }
        if raw.contains('\\') {
            return Err(PathError::Backslash(raw.to_string()));
        }
        if raw == "/" {
            return Ok(Self::root());
        }
        for segment in raw[1..].split('/') {
            match segment {
                "" => return Err(PathError::EmptySegment(raw.to_string())),
                "." | ".." => return Err(PathError::DotSegment(raw.to_string())),
                _ => {}
            }
        }
        Ok(Self(raw.to_string()))
    }

    /// Build the content path of `full` relative to the filesystem `root`.
    pub fn from_fs(root: &Path, full: &Path) -> Result<Self, PathError> {
        let relative = full
            .strip_prefix(root)
            .map_err(|_| PathError::OutsideRoot(full.to_path_buf()))?;
        let mut joined = String::new();
        for component in relative.components() {
            let segment = component
                .as_os_str()
                .to_str()
                .ok_or_else(|| PathError::NotUnicode(full.to_path_buf()))?;
            joined.push('/');
            joined.push_str(segment);
        }
        if joined.is_empty() {
            return Ok(Self::root());
        }
        Self::parse(&joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Number of segments below the root. The root itself has depth 0.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// The containing directory, or `None` for the root.
    pub fn parent(&self) -> Option<ContentPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// All proper ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> Vec<ContentPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(dir) = current {
            current = dir.parent();
            out.push(dir);
        }
        out
    }

    /// Last segment; empty for the root.
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Extension of the last segment without the dot. Dotfiles like
    /// `/.hidden` have no extension.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    /// Replace (or with `None`, remove) the extension of the last segment.
    pub fn with_extension(&self, extension: Option<&str>) -> ContentPath {
        let stem_end = match self.extension() {
            Some(ext) => self.0.len() - ext.len() - 1,
            None => self.0.len(),
        };
        let mut out = self.0[..stem_end].to_string();
        if let Some(ext) = extension {
            out.push('.');
            out.push_str(ext);
        }
        Self(out)
    }

    /// Resolve `reference` against this path treated as a directory.
    ///
    /// Rooted references replace the base entirely. Relative references may
    /// use `.` and `..` segments but may not climb above the root, and may
    /// not contain empty segments.
    pub fn join(&self, reference: &str) -> Result<ContentPath, PathError> {
        if reference.starts_with('/') {
            return Self::parse(reference);
        }
        if reference.contains('\\') {
            return Err(PathError::Backslash(reference.to_string()));
        }
        let mut segments: Vec<&str> = if self.is_root() {
            Vec::new()
        } else {
            self.0[1..].split('/').collect()
        };
        for segment in reference.split('/') {
            match segment {
                "" => return Err(PathError::EmptySegment(reference.to_string())),
                "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(PathError::EscapesRoot {
                            base: self.0.clone(),
                            path: reference.to_string(),
                        });
                    }
                }
                other => segments.push(other),
            }
        }
        if segments.is_empty() {
            return Ok(Self::root());
        }
        Ok(Self(format!("/{}", segments.join("/"))))
    }

    /// Resolve an output reference (a permalink or an enumeration output).
    /// A reference ending in `/` names a directory, and the file written is
    /// its `index.html`.
    pub fn join_output(&self, reference: &str) -> Result<ContentPath, PathError> {
        if reference.ends_with('/') {
            self.join(&format!("{reference}index.html"))
        } else {
            self.join(reference)
        }
    }

    /// The part of this path below `dir`, without a leading slash.
    /// `None` when this path is not strictly inside `dir`.
    pub fn strip_dir(&self, dir: &ContentPath) -> Option<&str> {
        if dir.is_root() {
            return (!self.is_root()).then(|| &self.0[1..]);
        }
        self.0
            .strip_prefix(dir.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
    }

    /// Map onto a filesystem location below `root`.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in self.0.split('/').filter(|s| !s.is_empty()) {
            out.push(segment);
        }
        out
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentPath> for String {
    fn from(value: ContentPath) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> ContentPath {
        ContentPath::parse(raw).unwrap()
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn parse_accepts_root_and_nested_paths() {
        assert!(p("/").is_root());
        assert_eq!(p("/posts/a.md").as_str(), "/posts/a.md");
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        assert!(matches!(
            ContentPath::parse("posts/a.md"),
            Err(PathError::NotRooted(_))
        ));
        assert!(matches!(
            ContentPath::parse("/posts\\a.md"),
            Err(PathError::Backslash(_))
        ));
        assert!(matches!(
            ContentPath::parse("/posts//a.md"),
            Err(PathError::EmptySegment(_))
        ));
        assert!(matches!(
            ContentPath::parse("/posts/"),
            Err(PathError::EmptySegment(_))
        ));
        assert!(matches!(
            ContentPath::parse("/posts/../a.md"),
            Err(PathError::DotSegment(_))
        ));
        assert!(matches!(
            ContentPath::parse("/./a.md"),
            Err(PathError::DotSegment(_))
        ));
    }

    #[test]
    fn comparison_is_case_sensitive() {
        assert_ne!(p("/A.html"), p("/a.html"));
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    #[test]
    fn parent_and_ancestors() {
        assert_eq!(p("/a/b/c.md").parent(), Some(p("/a/b")));
        assert_eq!(p("/a.md").parent(), Some(p("/")));
        assert_eq!(p("/").parent(), None);
        assert_eq!(p("/a/b/c.md").ancestors(), vec![p("/a/b"), p("/a"), p("/")]);
    }

    #[test]
    fn depth_counts_segments() {
        assert_eq!(p("/").depth(), 0);
        assert_eq!(p("/a").depth(), 1);
        assert_eq!(p("/a/b/c.md").depth(), 3);
    }

    #[test]
    fn extension_handling() {
        assert_eq!(p("/a/b.md").extension(), Some("md"));
        assert_eq!(p("/a/b").extension(), None);
        assert_eq!(p("/a/.hidden").extension(), None);
        assert_eq!(p("/a/b.md").with_extension(Some("html")), p("/a/b.html"));
        assert_eq!(p("/old.html.alias").with_extension(None), p("/old.html"));
        assert_eq!(p("/a/b").with_extension(Some("html")), p("/a/b.html"));
    }

    #[test]
    fn join_resolves_relative_references() {
        assert_eq!(p("/posts").join("a.html").unwrap(), p("/posts/a.html"));
        assert_eq!(p("/posts").join("./x/../a.html").unwrap(), p("/posts/a.html"));
        assert_eq!(p("/posts").join("../about.html").unwrap(), p("/about.html"));
        assert_eq!(p("/posts").join("/rooted.html").unwrap(), p("/rooted.html"));
        assert_eq!(p("/").join("a.html").unwrap(), p("/a.html"));
    }

    #[test]
    fn join_rejects_empty_segments() {
        assert!(matches!(p("/posts").join("blog/"), Err(PathError::EmptySegment(_))));
        assert!(matches!(p("/posts").join("a//b.html"), Err(PathError::EmptySegment(_))));
        assert!(matches!(p("/posts").join(""), Err(PathError::EmptySegment(_))));
    }

    #[test]
    fn output_reference_with_trailing_slash_is_an_index() {
        assert_eq!(p("/posts").join_output("blog/").unwrap(), p("/posts/blog/index.html"));
        assert_eq!(p("/posts").join_output("/blog/").unwrap(), p("/blog/index.html"));
        assert_eq!(p("/posts").join_output("/").unwrap(), p("/index.html"));
        assert_eq!(p("/posts").join_output("a.html").unwrap(), p("/posts/a.html"));
    }

    #[test]
    fn join_refuses_to_escape_root() {
        assert!(matches!(
            p("/posts").join("../../etc/passwd"),
            Err(PathError::EscapesRoot { .. })
        ));
    }

    #[test]
    fn strip_dir_yields_relative_remainder() {
        assert_eq!(p("/posts/a.md").strip_dir(&p("/posts")), Some("a.md"));
        assert_eq!(p("/posts/x/a.md").strip_dir(&p("/")), Some("posts/x/a.md"));
        assert_eq!(p("/postscript.md").strip_dir(&p("/posts")), None);
        assert_eq!(p("/posts").strip_dir(&p("/posts")), None);
    }

    #[test]
    fn fs_round_trip() {
        let root = Path::new("/srv/site");
        let full = root.join("posts").join("a.md");
        let path = ContentPath::from_fs(root, &full).unwrap();
        assert_eq!(path, p("/posts/a.md"));
        assert_eq!(path.to_fs_path(root), full);
        assert!(ContentPath::from_fs(root, Path::new("/elsewhere/a.md")).is_err());
    }
}
