//! Input scanning and source classification.
//!
//! Walks the input root in file-name order and classifies every file by
//! its name:
//!
//! ```text
//! site/                         # Input root
//! ├── site.toml                 # Site configuration (consumed up front)
//! ├── _layout.tpl               # Layout for the whole site
//! ├── _nav.tpl                  # Partial, pulled in with {% include %}
//! ├── index.md                  # Markdown page      → /index.html
//! ├── tags.tpl                  # Template page      → enumerated instances
//! ├── old-home.html.alias       # Alias              → /old-home.html
//! ├── posts/
//! │   ├── _layout{drafts%2F**}.tpl
//! │   └── hello.md
//! ├── img/logo.png              # Asset              → /img/logo.png
//! ├── .git/                     # Hidden: skipped
//! └── .out/                     # Output root: skipped
//! ```
//!
//! Names starting with `.` are skipped, as are the configured output and
//! cache directories. Names starting with `_` are never content: they are
//! layouts, partials, or files only reachable through `{% include %}`.

use crate::config::CONFIG_FILENAME;
use crate::layout;
use crate::path::{ContentPath, PathError};
use crate::site::SitePaths;
use std::path::PathBuf;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("input root '{0}' is not a directory")]
    NotADirectory(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    SiteConfig,
    Layout,
    /// `_`-prefixed file that is not a layout.
    Partial,
    Markdown,
    Template,
    Alias,
    Asset,
}

impl SourceKind {
    /// Whether files of this kind become content items.
    pub fn is_content(self) -> bool {
        matches!(
            self,
            SourceKind::Markdown | SourceKind::Template | SourceKind::Alias | SourceKind::Asset
        )
    }
}

/// One classified input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub full_path: PathBuf,
    pub content_path: ContentPath,
    pub kind: SourceKind,
}

impl SourceFile {
    /// Whether this file is compiled with the template language.
    pub fn is_template(&self) -> bool {
        self.content_path.extension() == Some(layout::LAYOUT_EXTENSION)
            && matches!(
                self.kind,
                SourceKind::Layout | SourceKind::Partial | SourceKind::Template
            )
    }
}

pub fn classify(path: &ContentPath) -> SourceKind {
    let name = path.file_name();
    if path.parent().is_some_and(|dir| dir.is_root()) && name == CONFIG_FILENAME {
        return SourceKind::SiteConfig;
    }
    if layout::is_layout_name(name) {
        return SourceKind::Layout;
    }
    if name.starts_with('_') {
        return SourceKind::Partial;
    }
    match path.extension() {
        Some("md") => SourceKind::Markdown,
        Some(layout::LAYOUT_EXTENSION) => SourceKind::Template,
        Some("alias") => SourceKind::Alias,
        _ => SourceKind::Asset,
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Every file below the input root, classified, in walk order.
pub fn scan(paths: &SitePaths) -> Result<Vec<SourceFile>, ScanError> {
    let root = &paths.input_root;
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.clone()));
    }
    let skipped = [paths.output_root.as_path(), paths.cache_root.as_path()];
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry) && !skipped.contains(&entry.path()));

    let mut sources = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !is_file(&entry) {
            continue;
        }
        let content_path = ContentPath::from_fs(root, entry.path())?;
        sources.push(SourceFile {
            full_path: entry.path().to_path_buf(),
            kind: classify(&content_path),
            content_path,
        });
    }
    Ok(sources)
}

/// Regular files, and symlinks that resolve to one.
fn is_file(entry: &DirEntry) -> bool {
    entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file())
}
