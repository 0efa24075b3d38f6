//! # Kiln
//!
//! The build engine of a static site generator. A tree of markdown pages,
//! templates, and assets becomes an output directory, and each run touches
//! only the output files whose bytes changed.
//!
//! # Architecture: Expand, Then Reconcile
//!
//! ```text
//! 1. Scan        input root  →  classified sources     (walk + classification)
//! 2. Expand      sources     →  content graph          (waves until fixed point)
//! 3. Reconcile   graph       →  output root            (diff + minimal writes)
//! ```
//!
//! Every unit of output is a [`ContentItem`] with a three-stage lifecycle:
//! initialize (output path and front matter), prepare (render and apply
//! layouts), and write (repeatable). Each stage runs once per item no matter
//! how many tasks await it, and a failed stage stays failed.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`path`] | Rooted, validated content paths |
//! | [`glob`] | Rooted and relative glob matching over content paths |
//! | [`config`] | `site.toml` loading, validation, and the stock config |
//! | [`frontmatter`] | YAML/TOML front matter and the pattern → schema table |
//! | [`template`] | The template language: parser, async renderer, compile-once store |
//! | [`cache`] | Compiled-template artifacts under the cache root |
//! | [`blurb`] | Excerpt extraction from rendered HTML |
//! | [`layout`] | Layout resolution per directory and layout composition |
//! | [`content`] | Content items, origins, and the markdown/template/asset/alias renderers |
//! | [`scan`] | Input walk and source classification |
//! | [`site`] | The run context every renderer hook sees |
//! | [`graph`] | The content graph and its fixed-point expansion |
//! | [`reconcile`] | Output reconciliation and the change report |
//! | [`output`] | CLI formatting of reports |
//! | [`project`] | Load → expand → reconcile entry points |
//!
//! # Design Decisions
//!
//! ## Byte-Compare Before Write
//!
//! An existing output file is rendered into memory and compared (length,
//! then bytes) before it is overwritten. Unchanged files keep their
//! modification time, and the change report lists exactly what moved.
//!
//! ## Interpreted Templates, Cached on Disk
//!
//! Templates compile to a serialisable AST stored under the cache root,
//! keyed by a SHA-256 of the source and the compiler version. No code is
//! generated at run time.
//!
//! ## Explicit Front-Matter Schemas
//!
//! Which schema applies to which document is a table in `site.toml`
//! (`[[front_matter]]` with include/exclude globs). At most one schema may
//! match a path.
//!
//! ## Parents Are Weak
//!
//! Enumerated items point back at the item that produced them through a
//! weak reference. The graph owns every item; nothing points downward.

pub mod blurb;
pub mod cache;
pub mod config;
pub mod content;
pub mod frontmatter;
pub mod glob;
pub mod graph;
pub mod layout;
pub mod output;
pub mod path;
pub mod project;
pub mod reconcile;
pub mod scan;
pub mod site;
pub mod template;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use content::{ContentError, ContentItem, Origin};
pub use graph::{ContentGraph, Expansion};
pub use path::ContentPath;
pub use project::{BuildError, Project, build};
pub use reconcile::{Action, ChangeEntry, ChangeReport, EntryKind};
