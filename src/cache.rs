//! Compiled-template cache for incremental builds.
//!
//! Parsing a template is cheap compared to a full build, but sites with
//! many layouts, partials, and enumerating pages recompile the same sources
//! on every run. This module persists each compiled [`Template`] so a run
//! can skip parsing sources that have not changed.
//!
//! # Design
//!
//! One artifact per template, mirrored under the cache root:
//!
//! ```text
//! <input>/posts/_layout.tpl  →  <cache>/templates/posts/_layout.tpl.json
//! ```
//!
//! Each artifact records:
//!
//! - **`compiler`**: crate version plus [`ARTIFACT_VERSION`]. Any upgrade
//!   that could change the AST invalidates every artifact.
//! - **`source_hash`**: SHA-256 of the template source. Content-based so a
//!   touched-but-identical file costs a hash, not a reparse.
//! - **`template`**: the compiled template itself.
//!
//! An artifact is used only when all of these hold:
//! 1. it can be read and decoded
//! 2. its compiler id and source hash match
//! 3. its modification time is not older than the source's
//!
//! Anything else (missing file, corrupt JSON, unreadable metadata) means
//! "stale": the template is recompiled and the artifact rewritten. Cache
//! I/O never fails a build.

use crate::path::ContentPath;
use crate::template::Template;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory under the cache root holding template artifacts.
pub const CACHE_SUBDIR: &str = "templates";

/// Version of the artifact format. Bump this to invalidate all existing
/// artifacts when the format or AST changes.
pub const ARTIFACT_VERSION: u32 = 1;

/// Identifier of the compiler that wrote an artifact.
pub fn compiler_id() -> String {
    format!("{}+{}", env!("CARGO_PKG_VERSION"), ARTIFACT_VERSION)
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Artifact {
    compiler: String,
    source_hash: String,
    template: Template,
}

/// On-disk store of compiled templates.
#[derive(Debug)]
pub struct TemplateCache {
    dir: Option<PathBuf>,
    stats: Mutex<CacheStats>,
}

impl TemplateCache {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            dir: Some(cache_root.join(CACHE_SUBDIR)),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// A cache that never hits and never writes.
    pub fn disabled() -> Self {
        Self {
            dir: None,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn artifact_path(&self, path: &ContentPath) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let mut artifact = path.to_fs_path(dir).into_os_string();
        artifact.push(".json");
        Some(PathBuf::from(artifact))
    }

    /// Return the cached template if its artifact is up to date.
    ///
    /// Records a hit or a miss in the run statistics.
    pub fn load(&self, source: &Path, path: &ContentPath, source_hash: &str) -> Option<Template> {
        let found = self.load_fresh(source, path, source_hash);
        self.stats.lock().record(found.is_some());
        found
    }

    fn load_fresh(&self, source: &Path, path: &ContentPath, source_hash: &str) -> Option<Template> {
        let artifact_path = self.artifact_path(path)?;
        if !is_up_to_date(source, &artifact_path) {
            return None;
        }
        let bytes = fs::read(&artifact_path).ok()?;
        let artifact: Artifact = match serde_json::from_slice(&bytes) {
            Ok(artifact) => artifact,
            Err(e) => {
                debug!(artifact = %artifact_path.display(), error = %e, "discarding unreadable template artifact");
                return None;
            }
        };
        if artifact.compiler != compiler_id() || artifact.source_hash != source_hash {
            return None;
        }
        Some(artifact.template)
    }

    /// Write an artifact for a freshly compiled template.
    pub fn store(&self, path: &ContentPath, source_hash: &str, template: &Template) -> io::Result<()> {
        let Some(artifact_path) = self.artifact_path(path) else {
            return Ok(());
        };
        if let Some(parent) = artifact_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let artifact = Artifact {
            compiler: compiler_id(),
            source_hash: source_hash.to_string(),
            template: template.clone(),
        };
        let json = serde_json::to_vec(&artifact)?;
        fs::write(&artifact_path, json)
    }

    /// Like [`store`](Self::store), but a failure is only logged.
    pub fn store_or_warn(&self, path: &ContentPath, source_hash: &str, template: &Template) {
        if let Err(e) = self.store(path, source_hash, template) {
            warn!(template = %path, error = %e, "could not write template artifact");
        }
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }
}

/// True when `artifact` exists and is at least as new as `source`.
/// Any metadata error counts as out of date.
pub fn is_up_to_date(source: &Path, artifact: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified());
    match (modified(source), modified(artifact)) {
        (Ok(source_time), Ok(artifact_time)) => artifact_time >= source_time,
        _ => false,
    }
}

/// SHA-256 of a byte slice, returned as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Artifact hits and misses over one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hits {
            0 => write!(f, "{} compiled", self.misses),
            hits => write!(f, "{hits} reused, {} compiled", self.misses),
        }
    }
}
