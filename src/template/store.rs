use super::{Template, TemplateError};
use crate::cache::{CacheStats, TemplateCache, hash_bytes};
use crate::path::ContentPath;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

type Slot = Arc<OnceLock<Result<Arc<Template>, TemplateError>>>;

/// Compile-once store of templates for one run.
///
/// Each template is compiled (or loaded from the on-disk cache) at most
/// once. Concurrent requests for the same path wait on the same slot and
/// share its outcome, including a compile error.
///
/// [`get`](Self::get) reads and compiles on the calling thread and is meant
/// for the rayon precompile pass. Render paths running on the async runtime
/// use [`fetch`](Self::fetch), which moves a cold load onto the blocking pool.
#[derive(Debug)]
pub struct TemplateStore {
    input_root: PathBuf,
    cache: Arc<TemplateCache>,
    compiled: Mutex<HashMap<ContentPath, Slot>>,
}

impl TemplateStore {
    pub fn new(input_root: impl Into<PathBuf>, cache: TemplateCache) -> Self {
        Self {
            input_root: input_root.into(),
            cache: Arc::new(cache),
            compiled: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &ContentPath) -> Result<Arc<Template>, TemplateError> {
        let full = path.to_fs_path(&self.input_root);
        self.slot(path)
            .get_or_init(|| load(&self.cache, &full, path))
            .clone()
    }

    /// Like [`get`](Self::get), without blocking a runtime worker when the
    /// template has not been loaded yet.
    pub async fn fetch(&self, path: &ContentPath) -> Result<Arc<Template>, TemplateError> {
        let slot = self.slot(path);
        if let Some(done) = slot.get() {
            return done.clone();
        }
        let full = path.to_fs_path(&self.input_root);
        let cache = Arc::clone(&self.cache);
        let owned = path.clone();
        tokio::task::spawn_blocking(move || slot.get_or_init(|| load(&cache, &full, &owned)).clone())
            .await
            .map_err(|e| TemplateError::Io {
                path: path.to_string(),
                message: e.to_string(),
            })?
    }

    fn slot(&self, path: &ContentPath) -> Slot {
        let mut compiled = self.compiled.lock();
        Arc::clone(compiled.entry(path.clone()).or_default())
    }

    /// Compile every listed template up front on the rayon pool. Returns all
    /// failures, not just the first.
    pub fn precompile(&self, paths: &[ContentPath]) -> Result<(), Vec<TemplateError>> {
        let errors: Vec<TemplateError> = paths
            .par_iter()
            .filter_map(|path| self.get(path).err())
            .collect();
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

}

fn load(cache: &TemplateCache, full: &Path, path: &ContentPath) -> Result<Arc<Template>, TemplateError> {
    let source = fs::read_to_string(full).map_err(|e| TemplateError::Io {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    let hash = hash_bytes(source.as_bytes());
    if let Some(template) = cache.load(full, path, &hash) {
        debug!(template = %path, "template loaded from cache");
        return Ok(Arc::new(template));
    }
    let template = Template::compile(&source).map_err(|e| e.at(path.as_str()))?;
    debug!(template = %path, "template compiled");
    cache.store_or_warn(path, &hash, &template);
    Ok(Arc::new(template))
}
