//! The content graph and its fixed-point expansion.
//!
//! Scanning produces the generation-0 items. Some of them enumerate: once
//! initialized they yield payloads, and every payload becomes a new item
//! one generation deeper. Expansion runs in waves until a wave produces
//! nothing new:
//!
//! ```text
//! wave 1   a.md  b.md  about.tpl │ tags.tpl (enumerator)
//!          ── initialize ──────▶ │ ── initialize ──▶ enumerate
//!                                                        │
//! wave 2   tags.tpl[rust]  tags.tpl[web]  ◀──────────────┘
//!          ── initialize ──▶ (nothing enumerates) ──▶ fixed point
//! ```
//!
//! Within a wave, ordinary items are initialized (concurrently) before
//! enumerators, so page selections made while enumerating see every page
//! of the wave. A wave never starts before the previous one has finished
//! initializing.

use crate::content::{ContentError, ContentItem, ItemFailures, ItemKind};
use crate::glob::PathGlob;
use crate::path::ContentPath;
use crate::site::Site;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Every item of a run, in admission order.
#[derive(Debug, Default)]
pub struct ContentGraph {
    items: RwLock<Vec<Arc<ContentItem>>>,
}

/// What an expansion did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expansion {
    pub waves: usize,
    pub items: usize,
    pub max_generation: u32,
}

impl ContentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<Arc<ContentItem>> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// The input item scanned from `path`. Enumerated instances share their
    /// template's path and are never returned.
    pub fn find_by_source(&self, path: &ContentPath) -> Option<Arc<ContentItem>> {
        self.items
            .read()
            .iter()
            .find(|item| item.origin().is_input() && item.content_path() == path)
            .cloned()
    }

    pub fn find_by_output(&self, path: &ContentPath) -> Option<Arc<ContentItem>> {
        self.items
            .read()
            .iter()
            .find(|item| item.output_path().as_ref() == Some(path))
            .cloned()
    }

    /// Input pages (markdown and templates) with an output path whose
    /// content path matches `glob`, ordered by content path.
    pub fn pages_matching(&self, glob: &PathGlob) -> Vec<Arc<ContentItem>> {
        let mut pages: Vec<Arc<ContentItem>> = self
            .items
            .read()
            .iter()
            .filter(|item| item.origin().is_input())
            .filter(|item| matches!(item.kind(), ItemKind::Markdown | ItemKind::Template))
            .filter(|item| item.output_path().is_some())
            .filter(|item| glob.is_match(item.content_path().as_str()))
            .cloned()
            .collect();
        pages.sort_by(|a, b| a.content_path().cmp(b.content_path()));
        pages
    }

    pub(crate) fn admit(&self, items: &[Arc<ContentItem>]) {
        self.items.write().extend(items.iter().cloned());
    }

    /// Initialize `initial` and everything it enumerates into, until no
    /// item produces more.
    pub async fn expand(
        &self,
        site: &Arc<Site>,
        initial: Vec<ContentItem>,
    ) -> Result<Expansion, ItemFailures> {
        let mut stats = Expansion::default();
        let mut wave: Vec<Arc<ContentItem>> = initial.into_iter().map(Arc::new).collect();

        while !wave.is_empty() {
            stats.waves += 1;
            let (enumerators, ordinary): (Vec<_>, Vec<_>) =
                wave.into_iter().partition(|item| item.is_enumerator());

            initialize_all(site, &ordinary).await?;
            self.admit(&ordinary);
            initialize_all(site, &enumerators).await?;
            self.admit(&enumerators);

            let mut next = Vec::new();
            for enumerator in &enumerators {
                for payload in enumerator.enumerate(site)? {
                    next.push(Arc::new(enumerator.create_instance(payload)?));
                }
            }

            stats.items += ordinary.len() + enumerators.len();
            if let Some(deepest) = ordinary.iter().chain(&enumerators).map(|i| i.generation()).max() {
                stats.max_generation = stats.max_generation.max(deepest);
            }
            debug!(
                wave = stats.waves,
                ordinary = ordinary.len(),
                enumerators = enumerators.len(),
                instances = next.len(),
                "wave initialized"
            );
            wave = next;
        }

        info!(
            items = stats.items,
            waves = stats.waves,
            max_generation = stats.max_generation,
            "content expanded"
        );
        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Initialize,
    Prepare,
}

/// Initialize every item concurrently; all failures are reported.
pub async fn initialize_all(site: &Arc<Site>, items: &[Arc<ContentItem>]) -> Result<(), ItemFailures> {
    run_stage(site, items, Stage::Initialize).await
}

/// Prepare every item concurrently; all failures are reported.
pub async fn prepare_all(site: &Arc<Site>, items: &[Arc<ContentItem>]) -> Result<(), ItemFailures> {
    run_stage(site, items, Stage::Prepare).await
}

async fn run_stage(
    site: &Arc<Site>,
    items: &[Arc<ContentItem>],
    stage: Stage,
) -> Result<(), ItemFailures> {
    let mut tasks = JoinSet::new();
    for item in items {
        let site = Arc::clone(site);
        let item = Arc::clone(item);
        tasks.spawn(async move {
            match stage {
                Stage::Initialize => item.initialize(&site).await,
                Stage::Prepare => item.prepare_content(&site).await,
            }
        });
    }
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failures.push(e),
            Err(e) => failures.push(ContentError::Task(e.to_string())),
        }
    }
    ItemFailures::check(failures)
}
