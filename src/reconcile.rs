//! Output reconciliation.
//!
//! Brings the output root in line with the desired outputs of a run while
//! touching as little as possible:
//!
//! ```text
//! desired outputs ──┐
//!                   ├─▶ conflicts? ──▶ prepare ──▶ diff against disk
//! items ────────────┘     (fatal,                   │
//!                          no I/O)                  ├─ delete stray files
//!                                                   ├─ delete stale dirs (deepest first)
//!                                                   ├─ create missing dirs (root first)
//!                                                   └─ write files (byte-compare first)
//! ```
//!
//! Existing files are only rewritten when their bytes differ, so unchanged
//! outputs keep their modification times. Every file and directory the
//! reconciler looked at ends up in the [`ChangeReport`], sorted by path.

use crate::content::{ContentError, ContentItem, ItemFailures};
use crate::graph::prepare_all;
use crate::path::{ContentPath, PathError};
use crate::site::Site;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Two or more items claiming one output path. A file path that another
/// output needs as a directory is a conflict too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: ContentPath,
    /// Origins of the claiming items, sorted.
    pub origins: Vec<String>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is claimed by {}", self.path, self.origins.join(", "))
    }
}

fn conflicts_message(conflicts: &[Conflict]) -> String {
    let mut message = String::from("output path conflicts:");
    for conflict in conflicts {
        message.push_str("\n  - ");
        message.push_str(&conflict.to_string());
    }
    message
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{}", conflicts_message(.0))]
    Conflict(Vec<Conflict>),
    #[error(transparent)]
    Items(#[from] ItemFailures),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("output root '{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("task failed: {0}")]
    Task(String),
}

fn io_error(path: &Path) -> impl Fn(io::Error) -> ReconcileError + '_ {
    move |source| ReconcileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Added,
    Updated,
    Unchanged,
    Deleted,
}

impl Action {
    /// One-letter code used in the printed report.
    pub fn letter(self) -> char {
        match self {
            Action::Added => 'A',
            Action::Updated => 'U',
            Action::Unchanged => '-',
            Action::Deleted => 'D',
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeEntry {
    pub path: ContentPath,
    pub kind: EntryKind,
    pub action: Action,
    /// The item that wrote this file; `None` for directories and deletions.
    pub source: Option<Arc<ContentItem>>,
}

impl ChangeEntry {
    fn directory(path: ContentPath, action: Action) -> Self {
        Self {
            path,
            kind: EntryKind::Directory,
            action,
            source: None,
        }
    }

    fn deleted(path: ContentPath, kind: EntryKind) -> Self {
        Self {
            path,
            kind,
            action: Action::Deleted,
            source: None,
        }
    }

    pub fn is_change(&self) -> bool {
        self.action != Action::Unchanged
    }
}

/// Everything one reconciliation looked at, sorted by path.
#[derive(Debug, Clone, Default)]
pub struct ChangeReport {
    entries: Vec<ChangeEntry>,
}

impl ChangeReport {
    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn changes(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter().filter(|entry| entry.is_change())
    }

    /// Number of added, updated, and deleted entries.
    pub fn touched(&self) -> usize {
        self.changes().count()
    }

    /// First entry for `path`.
    pub fn get(&self, path: &str) -> Option<&ChangeEntry> {
        self.entries.iter().find(|entry| entry.path.as_str() == path)
    }

    pub fn count(&self, action: Action) -> usize {
        self.entries.iter().filter(|entry| entry.action == action).count()
    }
}

/// Map every output path to the one item producing it.
///
/// Fails listing every conflict before anything touches the disk.
pub fn desired_outputs(
    items: &[Arc<ContentItem>],
) -> Result<BTreeMap<ContentPath, Arc<ContentItem>>, ReconcileError> {
    let mut claims: BTreeMap<ContentPath, Vec<&Arc<ContentItem>>> = BTreeMap::new();
    for item in items {
        if let Some(path) = item.output_path() {
            claims.entry(path).or_default().push(item);
        }
    }

    let conflicts = find_conflicts(&claims);
    if !conflicts.is_empty() {
        return Err(ReconcileError::Conflict(conflicts));
    }

    Ok(claims
        .into_iter()
        .filter_map(|(path, mut owners)| owners.pop().map(|item| (path, Arc::clone(item))))
        .collect())
}

fn find_conflicts(claims: &BTreeMap<ContentPath, Vec<&Arc<ContentItem>>>) -> Vec<Conflict> {
    let origins_of = |owners: &[&Arc<ContentItem>]| -> Vec<String> {
        owners.iter().map(|item| item.origin().to_string()).collect()
    };
    let mut conflicts: BTreeMap<ContentPath, BTreeSet<String>> = BTreeMap::new();
    for (path, owners) in claims {
        if owners.len() > 1 {
            conflicts.entry(path.clone()).or_default().extend(origins_of(owners));
        }
        for dir in path.ancestors() {
            if let Some(files) = claims.get(&dir) {
                let entry = conflicts.entry(dir).or_default();
                entry.extend(origins_of(files));
                entry.extend(origins_of(owners));
            }
        }
    }
    conflicts
        .into_iter()
        .map(|(path, origins)| Conflict {
            path,
            origins: origins.into_iter().collect(),
        })
        .collect()
}

/// Prepare every producing item and bring the output root in line with
/// what they produce.
pub async fn reconcile(
    site: &Arc<Site>,
    items: &[Arc<ContentItem>],
) -> Result<ChangeReport, ReconcileError> {
    let desired = desired_outputs(items)?;
    let producing: Vec<Arc<ContentItem>> = desired.values().cloned().collect();
    prepare_all(site, &producing).await?;

    let root = site.paths().output_root.clone();
    let mut wanted_dirs: BTreeSet<ContentPath> = desired.keys().flat_map(|path| path.ancestors()).collect();
    wanted_dirs.insert(ContentPath::root());
    let wanted_files: BTreeSet<ContentPath> = desired.keys().cloned().collect();

    let disk = {
        let root = root.clone();
        tokio::task::spawn_blocking(move || DiskTree::read(&root))
            .await
            .map_err(|e| ReconcileError::Task(e.to_string()))??
    };
    let existing = disk.files.clone();

    let mut entries = {
        let root = root.clone();
        tokio::task::spawn_blocking(move || prepare_tree(&root, &disk, &wanted_dirs, &wanted_files))
            .await
            .map_err(|e| ReconcileError::Task(e.to_string()))??
    };
    entries.extend(write_files(&root, desired, &existing).await?);

    promote_ancestors(&mut entries);
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    let report = ChangeReport { entries };
    info!(
        added = report.count(Action::Added),
        updated = report.count(Action::Updated),
        deleted = report.count(Action::Deleted),
        unchanged = report.count(Action::Unchanged),
        "output reconciled"
    );
    Ok(report)
}

/// The output root as found at the start of a run.
#[derive(Debug, Default)]
struct DiskTree {
    dirs: BTreeSet<ContentPath>,
    files: BTreeSet<ContentPath>,
}

impl DiskTree {
    fn read(root: &Path) -> Result<Self, ReconcileError> {
        let mut tree = Self::default();
        match fs::symlink_metadata(root) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(tree),
            Err(e) => return Err(io_error(root)(e)),
            Ok(meta) if !meta.is_dir() => return Err(ReconcileError::NotADirectory(root.to_path_buf())),
            Ok(_) => {}
        }
        tree.dirs.insert(ContentPath::root());
        for entry in WalkDir::new(root).min_depth(1) {
            let entry = entry?;
            let path = ContentPath::from_fs(root, entry.path())?;
            if entry.file_type().is_dir() {
                tree.dirs.insert(path);
            } else {
                tree.files.insert(path);
            }
        }
        Ok(tree)
    }
}

/// Delete what is no longer wanted and create the directories that are.
fn prepare_tree(
    root: &Path,
    disk: &DiskTree,
    wanted_dirs: &BTreeSet<ContentPath>,
    wanted_files: &BTreeSet<ContentPath>,
) -> Result<Vec<ChangeEntry>, ReconcileError> {
    let mut entries = Vec::new();

    let mut stale_dirs: Vec<&ContentPath> = disk.dirs.difference(wanted_dirs).collect();
    stale_dirs.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));
    let stale_files = disk.files.difference(wanted_files);

    // Files first: a stale directory only holds stale files, and has lost
    // its stale subdirectories by the time it comes up.
    for file in stale_files {
        let full = file.to_fs_path(root);
        fs::remove_file(&full).map_err(io_error(&full))?;
        debug!(path = %file, "deleted file");
        entries.push(ChangeEntry::deleted(file.clone(), EntryKind::File));
    }
    for dir in stale_dirs {
        let full = dir.to_fs_path(root);
        fs::remove_dir(&full).map_err(io_error(&full))?;
        debug!(path = %dir, "deleted directory");
        entries.push(ChangeEntry::deleted(dir.clone(), EntryKind::Directory));
    }

    let mut dirs: Vec<&ContentPath> = wanted_dirs.iter().collect();
    dirs.sort_by(|a, b| a.depth().cmp(&b.depth()).then_with(|| a.cmp(b)));
    for dir in dirs {
        if disk.dirs.contains(dir) {
            entries.push(ChangeEntry::directory(dir.clone(), Action::Unchanged));
            continue;
        }
        let full = dir.to_fs_path(root);
        if dir.is_root() {
            fs::create_dir_all(&full)
        } else {
            fs::create_dir(&full)
        }
        .map_err(io_error(&full))?;
        entries.push(ChangeEntry::directory(dir.clone(), Action::Added));
    }
    Ok(entries)
}

/// Write every desired file concurrently. All failures are reported.
async fn write_files(
    root: &Path,
    desired: BTreeMap<ContentPath, Arc<ContentItem>>,
    existing: &BTreeSet<ContentPath>,
) -> Result<Vec<ChangeEntry>, ReconcileError> {
    let mut tasks = JoinSet::new();
    for (path, item) in desired {
        let full = path.to_fs_path(root);
        let existed = existing.contains(&path);
        tasks.spawn_blocking(move || {
            let action = write_output(&item, &path, &full, existed)?;
            debug!(path = %path, ?action, "wrote file");
            Ok::<_, ContentError>(ChangeEntry {
                path,
                kind: EntryKind::File,
                action,
                source: Some(item),
            })
        });
    }

    let mut entries = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(entry)) => entries.push(entry),
            Ok(Err(e)) => failures.push(e),
            Err(e) => failures.push(ContentError::Task(e.to_string())),
        }
    }
    ItemFailures::check(failures)?;
    Ok(entries)
}

fn write_output(
    item: &ContentItem,
    path: &ContentPath,
    full: &Path,
    existed: bool,
) -> Result<Action, ContentError> {
    let io_error = |source: io::Error| ContentError::Io {
        path: path.to_string(),
        source,
    };
    if !existed {
        let mut out = BufWriter::new(File::create(full).map_err(io_error)?);
        item.write_content(&mut out, path.as_str())?;
        out.flush().map_err(io_error)?;
        return Ok(Action::Added);
    }

    let mut rendered = Vec::new();
    item.write_content(&mut rendered, path.as_str())?;
    if same_contents(full, &rendered).map_err(io_error)? {
        return Ok(Action::Unchanged);
    }
    fs::write(full, &rendered).map_err(io_error)?;
    Ok(Action::Updated)
}

fn same_contents(full: &Path, rendered: &[u8]) -> io::Result<bool> {
    if fs::metadata(full)?.len() != rendered.len() as u64 {
        return Ok(false);
    }
    Ok(fs::read(full)? == rendered)
}

/// Directories with any change below them become `Updated` unless they
/// were added themselves.
fn promote_ancestors(entries: &mut [ChangeEntry]) {
    let changed: BTreeSet<ContentPath> = entries
        .iter()
        .filter(|entry| entry.is_change())
        .flat_map(|entry| entry.path.ancestors())
        .collect();
    for entry in entries.iter_mut() {
        if entry.kind == EntryKind::Directory
            && entry.action == Action::Unchanged
            && changed.contains(&entry.path)
        {
            entry.action = Action::Updated;
        }
    }
}
