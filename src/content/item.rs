use super::origin::{Origin, OriginError};
use super::renderer::{Identity, ItemKind, Prepared, RenderedBody, Renderer};
use crate::blurb;
use crate::frontmatter::{FrontMatter, FrontMatterError};
use crate::layout::{self, LayoutError};
use crate::path::{ContentPath, PathError};
use crate::site::Site;
use crate::template::TemplateError;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// The two memoised stages of an item's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initialize,
    Prepare,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Initialize => "initialize",
            Stage::Prepare => "prepare",
        })
    }
}

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("{origin}: {message}")]
    InvalidState { origin: String, message: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{origin}: {stage} failed: {source}")]
    Faulted {
        origin: String,
        stage: Stage,
        #[source]
        source: Arc<ContentError>,
    },
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("{path}: {source}")]
    FrontMatter {
        path: String,
        #[source]
        source: FrontMatterError,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {message}")]
    Render { path: String, message: String },
    #[error("task failed: {0}")]
    Task(String),
}

impl ContentError {
    /// The recorded fault behind a `Faulted` error, if this is one.
    pub fn fault(&self) -> Option<&Arc<ContentError>> {
        match self {
            ContentError::Faulted { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failures collected from one concurrent phase, sorted by message.
#[derive(Debug)]
pub struct ItemFailures(Vec<ContentError>);

impl ItemFailures {
    /// `Ok` when nothing failed.
    pub fn check(mut failures: Vec<ContentError>) -> Result<(), ItemFailures> {
        if failures.is_empty() {
            return Ok(());
        }
        failures.sort_by_cached_key(|e| e.to_string());
        Err(ItemFailures(failures))
    }

    pub fn errors(&self) -> &[ContentError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<ContentError> for ItemFailures {
    fn from(error: ContentError) -> Self {
        ItemFailures(vec![error])
    }
}

impl fmt::Display for ItemFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [only] => only.fmt(f),
            all => {
                write!(f, "{} items failed:", all.len())?;
                for error in all {
                    write!(f, "\n  - {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ItemFailures {}

/// Observable lifecycle state.
///
/// ```text
/// Uninitialized ─▶ Initializing ─▶ Initialized ─▶ Preparing ─▶ Prepared
///                       │                             │
///                       └──────────▶ Faulted ◀────────┘
/// ```
///
/// Writing is not a state: once prepared, an item may be serialized any
/// number of times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
    Preparing,
    Prepared,
    Faulted,
}

#[derive(Debug, Default)]
struct Slots {
    state: Lifecycle,
    output_path: Option<ContentPath>,
    front_matter: Option<Arc<FrontMatter>>,
}

type Outcome<T> = Result<T, Arc<ContentError>>;

/// One unit of produced output.
///
/// Each stage is a single-assignment cell: the first caller runs the
/// renderer hook, every other caller (concurrent or later) awaits and
/// shares that outcome. A failure is recorded and handed back to every
/// caller as [`ContentError::Faulted`] wrapping the same `Arc`; nothing is
/// retried.
///
/// Prepare has two parts. The generated body is memoised on its own so
/// blurbs can be read without waiting for layouts; layout composition then
/// completes the prepared content.
pub struct ContentItem {
    origin: Origin,
    renderer: Box<dyn Renderer>,
    slots: Mutex<Slots>,
    initialized: OnceCell<Outcome<()>>,
    generated: OnceCell<Outcome<Arc<RenderedBody>>>,
    prepared: OnceCell<Outcome<Prepared>>,
    blurb: OnceLock<Option<String>>,
}

impl fmt::Debug for ContentItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("ContentItem")
            .field("origin", &self.origin.to_string())
            .field("kind", &self.renderer.kind())
            .field("state", &slots.state)
            .field("output_path", &slots.output_path)
            .finish()
    }
}

impl ContentItem {
    pub fn new(origin: Origin, renderer: impl Renderer + 'static) -> Self {
        Self {
            origin,
            renderer: Box::new(renderer),
            slots: Mutex::new(Slots::default()),
            initialized: OnceCell::new(),
            generated: OnceCell::new(),
            prepared: OnceCell::new(),
            blurb: OnceLock::new(),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn content_path(&self) -> &ContentPath {
        self.origin.content_path()
    }

    pub fn generation(&self) -> u32 {
        self.origin.generation()
    }

    pub fn kind(&self) -> ItemKind {
        self.renderer.kind()
    }

    pub fn state(&self) -> Lifecycle {
        self.slots.lock().state
    }

    pub fn is_enumerator(&self) -> bool {
        self.renderer.enumerates()
    }

    pub fn output_path(&self) -> Option<ContentPath> {
        self.slots.lock().output_path.clone()
    }

    pub fn title(&self) -> Option<String> {
        self.renderer.title()
    }

    /// Front matter decided during initialization.
    pub fn front_matter(&self) -> Result<Option<Arc<FrontMatter>>, ContentError> {
        self.require_initialized("read front matter")?;
        Ok(self.slots.lock().front_matter.clone())
    }

    /// Only allowed while the item is initializing. The root is a
    /// directory and can never be an output path.
    pub fn set_output_path(&self, path: Option<ContentPath>) -> Result<(), ContentError> {
        if path.as_ref().is_some_and(ContentPath::is_root) {
            return Err(ContentError::InvalidArgument(format!(
                "{}: '/' is not a valid output path",
                self.origin
            )));
        }
        let mut slots = self.slots.lock();
        self.require_initializing(&slots, "set the output path")?;
        slots.output_path = path;
        Ok(())
    }

    /// Only allowed while the item is initializing.
    pub fn set_front_matter(&self, front_matter: Option<FrontMatter>) -> Result<(), ContentError> {
        let mut slots = self.slots.lock();
        self.require_initializing(&slots, "set front matter")?;
        slots.front_matter = front_matter.map(Arc::new);
        Ok(())
    }

    // =========================================================================
    // Stages
    // =========================================================================

    /// Run the renderer's initialize hook once.
    pub async fn initialize(&self, site: &Site) -> Result<(), ContentError> {
        let outcome = self
            .initialized
            .get_or_init(|| async {
                self.transition(Lifecycle::Initializing);
                let result = match self.renderer.initialize(self, site).await {
                    Ok(identity) => self.apply_identity(identity),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => {
                        self.transition(Lifecycle::Initialized);
                        debug!(item = %self.origin, output = ?self.output_path(), "initialized");
                        Ok(())
                    }
                    Err(e) => {
                        self.transition(Lifecycle::Faulted);
                        Err(Arc::new(e))
                    }
                }
            })
            .await;
        self.outcome(outcome, Stage::Initialize).map(|_| ())
    }

    /// Generate the body and wrap it in layouts, once.
    pub async fn prepare_content(&self, site: &Site) -> Result<(), ContentError> {
        self.require_initialized("prepare content")?;
        let outcome = self
            .prepared
            .get_or_init(|| async {
                self.transition(Lifecycle::Preparing);
                match self.compose(site).await {
                    Ok(prepared) => {
                        self.transition(Lifecycle::Prepared);
                        Ok(prepared)
                    }
                    Err(e) => {
                        self.transition(Lifecycle::Faulted);
                        Err(e)
                    }
                }
            })
            .await;
        self.outcome(outcome, Stage::Prepare).map(|_| ())
    }

    /// Serialize the prepared content. Safe to repeat.
    pub fn write_content(&self, out: &mut dyn Write, output_path: &str) -> Result<(), ContentError> {
        if output_path.trim().is_empty() {
            return Err(ContentError::InvalidArgument(format!(
                "{}: output path must not be blank",
                self.origin
            )));
        }
        let prepared = self.outcome_now(&self.prepared, Stage::Prepare, "write content")?;
        self.renderer.serialize(prepared, out, output_path)
    }

    /// Final HTML of a prepared HTML item.
    pub fn html(&self) -> Result<Option<&str>, ContentError> {
        let prepared = self.outcome_now(&self.prepared, Stage::Prepare, "read html")?;
        Ok(prepared.html())
    }

    /// Excerpt of the item's pre-layout HTML. Waits only for the generated
    /// body, never for layouts.
    pub async fn blurb(&self, site: &Site) -> Result<Option<String>, ContentError> {
        self.require_initialized("extract a blurb")?;
        let body = self
            .generated_body(site)
            .await
            .map_err(|source| self.faulted(Stage::Prepare, source))?;
        let blurb = self.blurb.get_or_init(|| match body.as_ref() {
            RenderedBody::Html(fragment) => blurb::extract(&fragment.html),
            _ => None,
        });
        Ok(blurb.clone())
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// Payloads for this item's instances; empty for ordinary items.
    pub fn enumerate(
        &self,
        site: &Site,
    ) -> Result<Box<dyn Iterator<Item = Value> + Send>, ContentError> {
        self.require_initialized("enumerate")?;
        if !self.is_enumerator() {
            return Ok(Box::new(std::iter::empty()));
        }
        self.renderer.enumerate(self, site)
    }

    /// Build the instance for one payload. The new item starts
    /// uninitialized, one generation below this one.
    pub fn create_instance(self: &Arc<Self>, payload: Value) -> Result<ContentItem, ContentError> {
        self.require_initialized("create an instance")?;
        let instance = self.renderer.instantiate(self, payload)?;
        debug_assert_eq!(instance.generation(), self.generation() + 1);
        Ok(instance)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn transition(&self, state: Lifecycle) {
        self.slots.lock().state = state;
    }

    fn apply_identity(&self, identity: Identity) -> Result<(), ContentError> {
        self.set_output_path(identity.output_path)?;
        self.set_front_matter(identity.front_matter)
    }

    fn require_initializing(&self, slots: &Slots, action: &str) -> Result<(), ContentError> {
        if slots.state == Lifecycle::Initializing {
            Ok(())
        } else {
            Err(ContentError::InvalidState {
                origin: self.origin.to_string(),
                message: format!("cannot {action} while {:?}", slots.state),
            })
        }
    }

    fn require_initialized(&self, action: &str) -> Result<(), ContentError> {
        self.outcome_now(&self.initialized, Stage::Initialize, action)
            .map(|_| ())
    }

    /// The completed outcome of a stage, without waiting.
    fn outcome_now<'a, T>(
        &self,
        cell: &'a OnceCell<Outcome<T>>,
        stage: Stage,
        action: &str,
    ) -> Result<&'a T, ContentError> {
        match cell.get() {
            Some(outcome) => self.outcome(outcome, stage),
            None => Err(ContentError::InvalidState {
                origin: self.origin.to_string(),
                message: format!("cannot {action} before {stage} has completed"),
            }),
        }
    }

    fn outcome<'a, T>(&self, outcome: &'a Outcome<T>, stage: Stage) -> Result<&'a T, ContentError> {
        outcome
            .as_ref()
            .map_err(|source| self.faulted(stage, Arc::clone(source)))
    }

    fn faulted(&self, stage: Stage, source: Arc<ContentError>) -> ContentError {
        ContentError::Faulted {
            origin: self.origin.to_string(),
            stage,
            source,
        }
    }

    async fn generated_body(&self, site: &Site) -> Outcome<Arc<RenderedBody>> {
        self.generated
            .get_or_init(|| async {
                match self.renderer.generate(self, site).await {
                    Ok(body) => Ok(Arc::new(body)),
                    Err(e) => {
                        self.transition(Lifecycle::Faulted);
                        Err(Arc::new(e))
                    }
                }
            })
            .await
            .clone()
    }

    async fn compose(&self, site: &Site) -> Outcome<Prepared> {
        let body = self.generated_body(site).await?;
        let laid_out = match body.as_ref() {
            RenderedBody::Html(fragment) if self.wants_layout() => {
                layout::apply(site, self, fragment).await.map_err(Arc::new)?
            }
            _ => None,
        };
        Ok(Prepared::new(body, laid_out))
    }

    fn wants_layout(&self) -> bool {
        let slots = self.slots.lock();
        self.renderer.wants_layout()
            && slots.output_path.is_some()
            && slots
                .front_matter
                .as_ref()
                .is_none_or(|front_matter| front_matter.layout_enabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::renderer::Fragment;
    use crate::content::{Alias, Asset, InputFile};
    use crate::test_helpers::{
        TestRenderer, item_with, markdown_item, path, static_item, template_item, test_site,
        write_file,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// One fresh item of every renderer kind, with its source written.
    fn one_of_each_kind(root: &Path) -> Vec<ContentItem> {
        write_file(root, "a.md", "# A");
        write_file(root, "img/logo.svg", "<svg/>");
        write_file(root, "old.html.alias", "source: /a.html\n");
        let input = |raw: &str| Origin::Input(InputFile::new(root, path(raw)));
        vec![
            static_item("/s.md", Some("/s.html"), "x"),
            markdown_item(root, "/a.md"),
            template_item(root, "/t.tpl", "<p>t</p>"),
            ContentItem::new(input("/img/logo.svg"), Asset),
            ContentItem::new(input("/old.html.alias"), Alias::default()),
        ]
    }

    fn write_to_string(item: &ContentItem, output: &str) -> String {
        let mut out = Vec::new();
        item.write_content(&mut out, output).unwrap();
        String::from_utf8(out).unwrap()
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    #[tokio::test]
    async fn prepare_before_initialize_is_invalid_state() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        for item in one_of_each_kind(tmp.path()) {
            let err = item.prepare_content(&site).await.unwrap_err();
            assert!(matches!(err, ContentError::InvalidState { .. }), "{:?}: {err}", item.kind());
            assert_eq!(item.state(), Lifecycle::Uninitialized);
        }
    }

    #[tokio::test]
    async fn write_before_prepare_is_invalid_state() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        for item in one_of_each_kind(tmp.path()) {
            let kind = item.kind();
            let err = item.write_content(&mut Vec::new(), "/out.html").unwrap_err();
            assert!(matches!(err, ContentError::InvalidState { .. }), "{kind:?}: {err}");

            item.initialize(&site).await.unwrap();
            let err = item.write_content(&mut Vec::new(), "/out.html").unwrap_err();
            assert!(matches!(err, ContentError::InvalidState { .. }), "{kind:?}: {err}");
        }
    }

    #[tokio::test]
    async fn blank_output_path_is_invalid_argument() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let item = static_item("/a.md", Some("/a.html"), "x");
        item.initialize(&site).await.unwrap();
        item.prepare_content(&site).await.unwrap();
        let err = item.write_content(&mut Vec::new(), "  ").unwrap_err();
        assert!(matches!(err, ContentError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn setters_only_work_while_initializing() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let item = static_item("/a.md", Some("/a.html"), "x");
        assert!(matches!(
            item.set_output_path(Some(path("/b.html"))),
            Err(ContentError::InvalidState { .. })
        ));
        item.initialize(&site).await.unwrap();
        assert!(matches!(
            item.set_front_matter(None),
            Err(ContentError::InvalidState { .. })
        ));
        assert_eq!(item.output_path(), Some(path("/a.html")));
    }

    #[tokio::test]
    async fn root_is_not_an_output_path() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let item = static_item("/a.md", Some("/"), "x");
        let err = item.initialize(&site).await.unwrap_err();
        let fault = err.fault().unwrap();
        assert!(matches!(fault.as_ref(), ContentError::InvalidArgument(_)));
        assert_eq!(item.state(), Lifecycle::Faulted);
    }

    // =========================================================================
    // Memoisation and faults
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_initialize_runs_hook_once() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let item = Arc::new(item_with(
            "/a.md",
            TestRenderer::html(Some("/a.html"), "x").counting(Arc::clone(&calls)),
        ));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let item = Arc::clone(&item);
            let site = Arc::clone(&site);
            tasks.spawn(async move { item.initialize(&site).await.is_ok() });
        }
        while let Some(ok) = tasks.join_next().await {
            assert!(ok.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(item.state(), Lifecycle::Initialized);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_initialize_shares_one_fault() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let item = Arc::new(item_with(
            "/bad.md",
            TestRenderer::failing_initialize("boom").counting(Arc::clone(&calls)),
        ));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let item = Arc::clone(&item);
            let site = Arc::clone(&site);
            tasks.spawn(async move { item.initialize(&site).await.unwrap_err() });
        }
        let mut faults = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let err = joined.unwrap();
            faults.push(Arc::clone(err.fault().unwrap()));
        }
        assert_eq!(faults.len(), 8);
        assert!(faults.iter().all(|fault| Arc::ptr_eq(fault, &faults[0])));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(item.state(), Lifecycle::Faulted);
    }

    #[tokio::test]
    async fn initialize_fault_is_sticky_and_shared() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let item = item_with(
            "/bad.md",
            TestRenderer::failing_initialize("boom").counting(Arc::clone(&calls)),
        );

        let first = item.initialize(&site).await.unwrap_err();
        let second = item.initialize(&site).await.unwrap_err();
        assert!(Arc::ptr_eq(first.fault().unwrap(), second.fault().unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(first.to_string().contains("boom"));

        // Later stages see the initialize fault too.
        let prepare = item.prepare_content(&site).await.unwrap_err();
        assert!(matches!(prepare, ContentError::Faulted { stage: Stage::Initialize, .. }));
    }

    #[tokio::test]
    async fn prepare_fault_is_sticky() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let item = item_with(
            "/bad.md",
            TestRenderer::failing_generate(Some("/bad.html"), "no body"),
        );
        item.initialize(&site).await.unwrap();
        let first = item.prepare_content(&site).await.unwrap_err();
        let second = item.prepare_content(&site).await.unwrap_err();
        assert!(Arc::ptr_eq(first.fault().unwrap(), second.fault().unwrap()));
        assert_eq!(item.state(), Lifecycle::Faulted);

        let write = item.write_content(&mut Vec::new(), "/bad.html").unwrap_err();
        assert!(matches!(write, ContentError::Faulted { stage: Stage::Prepare, .. }));
    }

    #[tokio::test]
    async fn write_is_repeatable() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let item = static_item("/a.md", Some("/a.html"), "<p>hello</p>");
        item.initialize(&site).await.unwrap();
        item.prepare_content(&site).await.unwrap();
        assert_eq!(item.state(), Lifecycle::Prepared);
        assert_eq!(write_to_string(&item, "/a.html"), "<p>hello</p>");
        assert_eq!(write_to_string(&item, "/a.html"), "<p>hello</p>");
        assert_eq!(item.html().unwrap(), Some("<p>hello</p>"));
    }

    // =========================================================================
    // Blurbs
    // =========================================================================

    #[tokio::test]
    async fn blurb_reads_the_generated_body() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let item = static_item("/a.md", Some("/a.html"), "<h1>T</h1><p>first</p><p>second</p>");
        assert!(item.blurb(&site).await.is_err());
        item.initialize(&site).await.unwrap();
        assert_eq!(item.blurb(&site).await.unwrap().as_deref(), Some("<p>first</p>"));
        // Reading a blurb does not count as preparing.
        assert_eq!(item.state(), Lifecycle::Initialized);
    }

    #[tokio::test]
    async fn front_matter_requires_initialize() {
        let tmp = TempDir::new().unwrap();
        let site = test_site(tmp.path());
        let item = static_item("/a.md", Some("/a.html"), "x");
        assert!(item.front_matter().is_err());
        item.initialize(&site).await.unwrap();
        assert!(item.front_matter().unwrap().is_none());
    }

    #[test]
    fn item_failures_list_every_error_sorted() {
        let failures = ItemFailures::check(vec![
            ContentError::Task("b".into()),
            ContentError::Task("a".into()),
        ])
        .unwrap_err();
        assert_eq!(failures.to_string(), "2 items failed:\n  - task failed: a\n  - task failed: b");
        assert!(ItemFailures::check(Vec::new()).is_ok());

        let single: ItemFailures = ContentError::Task("only".into()).into();
        assert_eq!(single.to_string(), "task failed: only");
    }

    #[test]
    fn fragment_new_has_no_title() {
        let fragment = Fragment::new("x");
        assert!(fragment.title.is_none() && fragment.sections.is_empty());
    }
}
