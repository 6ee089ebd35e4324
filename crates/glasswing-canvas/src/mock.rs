//! Mock surface backend
//!
//! An in-process stand-in for the content engine. It keeps per-surface url,
//! scroll, head resources and history, emits the same event sequence a real
//! engine does for loads, and supports failure injection and holding
//! capture queries open. Used by the tests and by the demo session.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::record::{CaptureSample, ScrollOffset};
use crate::surface::{
    CreatedSurface, PopupDecision, QueryResult, SandboxPolicy, SurfaceBackend, SurfaceEvent,
    SurfaceId, SurfaceQuery,
};

/// A command received by the mock, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum MockCommand {
    /// `create`
    Create {
        /// Initial url
        url: String,
    },
    /// `destroy`
    Destroy(SurfaceId),
    /// `load_url`
    LoadUrl(SurfaceId, String),
    /// `reload`
    Reload(SurfaceId),
    /// `go_back`
    GoBack(SurfaceId),
    /// `go_forward`
    GoForward(SurfaceId),
    /// `execute`, by query name
    Execute(SurfaceId, &'static str),
    /// `resolve_popup`
    ResolvePopup(SurfaceId, PopupDecision),
}

struct MockSurface {
    url: String,
    scroll: ScrollOffset,
    head: Vec<String>,
    body: String,
    back: Vec<String>,
    forward: Vec<String>,
    events: mpsc::UnboundedSender<SurfaceEvent>,
}

impl MockSurface {
    fn content(&self) -> String {
        format!(
            "<html><head>{}</head><body>{}</body></html>",
            self.head.concat(),
            self.body
        )
    }

    fn emit(&self, event: SurfaceEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

#[derive(Default)]
struct MockState {
    surfaces: HashMap<SurfaceId, MockSurface>,
    pages: HashMap<String, Vec<String>>,
    failures: HashMap<&'static str, usize>,
    create_failures: VecDeque<String>,
    load_failures: VecDeque<(i32, String)>,
    commands: Vec<MockCommand>,
}

/// Scriptable in-process surface backend
pub struct MockSurfaceBackend {
    state: Arc<Mutex<MockState>>,
    next_id: AtomicU64,
    capture_gate: watch::Sender<bool>,
    captures_waiting: AtomicUsize,
    auto_load: bool,
}

impl Default for MockSurfaceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSurfaceBackend {
    /// Create a mock backend that emits load events on its own
    #[must_use]
    pub fn new() -> Self {
        let (capture_gate, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            next_id: AtomicU64::new(1),
            capture_gate,
            captures_waiting: AtomicUsize::new(0),
            auto_load: true,
        }
    }

    /// Create a mock backend that emits nothing unless told to via [`Self::emit`]
    #[must_use]
    pub fn manual() -> Self {
        Self {
            auto_load: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Head resources a page starts with when loaded
    pub fn set_page_head(&self, url: impl Into<String>, head: Vec<String>) {
        self.lock().pages.insert(url.into(), head);
    }

    /// Make the next `count` queries named `query` fail
    pub fn fail_next(&self, query: &'static str, count: usize) {
        *self.lock().failures.entry(query).or_insert(0) += count;
    }

    /// Make the next `create` fail
    pub fn fail_next_create(&self, reason: impl Into<String>) {
        self.lock().create_failures.push_back(reason.into());
    }

    /// Make the next load report `DidFailLoad`
    pub fn fail_next_load(&self, code: i32, description: impl Into<String>) {
        self.lock()
            .load_failures
            .push_back((code, description.into()));
    }

    /// Hold every `CaptureState` query open until [`Self::release_captures`]
    pub fn hold_captures(&self) {
        self.capture_gate.send_replace(true);
    }

    /// Let held `CaptureState` queries finish
    pub fn release_captures(&self) {
        self.capture_gate.send_replace(false);
    }

    /// Number of `CaptureState` queries currently held open
    #[must_use]
    pub fn held_captures(&self) -> usize {
        self.captures_waiting.load(Ordering::SeqCst)
    }

    /// Simulate the user scrolling the surface
    pub fn set_scroll(&self, surface: SurfaceId, x: f64, y: f64) {
        if let Some(s) = self.lock().surfaces.get_mut(&surface) {
            s.scroll = ScrollOffset::new(x, y);
        }
    }

    /// Simulate the page mutating its body
    pub fn set_body(&self, surface: SurfaceId, body: impl Into<String>) {
        if let Some(s) = self.lock().surfaces.get_mut(&surface) {
            s.body = body.into();
        }
    }

    /// Simulate an in-page navigation (hash change) initiated by the page
    pub fn navigate_in_page(&self, surface: SurfaceId, url: impl Into<String>) -> bool {
        let url = url.into();
        let mut state = self.lock();
        let Some(s) = state.surfaces.get_mut(&surface) else {
            return false;
        };
        s.url.clone_from(&url);
        s.emit(SurfaceEvent::DidNavigateInPage { url })
    }

    /// Push an event onto a surface's stream
    pub fn emit(&self, surface: SurfaceId, event: SurfaceEvent) -> bool {
        self.lock()
            .surfaces
            .get(&surface)
            .is_some_and(|s| s.emit(event))
    }

    /// Commands received so far
    #[must_use]
    pub fn commands(&self) -> Vec<MockCommand> {
        self.lock().commands.clone()
    }

    /// Number of live surfaces
    #[must_use]
    pub fn surface_count(&self) -> usize {
        self.lock().surfaces.len()
    }

    /// Most recently created surface that is still alive
    #[must_use]
    pub fn last_surface(&self) -> Option<SurfaceId> {
        self.lock().surfaces.keys().max_by_key(|id| id.0).copied()
    }

    /// Current url of a surface
    #[must_use]
    pub fn url_of(&self, surface: SurfaceId) -> Option<String> {
        self.lock().surfaces.get(&surface).map(|s| s.url.clone())
    }

    /// Current scroll of a surface
    #[must_use]
    pub fn scroll_of(&self, surface: SurfaceId) -> Option<ScrollOffset> {
        self.lock().surfaces.get(&surface).map(|s| s.scroll)
    }

    /// Current head resources of a surface
    #[must_use]
    pub fn head_of(&self, surface: SurfaceId) -> Option<Vec<String>> {
        self.lock().surfaces.get(&surface).map(|s| s.head.clone())
    }

    fn take_failure(state: &mut MockState, query: &'static str) -> bool {
        match state.failures.get_mut(query) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    /// Replace the document and emit the load sequence for it
    fn load(&self, state: &mut MockState, surface: SurfaceId, url: String) -> Result<()> {
        let load_failure = state.load_failures.pop_front();
        let head = state.pages.get(&url).cloned().unwrap_or_default();
        let auto_load = self.auto_load;
        let s = state
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))?;

        if !auto_load {
            s.url = url;
            return Ok(());
        }

        s.emit(SurfaceEvent::DidStartLoading);
        if let Some((code, description)) = load_failure {
            s.emit(SurfaceEvent::DidFailLoad { code, description });
            return Ok(());
        }

        s.url.clone_from(&url);
        s.scroll = ScrollOffset::ORIGIN;
        s.head = head;
        s.body.clear();
        s.emit(SurfaceEvent::DidNavigate { url });
        s.emit(SurfaceEvent::DidFinishLoad);
        Ok(())
    }

    async fn wait_capture_gate(&self) {
        let mut gate = self.capture_gate.subscribe();
        if !*gate.borrow() {
            return;
        }
        let _waiting = Waiting::enter(&self.captures_waiting);
        let _ = gate.wait_for(|held| !*held).await;
    }
}

/// Counts a held query until it finishes or is dropped
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SurfaceBackend for MockSurfaceBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(&self, initial_url: &str, _policy: &SandboxPolicy) -> Result<CreatedSurface> {
        let mut state = self.lock();
        state.commands.push(MockCommand::Create {
            url: initial_url.to_string(),
        });
        if let Some(reason) = state.create_failures.pop_front() {
            return Err(Error::surface_create(reason));
        }

        let id = SurfaceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();
        state.surfaces.insert(
            id,
            MockSurface {
                url: String::new(),
                scroll: ScrollOffset::ORIGIN,
                head: Vec::new(),
                body: String::new(),
                back: Vec::new(),
                forward: Vec::new(),
                events: tx,
            },
        );
        self.load(&mut state, id, initial_url.to_string())?;

        Ok(CreatedSurface { id, events: rx })
    }

    async fn destroy(&self, surface: SurfaceId) -> Result<()> {
        let mut state = self.lock();
        state.commands.push(MockCommand::Destroy(surface));
        state
            .surfaces
            .remove(&surface)
            .map(|_| ())
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))
    }

    async fn load_url(&self, surface: SurfaceId, url: &str) -> Result<()> {
        let mut state = self.lock();
        state
            .commands
            .push(MockCommand::LoadUrl(surface, url.to_string()));
        if let Some(s) = state.surfaces.get_mut(&surface) {
            let previous = s.url.clone();
            s.back.push(previous);
            s.forward.clear();
        }
        self.load(&mut state, surface, url.to_string())
    }

    async fn reload(&self, surface: SurfaceId) -> Result<()> {
        let mut state = self.lock();
        state.commands.push(MockCommand::Reload(surface));
        let url = state
            .surfaces
            .get(&surface)
            .map(|s| s.url.clone())
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))?;
        self.load(&mut state, surface, url)
    }

    async fn go_back(&self, surface: SurfaceId) -> Result<()> {
        let mut state = self.lock();
        state.commands.push(MockCommand::GoBack(surface));
        let s = state
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))?;
        let target = s
            .back
            .pop()
            .ok_or_else(|| Error::navigation("no history entry to go back to"))?;
        let current = s.url.clone();
        s.forward.push(current);
        self.load(&mut state, surface, target)
    }

    async fn go_forward(&self, surface: SurfaceId) -> Result<()> {
        let mut state = self.lock();
        state.commands.push(MockCommand::GoForward(surface));
        let s = state
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))?;
        let target = s
            .forward
            .pop()
            .ok_or_else(|| Error::navigation("no history entry to go forward to"))?;
        let current = s.url.clone();
        s.back.push(current);
        self.load(&mut state, surface, target)
    }

    async fn can_go_back(&self, surface: SurfaceId) -> Result<bool> {
        self.lock()
            .surfaces
            .get(&surface)
            .map(|s| !s.back.is_empty())
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))
    }

    async fn can_go_forward(&self, surface: SurfaceId) -> Result<bool> {
        self.lock()
            .surfaces
            .get(&surface)
            .map(|s| !s.forward.is_empty())
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))
    }

    async fn execute(&self, surface: SurfaceId, query: SurfaceQuery) -> Result<QueryResult> {
        self.lock()
            .commands
            .push(MockCommand::Execute(surface, query.name()));

        if matches!(query, SurfaceQuery::CaptureState) {
            self.wait_capture_gate().await;
        }

        let mut state = self.lock();
        if Self::take_failure(&mut state, query.name()) {
            return Err(Error::query(format!("{} failed (injected)", query.name())));
        }
        let s = state
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))?;

        let result = match query {
            SurfaceQuery::CaptureState => QueryResult::State(CaptureSample {
                scroll_x: s.scroll.x,
                scroll_y: s.scroll.y,
                serialized_content: Some(s.content()),
                current_url: s.url.clone(),
            }),
            SurfaceQuery::HeadResources => QueryResult::HeadResources(s.head.clone()),
            SurfaceQuery::InsertHeadResources(resources) => {
                let inserted = resources.len();
                s.head.extend(resources);
                QueryResult::Inserted(inserted)
            }
            SurfaceQuery::ScrollTo { x, y } => {
                s.scroll = ScrollOffset::new(x, y);
                QueryResult::Done
            }
        };
        Ok(result)
    }

    async fn resolve_popup(&self, surface: SurfaceId, decision: PopupDecision) -> Result<()> {
        self.lock()
            .commands
            .push(MockCommand::ResolvePopup(surface, decision));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_emits_load_sequence() {
        let backend = MockSurfaceBackend::new();
        let mut created = backend
            .create("https://a.example", &SandboxPolicy::default())
            .await
            .unwrap();

        assert_eq!(created.events.recv().await, Some(SurfaceEvent::DidStartLoading));
        assert_eq!(
            created.events.recv().await,
            Some(SurfaceEvent::DidNavigate {
                url: "https://a.example".into()
            })
        );
        assert_eq!(created.events.recv().await, Some(SurfaceEvent::DidFinishLoad));
        assert_eq!(backend.surface_count(), 1);
    }

    #[tokio::test]
    async fn test_history() {
        let backend = MockSurfaceBackend::new();
        let created = backend
            .create("https://a.example", &SandboxPolicy::default())
            .await
            .unwrap();
        let id = created.id;

        assert!(!backend.can_go_back(id).await.unwrap());
        backend.load_url(id, "https://b.example").await.unwrap();
        assert!(backend.can_go_back(id).await.unwrap());

        backend.go_back(id).await.unwrap();
        assert_eq!(backend.url_of(id).as_deref(), Some("https://a.example"));
        assert!(backend.can_go_forward(id).await.unwrap());

        backend.go_forward(id).await.unwrap();
        assert_eq!(backend.url_of(id).as_deref(), Some("https://b.example"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = MockSurfaceBackend::new();
        let id = backend
            .create("https://a.example", &SandboxPolicy::default())
            .await
            .unwrap()
            .id;

        backend.fail_next("capture_state", 1);
        assert!(backend.execute(id, SurfaceQuery::CaptureState).await.is_err());
        assert!(backend.execute(id, SurfaceQuery::CaptureState).await.is_ok());

        backend.fail_next_create("sandbox denied");
        let err = backend
            .create("https://b.example", &SandboxPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "surface_create_failed");
    }

    #[tokio::test]
    async fn test_head_insert_and_scroll() {
        let backend = MockSurfaceBackend::new();
        backend.set_page_head("https://a.example", vec!["<style>a{}</style>".into()]);
        let id = backend
            .create("https://a.example", &SandboxPolicy::default())
            .await
            .unwrap()
            .id;

        backend
            .execute(id, SurfaceQuery::InsertHeadResources(vec!["<script>x</script>".into()]))
            .await
            .unwrap();
        backend
            .execute(id, SurfaceQuery::ScrollTo { x: 0.0, y: 80.0 })
            .await
            .unwrap();

        assert_eq!(backend.head_of(id).unwrap().len(), 2);
        assert_eq!(backend.scroll_of(id), Some(ScrollOffset::new(0.0, 80.0)));

        let QueryResult::State(sample) = backend.execute(id, SurfaceQuery::CaptureState).await.unwrap()
        else {
            panic!("expected state");
        };
        assert_eq!(sample.scroll_y, 80.0);
        assert!(sample
            .serialized_content
            .unwrap()
            .contains("<script>x</script>"));
    }

    #[tokio::test]
    async fn test_held_captures() {
        let backend = Arc::new(MockSurfaceBackend::new());
        let id = backend
            .create("https://a.example", &SandboxPolicy::default())
            .await
            .unwrap()
            .id;

        backend.hold_captures();
        let task = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.execute(id, SurfaceQuery::CaptureState).await })
        };
        while backend.held_captures() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());

        backend.release_captures();
        assert!(task.await.unwrap().is_ok());
    }
}
