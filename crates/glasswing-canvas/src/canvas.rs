//! Live Canvas
//!
//! Wires the bridge, controller, router, scheduler, restoration engine and
//! per-object arbiters together behind the calls a canvas host makes: view
//! mounted, view ready, view unmounted, input, navigation commands.
//!
//! Failures never reach the host as errors from these calls. A surface that
//! cannot be created leaves the object rendering as a placeholder; a failed
//! command is logged and reported as `false`.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::arbiter::{InputEvent, InputTarget, InteractionArbiter, InteractionMode};
use crate::bridge::SyncBridge;
use crate::config::LiveSyncConfig;
use crate::controller::{ReadyGate, SurfaceController, SurfaceHandle};
use crate::error::Result;
use crate::events::{CaptureTrigger, SyncEventRecorder};
use crate::record::Position;
use crate::restore::RestorationEngine;
use crate::router::{HostRequest, NavigationRouter};
use crate::scheduler::{CaptureOutcome, CaptureScheduler};
use crate::store::{DocumentChange, DocumentStore};
use crate::surface::SurfaceBackend;
use crate::urls::normalize_url;

/// What the host should draw for an object
#[derive(Debug, Clone)]
pub enum RenderState {
    /// Inert placeholder: not ready yet, or the surface could not be created
    Placeholder,
    /// A live surface is mounted
    Live(SurfaceHandle),
}

impl RenderState {
    /// Whether a live surface is mounted
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

struct ViewState {
    gate: ReadyGate,
    token: CancellationToken,
}

/// Live surface subsystem for one document
pub struct LiveCanvas {
    config: LiveSyncConfig,
    bridge: Arc<SyncBridge>,
    recorder: Arc<SyncEventRecorder>,
    controller: Arc<SurfaceController>,
    scheduler: Arc<CaptureScheduler>,
    host_tx: mpsc::UnboundedSender<HostRequest>,
    views: DashMap<Uuid, ViewState>,
    arbiters: DashMap<Uuid, Arc<InteractionArbiter>>,
    shutdown: CancellationToken,
}

impl LiveCanvas {
    /// Build the subsystem. Host requests arrive on the returned receiver.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        backend: Arc<dyn SurfaceBackend>,
        config: LiveSyncConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HostRequest>)> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(SyncEventRecorder::new(config.event_log_capacity));
        let bridge = Arc::new(
            SyncBridge::new(store).with_defaults(config.default_url.clone(), config.default_bounds),
        );
        let router = Arc::new(
            NavigationRouter::new(backend.clone(), bridge.clone(), recorder.clone(), host_tx.clone())
                .with_popup_gap(config.popup_gap)
                .with_allow_popups(config.sandbox.allow_popups),
        );
        let restorer = Arc::new(RestorationEngine::new(backend.clone(), recorder.clone()));
        let controller = Arc::new(
            SurfaceController::new(
                backend.clone(),
                bridge.clone(),
                recorder.clone(),
                router,
                restorer,
            )
            .with_sandbox(config.sandbox.clone())
            .with_parent_token(&shutdown),
        );
        let scheduler = Arc::new(
            CaptureScheduler::new(backend, bridge.clone(), recorder.clone())
                .with_interval(config.capture_interval()),
        );

        info!(
            capture_interval_ms = config.capture_interval_ms,
            default_url = %config.default_url,
            "Live canvas initialized"
        );

        Ok((
            Self {
                config,
                bridge,
                recorder,
                controller,
                scheduler,
                host_tx,
                views: DashMap::new(),
                arbiters: DashMap::new(),
                shutdown,
            },
            host_rx,
        ))
    }

    /// Effective configuration
    pub fn config(&self) -> &LiveSyncConfig {
        &self.config
    }

    /// Sync bridge
    pub fn bridge(&self) -> &Arc<SyncBridge> {
        &self.bridge
    }

    /// Sync event log
    pub fn recorder(&self) -> &Arc<SyncEventRecorder> {
        &self.recorder
    }

    /// Surface controller
    pub fn controller(&self) -> &Arc<SurfaceController> {
        &self.controller
    }

    /// Capture scheduler
    pub fn scheduler(&self) -> &Arc<CaptureScheduler> {
        &self.scheduler
    }

    // ------------------------------------------------------------------------
    // View lifecycle
    // ------------------------------------------------------------------------

    /// The host attached a view for an object. The surface is created once
    /// the returned gate opens (see [`Self::view_ready`]).
    pub fn view_mounted(&self, record_id: Uuid) -> ReadyGate {
        if let Some(view) = self.views.get(&record_id) {
            return view.gate.clone();
        }

        let gate = ReadyGate::new();
        let token = self.shutdown.child_token();
        self.views.insert(
            record_id,
            ViewState {
                gate: gate.clone(),
                token: token.clone(),
            },
        );

        let controller = self.controller.clone();
        let scheduler = self.scheduler.clone();
        let waiting = gate.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = waiting.wait() => {}
            }

            match controller.mount(record_id).await {
                Ok(handle) if token.is_cancelled() => {
                    debug!(record_id = %record_id, "View went away during mount");
                    if controller.is_current(&handle) {
                        controller.unmount(record_id).await;
                    }
                }
                Ok(handle) => {
                    scheduler.start(&handle);
                }
                Err(e) => {
                    warn!(record_id = %record_id, error = %e, class = %e.class(), "Live surface unavailable, rendering placeholder");
                }
            }
        });

        debug!(record_id = %record_id, "View mounted, waiting for ready");
        gate
    }

    /// The host view can render now. Returns false if the view is unknown
    /// or was already ready.
    pub fn view_ready(&self, record_id: Uuid) -> bool {
        self.views
            .get(&record_id)
            .is_some_and(|view| view.gate.open())
    }

    /// The host detached the view. Any surface is torn down.
    pub async fn view_unmounted(&self, record_id: Uuid) -> bool {
        if let Some((_, view)) = self.views.remove(&record_id) {
            view.token.cancel();
        }
        self.teardown(record_id).await
    }

    async fn teardown(&self, record_id: Uuid) -> bool {
        if let Some((_, arbiter)) = self.arbiters.remove(&record_id) {
            if arbiter.mode() == InteractionMode::Interactive {
                arbiter.exit().await;
            }
        }
        self.scheduler.stop_record(record_id);
        self.controller.unmount(record_id).await
    }

    /// What to draw for an object
    #[must_use]
    pub fn render_state(&self, record_id: Uuid) -> RenderState {
        self.controller
            .handle(record_id)
            .map_or(RenderState::Placeholder, RenderState::Live)
    }

    // ------------------------------------------------------------------------
    // Interaction
    // ------------------------------------------------------------------------

    /// Arbiter for an object, created on first use
    pub fn arbiter(&self, record_id: Uuid) -> Arc<InteractionArbiter> {
        self.arbiters
            .entry(record_id)
            .or_insert_with(|| {
                Arc::new(InteractionArbiter::new(
                    record_id,
                    self.controller.clone(),
                    self.scheduler.clone(),
                    self.recorder.clone(),
                    self.host_tx.clone(),
                ))
            })
            .clone()
    }

    /// Current interaction mode of an object
    #[must_use]
    pub fn mode(&self, record_id: Uuid) -> InteractionMode {
        self.arbiters
            .get(&record_id)
            .map_or(InteractionMode::Passive, |a| a.mode())
    }

    /// Route an input event for an object
    pub async fn handle_input(&self, record_id: Uuid, event: InputEvent) -> InputTarget {
        self.arbiter(record_id).handle_input(event).await
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Navigate an object's surface. Returns the normalized url on success.
    pub async fn navigate(&self, record_id: Uuid, url: &str) -> Option<String> {
        let handle = self.live_handle(record_id)?;
        match self.controller.navigate(&handle, url).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(record_id = %record_id, error = %e, class = %e.class(), "Navigation failed");
                None
            }
        }
    }

    /// Go back in an object's history
    pub async fn go_back(&self, record_id: Uuid) -> bool {
        let Some(handle) = self.live_handle(record_id) else {
            return false;
        };
        self.controller
            .go_back(&handle)
            .await
            .unwrap_or_else(|e| {
                warn!(record_id = %record_id, error = %e, "Back navigation failed");
                false
            })
    }

    /// Go forward in an object's history
    pub async fn go_forward(&self, record_id: Uuid) -> bool {
        let Some(handle) = self.live_handle(record_id) else {
            return false;
        };
        self.controller
            .go_forward(&handle)
            .await
            .unwrap_or_else(|e| {
                warn!(record_id = %record_id, error = %e, "Forward navigation failed");
                false
            })
    }

    /// Reload an object's surface
    pub async fn reload(&self, record_id: Uuid) -> bool {
        let Some(handle) = self.live_handle(record_id) else {
            return false;
        };
        match self.controller.reload(&handle).await {
            Ok(()) => true,
            Err(e) => {
                warn!(record_id = %record_id, error = %e, "Reload failed");
                false
            }
        }
    }

    /// Capture an object's surface now
    pub async fn capture_now(&self, record_id: Uuid) -> Option<CaptureOutcome> {
        let handle = self.live_handle(record_id)?;
        Some(
            self.scheduler
                .capture_now(&handle, CaptureTrigger::Manual)
                .await,
        )
    }

    fn live_handle(&self, record_id: Uuid) -> Option<SurfaceHandle> {
        let handle = self.controller.handle(record_id);
        if handle.is_none() {
            debug!(record_id = %record_id, "No live surface mounted, ignoring command");
        }
        handle
    }

    // ------------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------------

    /// Create a live object. `url` is normalized; `None` uses the configured default.
    pub async fn create_live_object(&self, url: Option<&str>, position: Position) -> Result<Uuid> {
        let url = url.map(normalize_url).transpose()?;
        self.bridge.create_live_object(url.as_deref(), position).await
    }

    /// Fulfil a host request the host chose to delegate back.
    ///
    /// `OpenLiveObject` creates the sibling object and returns its id.
    pub async fn fulfil(&self, request: &HostRequest) -> Result<Option<Uuid>> {
        match request {
            HostRequest::OpenLiveObject { url, position, .. } => self
                .create_live_object(Some(url.as_str()), *position)
                .await
                .map(Some),
            HostRequest::Select { .. } => Ok(None),
        }
    }

    /// Tear down any surface for an object, then delete it from the store
    pub async fn delete_object(&self, record_id: Uuid) -> Result<bool> {
        self.views.remove(&record_id);
        self.teardown(record_id).await;
        self.bridge.delete_object(record_id).await
    }

    /// Tear down surfaces of objects deleted behind this subsystem's back
    pub fn watch_document(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.bridge.store().subscribe();
        let canvas = Arc::clone(self);
        let token = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    change = changes.recv() => change,
                };
                match change {
                    Ok(DocumentChange::Deleted(record_id)) => {
                        if let Some((_, view)) = canvas.views.remove(&record_id) {
                            view.token.cancel();
                        }
                        if canvas.teardown(record_id).await {
                            info!(record_id = %record_id, "Record deleted, live surface torn down");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Document change stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Tear down every surface and stop background work
    pub async fn shutdown(&self) {
        info!("Shutting down live canvas");
        for view in self.views.iter() {
            view.token.cancel();
        }
        self.views.clear();
        // Must precede cancel: exit captures need live handles
        for record_id in self.controller.mounted_records() {
            self.teardown(record_id).await;
        }
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::LifecycleSignal;
    use crate::mock::MockSurfaceBackend;
    use crate::store::InMemoryDocumentStore;

    fn canvas() -> (
        LiveCanvas,
        Arc<MockSurfaceBackend>,
        mpsc::UnboundedReceiver<HostRequest>,
    ) {
        let backend = Arc::new(MockSurfaceBackend::new());
        let (canvas, rx) = LiveCanvas::new(
            Arc::new(InMemoryDocumentStore::new()),
            backend.clone(),
            LiveSyncConfig::default(),
        )
        .unwrap();
        (canvas, backend, rx)
    }

    #[tokio::test]
    async fn test_placeholder_until_ready() {
        let (canvas, backend, _rx) = canvas();
        let id = canvas
            .create_live_object(Some("a.example"), Position::default())
            .await
            .unwrap();
        let mut signals = canvas.controller().subscribe();

        let gate = canvas.view_mounted(id);
        tokio::task::yield_now().await;
        assert!(!gate.is_open());
        assert!(!canvas.render_state(id).is_live());
        assert_eq!(backend.surface_count(), 0);

        assert!(canvas.view_ready(id));
        assert!(!canvas.view_ready(id));
        assert!(matches!(
            signals.recv().await.unwrap(),
            LifecycleSignal::Mounted { .. }
        ));
        assert!(canvas.render_state(id).is_live());
        assert_eq!(backend.surface_count(), 1);
    }

    #[tokio::test]
    async fn test_unmount_before_ready_never_creates() {
        let (canvas, backend, _rx) = canvas();
        let id = canvas
            .create_live_object(None, Position::default())
            .await
            .unwrap();

        canvas.view_mounted(id);
        assert!(!canvas.view_unmounted(id).await);
        assert!(!canvas.view_ready(id));
        tokio::task::yield_now().await;
        assert_eq!(backend.surface_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = LiveSyncConfig {
            capture_interval_ms: 1,
            ..LiveSyncConfig::default()
        };
        let result = LiveCanvas::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(MockSurfaceBackend::new()),
            config,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_commands_without_surface_are_noops() {
        let (canvas, _backend, _rx) = canvas();
        let id = canvas
            .create_live_object(None, Position::default())
            .await
            .unwrap();

        assert!(canvas.navigate(id, "https://b.example").await.is_none());
        assert!(!canvas.go_back(id).await);
        assert!(!canvas.reload(id).await);
        assert!(canvas.capture_now(id).await.is_none());
        assert_eq!(canvas.mode(id), InteractionMode::Passive);
    }
}
