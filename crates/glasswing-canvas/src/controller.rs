//! Live Surface Controller
//!
//! Owns the one-to-one mapping from a live object record to its surface
//! instance. Mounting and unmounting are serialized; every instance gets a
//! cancellation token that the event pump, the capture scheduler and any
//! in-flight completion check before acting.

use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use crate::bridge::SyncBridge;
use crate::error::{Error, ErrorClass, Result};
use crate::events::{SyncEventRecorder, SyncEventType};
use crate::registry::KindRegistry;
use crate::restore::RestorationEngine;
use crate::router::NavigationRouter;
use crate::surface::{SandboxPolicy, SurfaceBackend, SurfaceEvent, SurfaceId};
use crate::urls::normalize_url;

const LIFECYCLE_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Surface Handle
// ============================================================================

#[derive(Debug)]
struct HandleInner {
    record_id: Uuid,
    surface_id: SurfaceId,
    generation: Uuid,
    token: CancellationToken,
    restoring: AtomicBool,
    loading: AtomicBool,
}

/// Reference to one mounted surface instance.
///
/// Clones share the same instance. Once the instance is torn down the handle
/// stays valid as a value but [`SurfaceHandle::is_live`] turns false.
#[derive(Debug, Clone)]
pub struct SurfaceHandle {
    inner: Arc<HandleInner>,
}

impl SurfaceHandle {
    /// Create a handle for a surface bound to `record_id`
    #[must_use]
    pub fn new(record_id: Uuid, surface_id: SurfaceId, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                record_id,
                surface_id,
                generation: Uuid::new_v4(),
                token,
                restoring: AtomicBool::new(false),
                loading: AtomicBool::new(false),
            }),
        }
    }

    /// Record the surface is bound to
    #[must_use]
    pub fn record_id(&self) -> Uuid {
        self.inner.record_id
    }

    /// Backend surface id
    #[must_use]
    pub fn surface_id(&self) -> SurfaceId {
        self.inner.surface_id
    }

    /// Unique id of this instance; a remount of the same record gets a new one
    #[must_use]
    pub fn generation(&self) -> Uuid {
        self.inner.generation
    }

    /// False once the instance has been torn down
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.inner.token.is_cancelled()
    }

    /// Token cancelled on teardown
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Token for work that must stop with this instance
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// Whether the next top-level navigation back to the record url is a restoration
    #[must_use]
    pub fn is_restoring(&self) -> bool {
        self.inner.restoring.load(Ordering::SeqCst)
    }

    /// Set the restoring flag
    pub fn set_restoring(&self, restoring: bool) {
        self.inner.restoring.store(restoring, Ordering::SeqCst);
    }

    /// Whether a document load is in progress. The record, not the live
    /// document, holds the state to restore until the load finishes.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    /// Set the loading flag
    pub fn set_loading(&self, loading: bool) {
        self.inner.loading.store(loading, Ordering::SeqCst);
    }

    /// Whether two handles refer to the same instance
    #[must_use]
    pub fn same_instance(&self, other: &SurfaceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn cancel(&self) {
        self.inner.token.cancel();
    }
}

// ============================================================================
// Ready Gate
// ============================================================================

/// One-shot signal that a host view can render a live surface
#[derive(Debug, Clone)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    /// Create a closed gate
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Open the gate. Returns false if it was already open.
    pub fn open(&self) -> bool {
        self.tx.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        })
    }

    /// Whether the gate is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate opens
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|open| *open).await;
    }
}

// ============================================================================
// Lifecycle Signals
// ============================================================================

/// Lifecycle signal emitted by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleSignal {
    /// A surface instance was created
    Mounted {
        /// Record id
        record_id: Uuid,
        /// Backend surface id
        surface_id: SurfaceId,
    },
    /// A surface instance was torn down
    Unmounted {
        /// Record id
        record_id: Uuid,
    },
    /// A load started
    LoadStart {
        /// Record id
        record_id: Uuid,
    },
    /// A load finished and restoration ran
    LoadFinish {
        /// Record id
        record_id: Uuid,
    },
    /// A load failed
    LoadFail {
        /// Record id
        record_id: Uuid,
        /// Engine error code
        code: i32,
        /// Engine description
        description: String,
    },
}

impl LifecycleSignal {
    /// Record the signal concerns
    #[must_use]
    pub fn record_id(&self) -> Uuid {
        match self {
            Self::Mounted { record_id, .. }
            | Self::Unmounted { record_id }
            | Self::LoadStart { record_id }
            | Self::LoadFinish { record_id }
            | Self::LoadFail { record_id, .. } => *record_id,
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Creates, mounts and tears down live surfaces
pub struct SurfaceController {
    backend: Arc<dyn SurfaceBackend>,
    bridge: Arc<SyncBridge>,
    recorder: Arc<SyncEventRecorder>,
    router: Arc<NavigationRouter>,
    restorer: Arc<RestorationEngine>,
    registry: Arc<KindRegistry>,
    sandbox: SandboxPolicy,
    instances: DashMap<Uuid, SurfaceHandle>,
    mount_lock: Mutex<()>,
    lifecycle: broadcast::Sender<LifecycleSignal>,
    root_token: CancellationToken,
}

impl SurfaceController {
    /// Create a controller
    pub fn new(
        backend: Arc<dyn SurfaceBackend>,
        bridge: Arc<SyncBridge>,
        recorder: Arc<SyncEventRecorder>,
        router: Arc<NavigationRouter>,
        restorer: Arc<RestorationEngine>,
    ) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            backend,
            bridge,
            recorder,
            router,
            restorer,
            registry: Arc::new(KindRegistry::with_defaults()),
            sandbox: SandboxPolicy::default(),
            instances: DashMap::new(),
            mount_lock: Mutex::new(()),
            lifecycle,
            root_token: CancellationToken::new(),
        }
    }

    /// Use a custom kind registry
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<KindRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Set the sandbox policy for created surfaces
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Derive every instance token from `token`
    #[must_use]
    pub fn with_parent_token(mut self, token: &CancellationToken) -> Self {
        self.root_token = token.child_token();
        self
    }

    /// Subscribe to lifecycle signals
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.lifecycle.subscribe()
    }

    /// Current handle for a record, if mounted
    #[must_use]
    pub fn handle(&self, record_id: Uuid) -> Option<SurfaceHandle> {
        self.instances.get(&record_id).map(|h| h.clone())
    }

    /// Whether `handle` is the live instance for its record
    #[must_use]
    pub fn is_current(&self, handle: &SurfaceHandle) -> bool {
        handle.is_live()
            && self
                .instances
                .get(&handle.record_id())
                .is_some_and(|h| h.same_instance(handle))
    }

    /// Number of mounted surfaces
    #[must_use]
    pub fn mounted_count(&self) -> usize {
        self.instances.len()
    }

    /// Records with a mounted surface
    #[must_use]
    pub fn mounted_records(&self) -> Vec<Uuid> {
        self.instances.iter().map(|e| *e.key()).collect()
    }

    fn ensure_current(&self, handle: &SurfaceHandle) -> Result<()> {
        if self.is_current(handle) {
            Ok(())
        } else {
            Err(Error::StaleHandle(handle.record_id()))
        }
    }

    /// Mount the surface for a record, or return the existing handle
    #[instrument(skip(self), fields(record_id = %record_id))]
    pub async fn mount(&self, record_id: Uuid) -> Result<SurfaceHandle> {
        let _guard = self.mount_lock.lock().await;

        if let Some(existing) = self.handle(record_id) {
            debug!("Surface already mounted, returning existing handle");
            return Ok(existing);
        }

        let record = self.bridge.record(record_id).await?;
        if !self.registry.hosts_live_surface(record.kind) {
            return Err(Error::UnsupportedKind(record.kind.to_string()));
        }

        let created = match self.backend.create(record.url(), &self.sandbox).await {
            Ok(created) => created,
            Err(e) => {
                let e = if e.class() == ErrorClass::RecoverableMount {
                    e
                } else {
                    Error::surface_create(e.to_string())
                };
                warn!(error = %e, class = %e.class(), "Surface creation failed, object stays a placeholder");
                self.recorder
                    .record_failure(record_id, SyncEventType::MountFailed, e.code(), &e.to_string())
                    .await;
                return Err(e);
            }
        };

        let handle = SurfaceHandle::new(record_id, created.id, self.root_token.child_token());
        handle.set_restoring(true);
        handle.set_loading(true);
        self.instances.insert(record_id, handle.clone());

        self.recorder
            .record(
                record_id,
                SyncEventType::SurfaceMounted,
                json!({ "surface": created.id.to_string(), "backend": self.backend.name() }),
            )
            .await;
        let _ = self.lifecycle.send(LifecycleSignal::Mounted {
            record_id,
            surface_id: created.id,
        });

        let pump = EventPump {
            bridge: self.bridge.clone(),
            recorder: self.recorder.clone(),
            router: self.router.clone(),
            restorer: self.restorer.clone(),
            lifecycle: self.lifecycle.clone(),
        };
        tokio::spawn(pump.run(handle.clone(), created.events));
        info!(surface = %created.id, url = %record.url(), "Live surface mounted");

        Ok(handle)
    }

    /// Tear down the surface for a record. Returns false if nothing was mounted.
    #[instrument(skip(self), fields(record_id = %record_id))]
    pub async fn unmount(&self, record_id: Uuid) -> bool {
        let _guard = self.mount_lock.lock().await;

        let Some((_, handle)) = self.instances.remove(&record_id) else {
            debug!("Nothing mounted");
            return false;
        };

        handle.cancel();
        if let Err(e) = self.backend.destroy(handle.surface_id()).await {
            warn!(surface = %handle.surface_id(), error = %e, "Surface destroy failed");
        }

        self.recorder
            .record(
                record_id,
                SyncEventType::SurfaceUnmounted,
                json!({ "surface": handle.surface_id().to_string() }),
            )
            .await;
        let _ = self.lifecycle.send(LifecycleSignal::Unmounted { record_id });
        info!(surface = %handle.surface_id(), "Live surface unmounted");

        true
    }

    /// Tear down every mounted surface
    pub async fn unmount_all(&self) -> usize {
        let mut count = 0;
        for record_id in self.mounted_records() {
            if self.unmount(record_id).await {
                count += 1;
            }
        }
        count
    }

    /// Navigate to user input and commit the new url with scroll and snapshot reset.
    ///
    /// Returns the normalized url.
    #[instrument(skip(self, handle), fields(record_id = %handle.record_id()))]
    pub async fn navigate(&self, handle: &SurfaceHandle, url: &str) -> Result<String> {
        self.ensure_current(handle)?;
        let url = normalize_url(url)?;

        handle.set_restoring(false);
        self.backend
            .load_url(handle.surface_id(), &url)
            .await
            .map_err(|e| Error::navigation(e.to_string()))?;

        self.ensure_current(handle)?;
        if self.bridge.commit_navigation(handle.record_id(), &url).await? {
            self.recorder
                .record_navigated(handle.record_id(), &url, false)
                .await;
        }
        debug!(url = %url, "Navigation committed");
        Ok(url)
    }

    /// Go back in history. Returns false when there is no entry to go back to.
    pub async fn go_back(&self, handle: &SurfaceHandle) -> Result<bool> {
        if !self.can_go_back(handle).await? {
            return Ok(false);
        }
        handle.set_restoring(false);
        self.backend
            .go_back(handle.surface_id())
            .await
            .map_err(|e| Error::navigation(e.to_string()))?;
        Ok(true)
    }

    /// Go forward in history. Returns false when there is no entry to go forward to.
    pub async fn go_forward(&self, handle: &SurfaceHandle) -> Result<bool> {
        if !self.can_go_forward(handle).await? {
            return Ok(false);
        }
        handle.set_restoring(false);
        self.backend
            .go_forward(handle.surface_id())
            .await
            .map_err(|e| Error::navigation(e.to_string()))?;
        Ok(true)
    }

    /// Reload the current document; the next load restores from the record
    pub async fn reload(&self, handle: &SurfaceHandle) -> Result<()> {
        self.ensure_current(handle)?;
        handle.set_restoring(true);
        handle.set_loading(true);
        if let Err(e) = self.backend.reload(handle.surface_id()).await {
            handle.set_restoring(false);
            handle.set_loading(false);
            return Err(Error::navigation(e.to_string()));
        }
        Ok(())
    }

    /// Whether there is a history entry to go back to
    pub async fn can_go_back(&self, handle: &SurfaceHandle) -> Result<bool> {
        self.ensure_current(handle)?;
        self.backend.can_go_back(handle.surface_id()).await
    }

    /// Whether there is a history entry to go forward to
    pub async fn can_go_forward(&self, handle: &SurfaceHandle) -> Result<bool> {
        self.ensure_current(handle)?;
        self.backend.can_go_forward(handle.surface_id()).await
    }
}

// ============================================================================
// Event Pump
// ============================================================================

/// Drains one surface's event stream until the instance is torn down
struct EventPump {
    bridge: Arc<SyncBridge>,
    recorder: Arc<SyncEventRecorder>,
    router: Arc<NavigationRouter>,
    restorer: Arc<RestorationEngine>,
    lifecycle: broadcast::Sender<LifecycleSignal>,
}

impl EventPump {
    async fn run(self, handle: SurfaceHandle, mut events: mpsc::UnboundedReceiver<SurfaceEvent>) {
        let token = handle.token().clone();
        loop {
            let event = tokio::select! {
                biased;
                () = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!(record_id = %handle.record_id(), "Surface event stream closed");
                        break;
                    }
                },
            };
            self.dispatch(&handle, event).await;
        }
        trace!(record_id = %handle.record_id(), "Event pump stopped");
    }

    async fn dispatch(&self, handle: &SurfaceHandle, event: SurfaceEvent) {
        let record_id = handle.record_id();
        trace!(record_id = %record_id, event = event.name(), "Surface event");

        match event {
            SurfaceEvent::DidStartLoading => {
                handle.set_loading(true);
                let _ = self.lifecycle.send(LifecycleSignal::LoadStart { record_id });
            }
            SurfaceEvent::DidFinishLoad => {
                match self.bridge.record(record_id).await {
                    Ok(record) => {
                        let outcome = self.restorer.restore(handle, &record).await;
                        debug!(record_id = %record_id, tier = outcome.tier(), "Restoration finished");
                    }
                    Err(e) => warn!(record_id = %record_id, error = %e, "Cannot restore, record unreadable"),
                }
                handle.set_restoring(false);
                handle.set_loading(false);
                let _ = self.lifecycle.send(LifecycleSignal::LoadFinish { record_id });
            }
            SurfaceEvent::DidFailLoad { code, description } => {
                warn!(
                    record_id = %record_id,
                    code,
                    description = %description,
                    class = %ErrorClass::RecoverableNavigation,
                    "Load failed, keeping last good frame"
                );
                handle.set_restoring(false);
                handle.set_loading(false);
                if handle.is_live() {
                    self.recorder
                        .record_failure(record_id, SyncEventType::LoadFailed, &code.to_string(), &description)
                        .await;
                }
                let _ = self.lifecycle.send(LifecycleSignal::LoadFail {
                    record_id,
                    code,
                    description,
                });
            }
            event => {
                let name = event.name();
                match self.router.handle_event(handle, event).await {
                    Ok(outcome) => trace!(record_id = %record_id, event = name, outcome = ?outcome, "Routed"),
                    Err(e) => warn!(
                        record_id = %record_id,
                        event = name,
                        error = %e,
                        class = %e.class(),
                        "Navigation event dropped"
                    ),
                }
            }
        }
    }
}
