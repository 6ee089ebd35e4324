//! Glasswing Canvas - Live Surface Synchronization
//!
//! This crate keeps embedded live content surfaces (out-of-process web views
//! placed on an infinite canvas) in sync with the persisted canvas document:
//! - Bridge: delta-gated writes from surfaces into the document store
//! - Controller: one live surface per record, mounted after the view is ready
//! - Router: navigation and popup events of a surface
//! - Scheduler: periodic state capture with an in-flight guard
//! - Restore: snapshot head merge and scroll restore after a load
//! - Arbiter: passive/interactive input ownership per object
//! - Canvas: the facade wiring all of the above for a host view layer
//! - Store: document store trait with in-memory and SQLite backends
//! - Events: sync events for audit and replay
//!
//! ## Features
//!
//! - Surfaces survive view re-renders; the document only changes on real deltas
//! - Capture writes are discarded once their surface is torn down
//! - Head resources from the last snapshot are merged back after a reload
//! - Popups become sibling canvas objects instead of OS windows
//! - `cdp` feature: Chromium-backed surfaces over the DevTools Protocol
//!
//! ## Usage
//!
//! ```ignore
//! use glasswing_canvas::{
//!     InMemoryDocumentStore, LiveCanvas, LiveSyncConfig, MockSurfaceBackend, Position,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let backend = Arc::new(MockSurfaceBackend::new());
//! let (canvas, mut host_requests) = LiveCanvas::new(store, backend, LiveSyncConfig::default())?;
//!
//! let id = canvas.create_live_object(Some("https://example.com"), Position::new(0.0, 0.0)).await?;
//! let ready = canvas.view_mounted(id);
//! ready.open();
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [live]
//! capture_interval_ms = 750
//! default_url = "about:blank"
//! popup_gap = 40.0
//!
//! [live.sandbox]
//! javascript = true
//! allow_popups = false
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod arbiter;
pub mod bridge;
pub mod canvas;
#[cfg(feature = "cdp")]
pub mod cdp;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod mock;
pub mod record;
pub mod registry;
pub mod restore;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod surface;
pub mod urls;

// Re-export main types
pub use arbiter::{InputEvent, InputTarget, InteractionArbiter, InteractionMode};
pub use bridge::SyncBridge;
pub use canvas::{LiveCanvas, RenderState};
#[cfg(feature = "cdp")]
pub use cdp::{CdpConfig, CdpSurfaceBackend};
pub use config::LiveSyncConfig;
pub use controller::{LifecycleSignal, ReadyGate, SurfaceController, SurfaceHandle};
pub use error::{Error, ErrorClass, Result};
pub use events::{CaptureTrigger, SyncEvent, SyncEventRecorder, SyncEventType, SyncTimelineEntry};
pub use mock::{MockCommand, MockSurfaceBackend};
pub use record::{
    Bounds, CanvasObjectRecord, CaptureSample, LiveProps, ObjectKind, Position, RecordPatch,
    ScrollOffset,
};
pub use registry::{KindRegistry, ObjectBehavior};
pub use restore::{RestorationEngine, RestoreOutcome};
pub use router::{HostRequest, NavigationRouter, RouteOutcome};
pub use scheduler::{CaptureOutcome, CaptureScheduler, CaptureStats};
pub use store::{DocumentChange, DocumentStore, InMemoryDocumentStore, SqliteDocumentStore};
pub use surface::{
    CreatedSurface, PopupDecision, QueryResult, SandboxPolicy, SurfaceBackend, SurfaceEvent,
    SurfaceId, SurfaceQuery,
};
pub use urls::{normalize_url, same_url};
