//! Interaction Mode Arbiter
//!
//! Decides, per live object, whether input goes to the canvas (select, move,
//! resize) or into the surface (browsing).
//!
//! ```text
//!            double-click / enter()
//!   Passive ─────────────────────────▶ Interactive
//!      ▲                                   │
//!      └──── capture_now, then commit ─────┘
//!            Escape / pointer-down outside / exit()
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::SurfaceController;
use crate::events::{CaptureTrigger, SyncEventRecorder};
use crate::router::HostRequest;
use crate::scheduler::{CaptureOutcome, CaptureScheduler};

/// Who receives input for an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Input goes to the canvas; a capture layer covers the surface
    Passive,
    /// Input goes to the surface
    Interactive,
}

impl InteractionMode {
    /// Get the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Interactive => "interactive",
        }
    }
}

impl std::fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input delivered to an object's view
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Pointer pressed; `inside` is false when outside the object's bounds
    PointerDown {
        /// Whether the press landed on the object
        inside: bool,
    },
    /// Pointer moved
    PointerMove,
    /// Pointer released
    PointerUp,
    /// Wheel scrolled
    Wheel {
        /// Horizontal delta
        dx: f64,
        /// Vertical delta
        dy: f64,
    },
    /// Single click
    Click,
    /// Double click
    DoubleClick,
    /// Key press, by key name (`"Escape"`, `"a"`)
    Key(String),
}

/// Where an input event should be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputTarget {
    /// Canvas handles it (select, drag, resize, zoom)
    Canvas,
    /// Forward to the live surface
    Surface,
}

/// Two-state input arbiter for one live object
pub struct InteractionArbiter {
    record_id: Uuid,
    mode: watch::Sender<InteractionMode>,
    transition: Mutex<()>,
    controller: Arc<SurfaceController>,
    scheduler: Arc<CaptureScheduler>,
    recorder: Arc<SyncEventRecorder>,
    host_tx: mpsc::UnboundedSender<HostRequest>,
}

impl InteractionArbiter {
    /// Create an arbiter in passive mode
    pub fn new(
        record_id: Uuid,
        controller: Arc<SurfaceController>,
        scheduler: Arc<CaptureScheduler>,
        recorder: Arc<SyncEventRecorder>,
        host_tx: mpsc::UnboundedSender<HostRequest>,
    ) -> Self {
        let (mode, _) = watch::channel(InteractionMode::Passive);
        Self {
            record_id,
            mode,
            transition: Mutex::new(()),
            controller,
            scheduler,
            recorder,
            host_tx,
        }
    }

    /// Object this arbiter belongs to
    #[must_use]
    pub fn record_id(&self) -> Uuid {
        self.record_id
    }

    /// Current mode
    #[must_use]
    pub fn mode(&self) -> InteractionMode {
        *self.mode.borrow()
    }

    /// Watch mode changes
    pub fn subscribe(&self) -> watch::Receiver<InteractionMode> {
        self.mode.subscribe()
    }

    /// Whether the transparent capture layer covers the surface
    #[must_use]
    pub fn capture_layer_visible(&self) -> bool {
        self.mode() == InteractionMode::Passive
    }

    /// Whether canvas drag and resize are suppressed
    #[must_use]
    pub fn canvas_gestures_suppressed(&self) -> bool {
        self.mode() == InteractionMode::Interactive
    }

    /// Route one input event, performing any transition it triggers
    pub async fn handle_input(&self, event: InputEvent) -> InputTarget {
        match self.mode() {
            InteractionMode::Passive => match event {
                InputEvent::DoubleClick if self.enter().await => InputTarget::Surface,
                _ => InputTarget::Canvas,
            },
            InteractionMode::Interactive => match event {
                InputEvent::Key(key) if key == "Escape" => {
                    self.exit().await;
                    InputTarget::Canvas
                }
                InputEvent::PointerDown { inside: false } => {
                    self.exit().await;
                    InputTarget::Canvas
                }
                _ => InputTarget::Surface,
            },
        }
    }

    /// Enter interactive mode. Returns false if already interactive or
    /// nothing is mounted to interact with.
    pub async fn enter(&self) -> bool {
        let _guard = self.transition.lock().await;
        if self.mode() == InteractionMode::Interactive {
            debug!(record_id = %self.record_id, "Already interactive");
            return false;
        }
        if self.controller.handle(self.record_id).is_none() {
            debug!(record_id = %self.record_id, "No live surface mounted, staying passive");
            return false;
        }

        self.mode.send_replace(InteractionMode::Interactive);
        if self
            .host_tx
            .send(HostRequest::Select {
                record_id: self.record_id,
            })
            .is_err()
        {
            debug!(record_id = %self.record_id, "No host listening for select requests");
        }
        self.recorder
            .record_mode_changed(
                self.record_id,
                InteractionMode::Passive.as_str(),
                InteractionMode::Interactive.as_str(),
            )
            .await;
        info!(record_id = %self.record_id, "Entered interactive mode");
        true
    }

    /// Leave interactive mode, capturing surface state first.
    ///
    /// The transition completes even if the capture fails.
    pub async fn exit(&self) -> bool {
        let _guard = self.transition.lock().await;
        if self.mode() == InteractionMode::Passive {
            return false;
        }

        if let Some(handle) = self.controller.handle(self.record_id) {
            let outcome = self
                .scheduler
                .capture_now(&handle, CaptureTrigger::ModeExit)
                .await;
            if outcome == CaptureOutcome::Failed {
                warn!(record_id = %self.record_id, "Exit capture failed, leaving interactive mode anyway");
            }
        }

        self.mode.send_replace(InteractionMode::Passive);
        self.recorder
            .record_mode_changed(
                self.record_id,
                InteractionMode::Interactive.as_str(),
                InteractionMode::Passive.as_str(),
            )
            .await;
        info!(record_id = %self.record_id, "Returned to passive mode");
        true
    }
}
