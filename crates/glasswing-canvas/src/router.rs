//! Navigation Event Router
//!
//! Turns navigation notifications from a surface into record writes and
//! turns popup requests into host requests for a sibling object.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::SyncBridge;
use crate::controller::SurfaceHandle;
use crate::error::Result;
use crate::events::{PopupRedirectedPayload, SyncEventRecorder, SyncEventType};
use crate::record::Position;
use crate::surface::{PopupDecision, SurfaceBackend, SurfaceEvent};
use crate::urls::same_url;

/// Default horizontal gap between a surface and a redirected popup
pub const DEFAULT_POPUP_GAP: f64 = 40.0;

/// Request from the subsystem to the canvas engine
#[derive(Debug, Clone, PartialEq)]
pub enum HostRequest {
    /// Select the object on the canvas
    Select {
        /// Object to select
        record_id: Uuid,
    },
    /// Create a live object next to `source`
    OpenLiveObject {
        /// Object whose surface asked for the popup
        source: Uuid,
        /// Url for the new object
        url: String,
        /// Canvas position for the new object
        position: Position,
    },
}

/// What the router did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The record was written
    Committed,
    /// The record already matched
    Unchanged,
    /// A navigation back to the record url during restoration
    RestorationSkipped,
    /// A popup was turned into a host request
    PopupRedirected,
    /// The popup was left to the surface
    PopupAllowed,
    /// Not a routed event, or the handle is gone
    Ignored,
}

/// Routes surface navigation events into the document
pub struct NavigationRouter {
    backend: Arc<dyn SurfaceBackend>,
    bridge: Arc<SyncBridge>,
    recorder: Arc<SyncEventRecorder>,
    host_tx: mpsc::UnboundedSender<HostRequest>,
    popup_gap: f64,
    allow_popups: bool,
}

impl NavigationRouter {
    /// Create a router sending host requests on `host_tx`
    pub fn new(
        backend: Arc<dyn SurfaceBackend>,
        bridge: Arc<SyncBridge>,
        recorder: Arc<SyncEventRecorder>,
        host_tx: mpsc::UnboundedSender<HostRequest>,
    ) -> Self {
        Self {
            backend,
            bridge,
            recorder,
            host_tx,
            popup_gap: DEFAULT_POPUP_GAP,
            allow_popups: false,
        }
    }

    /// Set the gap used when a popup has no cursor position
    #[must_use]
    pub fn with_popup_gap(mut self, gap: f64) -> Self {
        self.popup_gap = gap;
        self
    }

    /// Let surfaces open their own windows instead of redirecting
    #[must_use]
    pub fn with_allow_popups(mut self, allow: bool) -> Self {
        self.allow_popups = allow;
        self
    }

    /// Route one surface event
    pub async fn handle_event(&self, handle: &SurfaceHandle, event: SurfaceEvent) -> Result<RouteOutcome> {
        if !handle.is_live() {
            return Ok(RouteOutcome::Ignored);
        }
        let record_id = handle.record_id();

        match event {
            SurfaceEvent::DidNavigate { url } => {
                if handle.is_restoring() {
                    let record = self.bridge.record(record_id).await?;
                    if same_url(record.url(), &url) {
                        debug!(record_id = %record_id, url = %url, "Restoration navigation, keeping scroll and snapshot");
                        return Ok(RouteOutcome::RestorationSkipped);
                    }
                }
                if !handle.is_live() {
                    return Ok(RouteOutcome::Ignored);
                }
                if self.bridge.commit_navigation(record_id, &url).await? {
                    self.recorder.record_navigated(record_id, &url, false).await;
                    Ok(RouteOutcome::Committed)
                } else {
                    Ok(RouteOutcome::Unchanged)
                }
            }
            SurfaceEvent::DidNavigateInPage { url } => {
                if self.bridge.commit_in_page_navigation(record_id, &url).await? {
                    self.recorder.record_navigated(record_id, &url, true).await;
                    Ok(RouteOutcome::Committed)
                } else {
                    Ok(RouteOutcome::Unchanged)
                }
            }
            SurfaceEvent::NewSurfaceRequested { url, position } => {
                self.redirect_popup(handle, url, position).await
            }
            _ => Ok(RouteOutcome::Ignored),
        }
    }

    async fn redirect_popup(
        &self,
        handle: &SurfaceHandle,
        url: String,
        cursor: Option<Position>,
    ) -> Result<RouteOutcome> {
        let record_id = handle.record_id();

        if self.allow_popups {
            self.backend
                .resolve_popup(handle.surface_id(), PopupDecision::Allow)
                .await?;
            return Ok(RouteOutcome::PopupAllowed);
        }

        if let Err(e) = self
            .backend
            .resolve_popup(handle.surface_id(), PopupDecision::Deny)
            .await
        {
            warn!(record_id = %record_id, error = %e, "Could not deny popup");
        }

        let source = self.bridge.record(record_id).await?;
        let position = match cursor {
            Some(cursor) => source.position.offset(cursor.x, cursor.y),
            None => source
                .position
                .offset(source.bounds().w + self.popup_gap, 0.0),
        };

        let request = HostRequest::OpenLiveObject {
            source: record_id,
            url: url.clone(),
            position,
        };
        if self.host_tx.send(request).is_err() {
            debug!(record_id = %record_id, "No host listening for popup requests");
        }

        self.recorder
            .record(
                record_id,
                SyncEventType::PopupRedirected,
                serde_json::to_value(PopupRedirectedPayload {
                    url: url.clone(),
                    position,
                })
                .unwrap_or_else(|_| json!({ "url": url })),
            )
            .await;
        info!(record_id = %record_id, url = %url, "Popup redirected to sibling object");

        Ok(RouteOutcome::PopupRedirected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCommand, MockSurfaceBackend};
    use crate::record::ScrollOffset;
    use crate::store::InMemoryDocumentStore;
    use crate::surface::{SandboxPolicy, SurfaceId};
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        backend: Arc<MockSurfaceBackend>,
        bridge: Arc<SyncBridge>,
        store: Arc<InMemoryDocumentStore>,
        router: NavigationRouter,
        host_rx: mpsc::UnboundedReceiver<HostRequest>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MockSurfaceBackend::manual());
        let store = Arc::new(InMemoryDocumentStore::new());
        let bridge = Arc::new(SyncBridge::new(store.clone()));
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let router = NavigationRouter::new(
            backend.clone(),
            bridge.clone(),
            Arc::new(SyncEventRecorder::default()),
            host_tx,
        );
        Fixture {
            backend,
            bridge,
            store,
            router,
            host_rx,
        }
    }

    async fn scrolled_object(f: &Fixture) -> (Uuid, SurfaceHandle) {
        let id = f
            .bridge
            .create_live_object(Some("https://a.example"), Position::new(100.0, 50.0))
            .await
            .unwrap();
        f.bridge
            .apply(
                id,
                crate::record::RecordPatch::new()
                    .with_scroll(ScrollOffset::new(0.0, 400.0))
                    .with_snapshot(Some("<html></html>".into())),
            )
            .await
            .unwrap();
        let surface = f
            .backend
            .create("https://a.example", &SandboxPolicy::default())
            .await
            .unwrap()
            .id;
        (id, SurfaceHandle::new(id, surface, CancellationToken::new()))
    }

    #[tokio::test]
    async fn test_in_page_navigation_keeps_scroll() {
        let f = fixture();
        let (id, handle) = scrolled_object(&f).await;

        let outcome = f
            .router
            .handle_event(
                &handle,
                SurfaceEvent::DidNavigateInPage {
                    url: "https://a.example#section2".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Committed);
        let record = f.bridge.record(id).await.unwrap();
        assert_eq!(record.url(), "https://a.example#section2");
        assert_eq!(record.scroll_offset(), ScrollOffset::new(0.0, 400.0));
        assert!(record.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_top_level_navigation_resets() {
        let f = fixture();
        let (id, handle) = scrolled_object(&f).await;

        f.router
            .handle_event(
                &handle,
                SurfaceEvent::DidNavigate {
                    url: "https://b.example".into(),
                },
            )
            .await
            .unwrap();

        let record = f.bridge.record(id).await.unwrap();
        assert_eq!(record.url(), "https://b.example");
        assert_eq!(record.scroll_offset(), ScrollOffset::ORIGIN);
        assert!(record.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_restoration_navigation_is_not_a_reset() {
        let f = fixture();
        let (id, handle) = scrolled_object(&f).await;
        handle.set_restoring(true);

        let outcome = f
            .router
            .handle_event(
                &handle,
                SurfaceEvent::DidNavigate {
                    url: "https://a.example/".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::RestorationSkipped);
        let record = f.bridge.record(id).await.unwrap();
        assert_eq!(record.scroll_offset(), ScrollOffset::new(0.0, 400.0));
        assert_eq!(f.store.update_count(), 1);
    }

    #[tokio::test]
    async fn test_popup_redirect() {
        let mut f = fixture();
        let (id, handle) = scrolled_object(&f).await;

        let outcome = f
            .router
            .handle_event(
                &handle,
                SurfaceEvent::NewSurfaceRequested {
                    url: "https://popup.example".into(),
                    position: Some(Position::new(10.0, 20.0)),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::PopupRedirected);

        assert_eq!(
            f.host_rx.recv().await.unwrap(),
            HostRequest::OpenLiveObject {
                source: id,
                url: "https://popup.example".into(),
                position: Position::new(110.0, 70.0),
            }
        );
        assert!(f
            .backend
            .commands()
            .contains(&MockCommand::ResolvePopup(handle.surface_id(), PopupDecision::Deny)));
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_popup_without_cursor_goes_beside_source() {
        let mut f = fixture();
        let (_, handle) = scrolled_object(&f).await;

        f.router
            .handle_event(
                &handle,
                SurfaceEvent::NewSurfaceRequested {
                    url: "https://popup.example".into(),
                    position: None,
                },
            )
            .await
            .unwrap();

        let HostRequest::OpenLiveObject { position, .. } = f.host_rx.recv().await.unwrap() else {
            panic!("expected open request");
        };
        assert_eq!(position, Position::new(100.0 + 800.0 + DEFAULT_POPUP_GAP, 50.0));
    }

    #[tokio::test]
    async fn test_dead_handle_is_ignored() {
        let f = fixture();
        let (id, _) = scrolled_object(&f).await;
        let token = CancellationToken::new();
        let handle = SurfaceHandle::new(id, SurfaceId(99), token.clone());
        token.cancel();

        let outcome = f
            .router
            .handle_event(
                &handle,
                SurfaceEvent::DidNavigate {
                    url: "https://b.example".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Ignored);
        assert_eq!(f.bridge.record(id).await.unwrap().url(), "https://a.example");
    }
}
