//! Restoration Engine
//!
//! After a surface finishes loading, bring back what the record remembers:
//! head resources from the captured snapshot that the fresh document lacks,
//! then the scroll offset. The snapshot is only a hint, so the merge adds
//! missing resources and never replaces the live document.
//!
//! Tiers degrade in order: full merge, scroll only, nothing. No error leaves
//! this module.

use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::controller::SurfaceHandle;
use crate::error::{Error, Result};
use crate::events::{RestorePayload, SyncEventRecorder, SyncEventType};
use crate::record::CanvasObjectRecord;
use crate::surface::{QueryResult, SurfaceBackend, SurfaceQuery};

/// Head-level elements carried over from a snapshot
const HEAD_RESOURCE_SELECTOR: &str = r#"head script, head link[rel~="stylesheet"], head style"#;

/// How far restoration got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Snapshot merged; `inserted` resources were missing from the live document
    Merged {
        /// Resources inserted
        inserted: usize,
    },
    /// No snapshot, or the merge failed; scroll was restored
    ScrollOnly,
    /// Scroll restoration failed too
    Failed,
    /// The handle was torn down before restoration could act
    Skipped,
}

impl RestoreOutcome {
    /// Tier name for logs and events
    #[must_use]
    pub fn tier(&self) -> &'static str {
        match self {
            Self::Merged { .. } => "merged",
            Self::ScrollOnly => "scroll_only",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Serialized head resources of a snapshot, deduplicated, in document order
pub fn snapshot_head_resources(snapshot: &str) -> Result<Vec<String>> {
    let selector = Selector::parse(HEAD_RESOURCE_SELECTOR)
        .map_err(|e| Error::restore(format!("invalid head selector: {e:?}")))?;
    let document = Html::parse_document(snapshot);

    let mut seen = HashSet::new();
    Ok(document
        .select(&selector)
        .map(|element| element.html())
        .filter(|html| seen.insert(html.clone()))
        .collect())
}

/// Merges snapshots back into live surfaces
pub struct RestorationEngine {
    backend: Arc<dyn SurfaceBackend>,
    recorder: Arc<SyncEventRecorder>,
}

impl RestorationEngine {
    /// Create an engine
    pub fn new(backend: Arc<dyn SurfaceBackend>, recorder: Arc<SyncEventRecorder>) -> Self {
        Self { backend, recorder }
    }

    /// Restore `record` into the surface behind `handle`
    pub async fn restore(&self, handle: &SurfaceHandle, record: &CanvasObjectRecord) -> RestoreOutcome {
        let record_id = handle.record_id();
        if !handle.is_live() {
            return RestoreOutcome::Skipped;
        }

        let merged = match record.snapshot() {
            Some(snapshot) => match self.merge(handle, snapshot).await {
                Ok(inserted) => Some(inserted),
                Err(e) => {
                    warn!(record_id = %record_id, error = %e, class = %e.class(), "Snapshot merge failed, restoring scroll only");
                    if handle.is_live() {
                        self.recorder
                            .record_failure(record_id, SyncEventType::RestoreDegraded, e.code(), &e.to_string())
                            .await;
                    }
                    None
                }
            },
            None => None,
        };

        if !handle.is_live() {
            return RestoreOutcome::Skipped;
        }

        let scroll = record.scroll_offset();
        let scrolled = match self
            .backend
            .execute(
                handle.surface_id(),
                SurfaceQuery::ScrollTo {
                    x: scroll.x,
                    y: scroll.y,
                },
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(record_id = %record_id, error = %e, "Scroll restoration failed");
                false
            }
        };

        let outcome = match (merged, scrolled) {
            (Some(inserted), _) => RestoreOutcome::Merged { inserted },
            (None, true) => RestoreOutcome::ScrollOnly,
            (None, false) => RestoreOutcome::Failed,
        };

        if handle.is_live() {
            let inserted = merged.unwrap_or(0);
            self.recorder
                .record(
                    record_id,
                    SyncEventType::RestoreCompleted,
                    serde_json::to_value(RestorePayload {
                        tier: outcome.tier().to_string(),
                        inserted,
                    })
                    .unwrap_or_default(),
                )
                .await;
        }
        outcome
    }

    async fn merge(&self, handle: &SurfaceHandle, snapshot: &str) -> Result<usize> {
        let wanted = snapshot_head_resources(snapshot)?;
        if wanted.is_empty() {
            return Ok(0);
        }

        let live = match self
            .backend
            .execute(handle.surface_id(), SurfaceQuery::HeadResources)
            .await
            .map_err(|e| Error::restore(e.to_string()))?
        {
            QueryResult::HeadResources(live) => live,
            other => {
                return Err(Error::restore(format!(
                    "unexpected answer to head_resources: {other:?}"
                )))
            }
        };

        let present: HashSet<&str> = live.iter().map(String::as_str).collect();
        let missing: Vec<String> = wanted
            .into_iter()
            .filter(|resource| !present.contains(resource.as_str()))
            .collect();
        if missing.is_empty() {
            debug!(record_id = %handle.record_id(), "Live document already has every snapshot resource");
            return Ok(0);
        }
        if !handle.is_live() {
            return Ok(0);
        }

        let count = missing.len();
        match self
            .backend
            .execute(handle.surface_id(), SurfaceQuery::InsertHeadResources(missing))
            .await
            .map_err(|e| Error::restore(e.to_string()))?
        {
            QueryResult::Inserted(inserted) => Ok(inserted),
            _ => Ok(count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSurfaceBackend;
    use crate::record::{Bounds, LiveProps, ObjectKind, Position};
    use crate::surface::SandboxPolicy;
    use tokio_util::sync::CancellationToken;

    const SNAPSHOT: &str = concat!(
        "<html><head>",
        "<style>body{margin:0}</style>",
        r#"<link rel="stylesheet" href="/app.css">"#,
        "<script>window.app=1</script>",
        "<style>body{margin:0}</style>",
        "<title>ignored</title>",
        "</head><body><script>not head</script></body></html>"
    );

    fn record_with(snapshot: Option<&str>, scroll_y: f64) -> CanvasObjectRecord {
        let mut props = LiveProps::new("https://a.example", Bounds::default());
        props.snapshot = snapshot.map(str::to_string);
        props.scroll_y = scroll_y;
        CanvasObjectRecord::new(ObjectKind::LiveSurface, Position::default(), props)
    }

    async fn mounted(backend: &MockSurfaceBackend, record: &CanvasObjectRecord) -> SurfaceHandle {
        let id = backend
            .create(record.url(), &SandboxPolicy::default())
            .await
            .unwrap()
            .id;
        SurfaceHandle::new(record.id, id, CancellationToken::new())
    }

    #[test]
    fn test_snapshot_head_resources() {
        let resources = snapshot_head_resources(SNAPSHOT).unwrap();
        assert_eq!(
            resources,
            vec![
                "<style>body{margin:0}</style>".to_string(),
                r#"<link rel="stylesheet" href="/app.css">"#.to_string(),
                "<script>window.app=1</script>".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_merge_inserts_only_missing() {
        let backend = Arc::new(MockSurfaceBackend::new());
        backend.set_page_head(
            "https://a.example",
            vec!["<style>body{margin:0}</style>".to_string()],
        );
        let engine = RestorationEngine::new(backend.clone(), Arc::new(SyncEventRecorder::default()));
        let record = record_with(Some(SNAPSHOT), 250.0);
        let handle = mounted(&backend, &record).await;

        let outcome = engine.restore(&handle, &record).await;

        assert_eq!(outcome, RestoreOutcome::Merged { inserted: 2 });
        assert_eq!(backend.head_of(handle.surface_id()).unwrap().len(), 3);
        assert_eq!(
            backend.scroll_of(handle.surface_id()).unwrap().y,
            250.0
        );
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        let backend = Arc::new(MockSurfaceBackend::new());
        let engine = RestorationEngine::new(backend.clone(), Arc::new(SyncEventRecorder::default()));
        let record = record_with(Some(SNAPSHOT), 0.0);
        let handle = mounted(&backend, &record).await;

        engine.restore(&handle, &record).await;
        let once: HashSet<String> = backend
            .head_of(handle.surface_id())
            .unwrap()
            .into_iter()
            .collect();

        let second = engine.restore(&handle, &record).await;
        let twice: HashSet<String> = backend
            .head_of(handle.surface_id())
            .unwrap()
            .into_iter()
            .collect();

        assert_eq!(second, RestoreOutcome::Merged { inserted: 0 });
        assert_eq!(once, twice);
        assert_eq!(backend.head_of(handle.surface_id()).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_no_snapshot_is_scroll_only() {
        let backend = Arc::new(MockSurfaceBackend::new());
        let engine = RestorationEngine::new(backend.clone(), Arc::new(SyncEventRecorder::default()));
        let record = record_with(None, 90.0);
        let handle = mounted(&backend, &record).await;

        assert_eq!(engine.restore(&handle, &record).await, RestoreOutcome::ScrollOnly);
        assert_eq!(backend.scroll_of(handle.surface_id()).unwrap().y, 90.0);
    }

    #[tokio::test]
    async fn test_merge_failure_degrades() {
        let backend = Arc::new(MockSurfaceBackend::new());
        let recorder = Arc::new(SyncEventRecorder::default());
        let engine = RestorationEngine::new(backend.clone(), recorder.clone());
        let record = record_with(Some(SNAPSHOT), 60.0);
        let handle = mounted(&backend, &record).await;

        backend.fail_next("head_resources", 1);
        assert_eq!(engine.restore(&handle, &record).await, RestoreOutcome::ScrollOnly);
        assert_eq!(backend.scroll_of(handle.surface_id()).unwrap().y, 60.0);
        assert_eq!(
            recorder.count_of(record.id, SyncEventType::RestoreDegraded).await,
            1
        );

        backend.fail_next("head_resources", 1);
        backend.fail_next("scroll_to", 1);
        assert_eq!(engine.restore(&handle, &record).await, RestoreOutcome::Failed);
    }

    #[tokio::test]
    async fn test_dead_handle_skips() {
        let backend = Arc::new(MockSurfaceBackend::new());
        let engine = RestorationEngine::new(backend.clone(), Arc::new(SyncEventRecorder::default()));
        let record = record_with(Some(SNAPSHOT), 60.0);
        let handle = mounted(&backend, &record).await;
        handle.token().cancel();

        assert_eq!(engine.restore(&handle, &record).await, RestoreOutcome::Skipped);
        assert!(backend.head_of(handle.surface_id()).unwrap().is_empty());
    }
}
