//! Document Sync Bridge
//!
//! The only writer of persisted live object state. Every write is gated on a
//! real difference from the stored record, and every committed write is
//! stamped with a `last_synced_at` that never moves backwards.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::record::{Bounds, CanvasObjectRecord, CaptureSample, LiveProps, ObjectKind, Position, RecordPatch};
use crate::store::DocumentStore;

/// Reads and writes canonical object records
pub struct SyncBridge {
    store: Arc<dyn DocumentStore>,
    default_url: String,
    default_bounds: Bounds,
}

impl SyncBridge {
    /// Create a bridge over a document store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            default_url: "about:blank".to_string(),
            default_bounds: Bounds::default(),
        }
    }

    /// Set the defaults given to new live objects
    #[must_use]
    pub fn with_defaults(mut self, url: impl Into<String>, bounds: Bounds) -> Self {
        self.default_url = url.into();
        self.default_bounds = bounds;
        self
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Load a record, failing when it does not exist
    pub async fn record(&self, id: Uuid) -> Result<CanvasObjectRecord> {
        self.store
            .get_object(id)
            .await?
            .ok_or(Error::RecordNotFound(id))
    }

    /// Create a live object at `position`. `url` falls back to the configured default.
    pub async fn create_live_object(&self, url: Option<&str>, position: Position) -> Result<Uuid> {
        let url = url.unwrap_or(&self.default_url);
        let props = LiveProps::new(url, self.default_bounds);
        let id = self
            .store
            .create_object(ObjectKind::LiveSurface, position, props)
            .await?;
        debug!(record_id = %id, url = %url, "Created live object");
        Ok(id)
    }

    /// Delete an object from the store
    pub async fn delete_object(&self, id: Uuid) -> Result<bool> {
        self.store.delete_object(id).await
    }

    /// Apply a patch if it changes anything. Returns whether a write happened.
    pub async fn apply(&self, id: Uuid, patch: RecordPatch) -> Result<bool> {
        self.apply_while(id, patch, || true).await
    }

    /// Like [`Self::apply`], but `live` is checked again just before the
    /// write; when it turns false the write is dropped with `StaleHandle`.
    #[instrument(skip(self, patch, live), fields(record_id = %id))]
    pub async fn apply_while<F>(&self, id: Uuid, patch: RecordPatch, live: F) -> Result<bool>
    where
        F: Fn() -> bool + Send,
    {
        let current = self.record(id).await?;
        if !patch.differs_from(&current) {
            debug!("Patch matches stored record, skipping write");
            return Ok(false);
        }
        if !live() {
            debug!("Writer went away, dropping patch");
            return Err(Error::StaleHandle(id));
        }

        let now = Utc::now();
        let synced_at = current.last_synced_at.map_or(now, |prev| prev.max(now));
        self.store.update_object(id, patch.stamped(synced_at)).await?;
        Ok(true)
    }

    /// Commit a top-level navigation: url set, scroll reset, snapshot cleared
    pub async fn commit_navigation(&self, id: Uuid, url: &str) -> Result<bool> {
        self.apply(id, RecordPatch::navigation(url)).await
    }

    /// Commit an in-page navigation: url only
    pub async fn commit_in_page_navigation(&self, id: Uuid, url: &str) -> Result<bool> {
        self.apply(id, RecordPatch::new().with_url(url)).await
    }

    /// Commit a capture sample when its scroll or url differ from the record
    pub async fn commit_capture(&self, id: Uuid, sample: &CaptureSample) -> Result<bool> {
        self.commit_capture_while(id, sample, || true).await
    }

    /// Commit a capture sample for as long as `live` holds
    pub async fn commit_capture_while<F>(&self, id: Uuid, sample: &CaptureSample, live: F) -> Result<bool>
    where
        F: Fn() -> bool + Send,
    {
        let current = self.record(id).await?;
        if !sample.differs_from(&current) {
            debug!(record_id = %id, "Capture unchanged, skipping write");
            return Ok(false);
        }
        self.apply_while(id, sample.to_patch(), live).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ScrollOffset;
    use crate::store::{InMemoryDocumentStore, MockDocumentStore};
    use chrono::Duration;

    fn live_record(url: &str) -> CanvasObjectRecord {
        CanvasObjectRecord::new(
            ObjectKind::LiveSurface,
            Position::default(),
            LiveProps::new(url, Bounds::default()),
        )
    }

    fn sample(url: &str, y: f64) -> CaptureSample {
        CaptureSample {
            scroll_x: 0.0,
            scroll_y: y,
            serialized_content: Some("<html><head></head></html>".into()),
            current_url: url.into(),
        }
    }

    #[tokio::test]
    async fn test_identical_samples_write_once() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let bridge = SyncBridge::new(store.clone());
        let id = bridge
            .create_live_object(Some("https://a.example"), Position::default())
            .await
            .unwrap();

        let s = sample("https://a.example", 120.0);
        assert!(bridge.commit_capture(id, &s).await.unwrap());
        assert!(!bridge.commit_capture(id, &s).await.unwrap());
        assert!(!bridge.commit_capture(id, &s).await.unwrap());

        assert_eq!(store.update_count(), 1);
        let record = bridge.record(id).await.unwrap();
        assert_eq!(record.scroll_offset(), ScrollOffset::new(0.0, 120.0));
        assert!(record.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_content_only_change_does_not_write() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let bridge = SyncBridge::new(store.clone());
        let id = bridge
            .create_live_object(Some("https://a.example"), Position::default())
            .await
            .unwrap();

        let mut s = sample("https://a.example", 0.0);
        s.serialized_content = Some("<html>mutated</html>".into());
        assert!(!bridge.commit_capture(id, &s).await.unwrap());
        assert_eq!(store.update_count(), 0);
    }

    #[tokio::test]
    async fn test_navigation_resets_scroll_and_snapshot() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let bridge = SyncBridge::new(store.clone());
        let id = bridge
            .create_live_object(Some("https://a.example"), Position::default())
            .await
            .unwrap();
        bridge
            .commit_capture(id, &sample("https://a.example", 300.0))
            .await
            .unwrap();

        assert!(bridge.commit_navigation(id, "https://b.example").await.unwrap());

        let record = bridge.record(id).await.unwrap();
        assert_eq!(record.url(), "https://b.example");
        assert_eq!(record.scroll_offset(), ScrollOffset::ORIGIN);
        assert!(record.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_synced_at_never_decreases() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let future = Utc::now() + Duration::hours(1);
        let mut record = live_record("https://a.example");
        record.last_synced_at = Some(future);
        let id = record.id;
        store.insert(record).await;

        let bridge = SyncBridge::new(store.clone());
        bridge.commit_in_page_navigation(id, "https://a.example#x").await.unwrap();

        let record = bridge.record(id).await.unwrap();
        assert_eq!(record.last_synced_at, Some(future));
    }

    #[tokio::test]
    async fn test_unchanged_patch_skips_store() {
        let record = live_record("https://a.example");
        let id = record.id;

        let mut store = MockDocumentStore::new();
        store
            .expect_get_object()
            .returning(move |_| Ok(Some(record.clone())));
        store.expect_update_object().never();

        let bridge = SyncBridge::new(Arc::new(store));
        assert!(!bridge
            .commit_in_page_navigation(id, "https://a.example")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let record = live_record("https://a.example");
        let id = record.id;

        let mut store = MockDocumentStore::new();
        store
            .expect_get_object()
            .returning(move |_| Ok(Some(record.clone())));
        store
            .expect_update_object()
            .times(1)
            .returning(|_, _| Err(Error::database("disk full")));

        let bridge = SyncBridge::new(Arc::new(store));
        let err = bridge
            .commit_navigation(id, "https://b.example")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "database_error");
    }

    #[tokio::test]
    async fn test_guard_checked_before_write() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let bridge = SyncBridge::new(store.clone());
        let id = bridge
            .create_live_object(Some("https://a.example"), Position::default())
            .await
            .unwrap();

        let live = std::sync::atomic::AtomicBool::new(false);
        let err = bridge
            .commit_capture_while(id, &sample("https://a.example", 90.0), || {
                live.load(std::sync::atomic::Ordering::SeqCst)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleHandle(_)));
        assert_eq!(store.update_count(), 0);

        live.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(bridge
            .commit_capture_while(id, &sample("https://a.example", 90.0), || {
                live.load(std::sync::atomic::Ordering::SeqCst)
            })
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_record() {
        let bridge = SyncBridge::new(Arc::new(InMemoryDocumentStore::new()));
        let err = bridge.record(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }
}
