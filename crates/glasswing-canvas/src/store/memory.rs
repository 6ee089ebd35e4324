//! In-memory document store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::{DocumentChange, DocumentStore, CHANGE_CHANNEL_CAPACITY};
use crate::error::{Error, Result};
use crate::record::{CanvasObjectRecord, LiveProps, ObjectKind, Position, RecordPatch};

/// Document store kept entirely in memory
pub struct InMemoryDocumentStore {
    objects: RwLock<HashMap<Uuid, CanvasObjectRecord>>,
    changes: broadcast::Sender<DocumentChange>,
    update_count: AtomicU64,
}

impl InMemoryDocumentStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            objects: RwLock::new(HashMap::new()),
            changes,
            update_count: AtomicU64::new(0),
        }
    }

    /// Insert a fully formed record, replacing any record with the same id
    pub async fn insert(&self, record: CanvasObjectRecord) {
        let id = record.id;
        self.objects.write().await.insert(id, record);
        let _ = self.changes.send(DocumentChange::Created(id));
    }

    /// Number of `update_object` calls applied so far
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::SeqCst)
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_object(
        &self,
        kind: ObjectKind,
        position: Position,
        props: LiveProps,
    ) -> Result<Uuid> {
        let record = CanvasObjectRecord::new(kind, position, props);
        let id = record.id;
        self.insert(record).await;
        Ok(id)
    }

    async fn update_object(&self, id: Uuid, patch: RecordPatch) -> Result<()> {
        {
            let mut objects = self.objects.write().await;
            let record = objects.get_mut(&id).ok_or(Error::RecordNotFound(id))?;
            record.apply(&patch);
        }
        self.update_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.changes.send(DocumentChange::Updated(id));
        Ok(())
    }

    async fn get_object(&self, id: Uuid) -> Result<Option<CanvasObjectRecord>> {
        Ok(self.objects.read().await.get(&id).cloned())
    }

    async fn delete_object(&self, id: Uuid) -> Result<bool> {
        let removed = self.objects.write().await.remove(&id).is_some();
        if removed {
            let _ = self.changes.send(DocumentChange::Deleted(id));
        }
        Ok(removed)
    }

    async fn list_objects(&self) -> Result<Vec<CanvasObjectRecord>> {
        let objects = self.objects.read().await;
        let mut records: Vec<_> = objects.values().cloned().collect();
        records.sort_by(|a, b| a.props.created_at.cmp(&b.props.created_at));
        Ok(records)
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Bounds, ScrollOffset};

    fn props(url: &str) -> LiveProps {
        LiveProps::new(url, Bounds::default())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryDocumentStore::new();
        let id = store
            .create_object(ObjectKind::LiveSurface, Position::new(10.0, 20.0), props("https://a.example"))
            .await
            .unwrap();

        let record = store.get_object(id).await.unwrap().unwrap();
        assert_eq!(record.url(), "https://a.example");
        assert_eq!(record.position, Position::new(10.0, 20.0));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_merges() {
        let store = InMemoryDocumentStore::new();
        let id = store
            .create_object(ObjectKind::LiveSurface, Position::default(), props("https://a.example"))
            .await
            .unwrap();

        store
            .update_object(id, RecordPatch::new().with_scroll(ScrollOffset::new(0.0, 50.0)))
            .await
            .unwrap();

        let record = store.get_object(id).await.unwrap().unwrap();
        assert_eq!(record.url(), "https://a.example");
        assert_eq!(record.scroll_offset(), ScrollOffset::new(0.0, 50.0));
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .update_object(Uuid::new_v4(), RecordPatch::new().with_url("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "record_not_found");
        assert_eq!(store.update_count(), 0);
    }

    #[tokio::test]
    async fn test_change_notifications() {
        let store = InMemoryDocumentStore::new();
        let mut rx = store.subscribe();

        let id = store
            .create_object(ObjectKind::Note, Position::default(), props(""))
            .await
            .unwrap();
        assert!(store.delete_object(id).await.unwrap());
        assert!(!store.delete_object(id).await.unwrap());

        assert_eq!(rx.recv().await.unwrap(), DocumentChange::Created(id));
        assert_eq!(rx.recv().await.unwrap(), DocumentChange::Deleted(id));
        assert!(store.is_empty().await);
    }
}
