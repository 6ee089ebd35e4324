//! SQLite document store
//!
//! Props are kept as a JSON column in the persisted record schema so the
//! stored shape matches what the canvas engine exports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{DocumentChange, DocumentStore, CHANGE_CHANNEL_CAPACITY};
use crate::error::{Error, Result};
use crate::record::{CanvasObjectRecord, LiveProps, ObjectKind, Position, RecordPatch};

/// SQLite-backed document store
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    changes: broadcast::Sender<DocumentChange>,
}

impl SqliteDocumentStore {
    /// Create a store on the given pool. Call [`Self::init`] before use.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    /// Connect to a database url (e.g. `sqlite://glasswing.db?mode=rwc`) and initialize the schema
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS canvas_objects (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                x REAL NOT NULL DEFAULT 0,
                y REAL NOT NULL DEFAULT 0,
                props_json TEXT NOT NULL,
                last_synced_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_canvas_objects_kind ON canvas_objects(kind);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save(&self, record: &CanvasObjectRecord) -> Result<()> {
        let props_json = serde_json::to_string(&record.props)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO canvas_objects
            (id, kind, x, y, props_json, last_synced_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.kind.as_str())
        .bind(record.position.x)
        .bind(record.position.y)
        .bind(&props_json)
        .bind(record.last_synced_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn decode(row: &SqliteRow) -> Result<CanvasObjectRecord> {
        let id: String = row.get("id");
        let kind: String = row.get("kind");
        let x: f64 = row.get("x");
        let y: f64 = row.get("y");
        let props_json: String = row.get("props_json");
        let last_synced_at: Option<String> = row.get("last_synced_at");

        let id = Uuid::parse_str(&id).map_err(|e| Error::database(format!("bad id {id}: {e}")))?;
        let props: LiveProps = serde_json::from_str(&props_json)?;

        Ok(CanvasObjectRecord {
            id,
            kind: kind.parse()?,
            position: Position::new(x, y),
            props,
            last_synced_at: last_synced_at.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }),
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create_object(
        &self,
        kind: ObjectKind,
        position: Position,
        props: LiveProps,
    ) -> Result<Uuid> {
        let record = CanvasObjectRecord::new(kind, position, props);
        self.save(&record).await?;
        let _ = self.changes.send(DocumentChange::Created(record.id));
        Ok(record.id)
    }

    async fn update_object(&self, id: Uuid, patch: RecordPatch) -> Result<()> {
        let mut record = self.get_object(id).await?.ok_or(Error::RecordNotFound(id))?;
        record.apply(&patch);
        self.save(&record).await?;
        let _ = self.changes.send(DocumentChange::Updated(id));
        Ok(())
    }

    async fn get_object(&self, id: Uuid) -> Result<Option<CanvasObjectRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, x, y, props_json, last_synced_at
            FROM canvas_objects
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn delete_object(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM canvas_objects WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            let _ = self.changes.send(DocumentChange::Deleted(id));
        }
        Ok(deleted)
    }

    async fn list_objects(&self) -> Result<Vec<CanvasObjectRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, x, y, props_json, last_synced_at
            FROM canvas_objects
            ORDER BY json_extract(props_json, '$.createdAt') ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode).collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Bounds, ScrollOffset};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqliteDocumentStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let store = SqliteDocumentStore::new(pool);
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_store_init() {
        let _store = setup_test_db().await;
    }

    #[tokio::test]
    async fn test_create_update_load() {
        let store = setup_test_db().await;
        let id = store
            .create_object(
                ObjectKind::LiveSurface,
                Position::new(5.0, 6.0),
                LiveProps::new("https://a.example", Bounds::new(640.0, 480.0)),
            )
            .await
            .unwrap();

        let synced = Utc::now();
        store
            .update_object(
                id,
                RecordPatch::new()
                    .with_scroll(ScrollOffset::new(0.0, 300.0))
                    .with_snapshot(Some("<html><head></head></html>".into()))
                    .stamped(synced),
            )
            .await
            .unwrap();

        let record = store.get_object(id).await.unwrap().unwrap();
        assert_eq!(record.kind, ObjectKind::LiveSurface);
        assert_eq!(record.position, Position::new(5.0, 6.0));
        assert_eq!(record.bounds(), Bounds::new(640.0, 480.0));
        assert_eq!(record.scroll_offset(), ScrollOffset::new(0.0, 300.0));
        assert_eq!(record.snapshot(), Some("<html><head></head></html>"));
        assert!(record.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = setup_test_db().await;
        let mut rx = store.subscribe();

        let a = store
            .create_object(ObjectKind::LiveSurface, Position::default(), LiveProps::new("https://a.example", Bounds::default()))
            .await
            .unwrap();
        let b = store
            .create_object(ObjectKind::Note, Position::default(), LiveProps::new("", Bounds::default()))
            .await
            .unwrap();

        assert_eq!(store.list_objects().await.unwrap().len(), 2);
        assert!(store.delete_object(a).await.unwrap());
        assert!(store.get_object(a).await.unwrap().is_none());

        let remaining = store.list_objects().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);

        assert_eq!(rx.recv().await.unwrap(), DocumentChange::Created(a));
        assert_eq!(rx.recv().await.unwrap(), DocumentChange::Created(b));
        assert_eq!(rx.recv().await.unwrap(), DocumentChange::Deleted(a));
    }

    #[tokio::test]
    async fn test_update_missing() {
        let store = setup_test_db().await;
        let err = store
            .update_object(Uuid::new_v4(), RecordPatch::new().with_url("https://x.example"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }
}
