//! Document Store
//!
//! The document store is the system of record for canvas objects. It belongs
//! to the canvas engine; this subsystem only consumes it through
//! [`DocumentStore`]. Two implementations ship with the crate: an in-memory
//! store for hosts that persist elsewhere, and a SQLite store.

mod memory;
mod sqlite;

pub use memory::InMemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::record::{CanvasObjectRecord, LiveProps, ObjectKind, Position, RecordPatch};

/// Capacity of the change broadcast channel
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Change notification emitted by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentChange {
    /// An object was created
    Created(Uuid),
    /// An object was updated
    Updated(Uuid),
    /// An object was deleted
    Deleted(Uuid),
}

impl DocumentChange {
    /// The object the change concerns
    #[must_use]
    pub fn record_id(&self) -> Uuid {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::Deleted(id) => *id,
        }
    }
}

/// External document store consumed by the sync bridge
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create an object and return its id
    async fn create_object(
        &self,
        kind: ObjectKind,
        position: Position,
        props: LiveProps,
    ) -> Result<Uuid>;

    /// Merge a partial update into an object
    async fn update_object(&self, id: Uuid, patch: RecordPatch) -> Result<()>;

    /// Read an object
    async fn get_object(&self, id: Uuid) -> Result<Option<CanvasObjectRecord>>;

    /// Delete an object, returning whether it existed
    async fn delete_object(&self, id: Uuid) -> Result<bool>;

    /// List every object
    async fn list_objects(&self) -> Result<Vec<CanvasObjectRecord>>;

    /// Subscribe to change notifications
    fn subscribe(&self) -> broadcast::Receiver<DocumentChange>;
}
