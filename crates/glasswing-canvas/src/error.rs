//! Error types for glasswing-canvas
//!
//! Every failure in the live surface subsystem is classified into one of a
//! handful of recoverable classes. Components catch errors at their own call
//! sites and turn them into a log line plus a no-op; the classes exist so the
//! log line says which kind of degradation happened.

use thiserror::Error;
use uuid::Uuid;

/// Failure class used when logging and when deciding whether to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// A capture poll failed; the tick is skipped
    RecoverableQuery,
    /// A snapshot merge failed; restoration degrades to scroll-only
    RecoverableRestore,
    /// The surface reported a failed load; the last good frame stays
    RecoverableNavigation,
    /// The surface could not be created; the object renders as a placeholder
    RecoverableMount,
    /// A guard caught a call that must never happen (double mount, write after unmount)
    ProgrammingInvariant,
    /// The document store rejected a read or write
    Storage,
}

impl ErrorClass {
    /// Get the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecoverableQuery => "recoverable_query",
            Self::RecoverableRestore => "recoverable_restore",
            Self::RecoverableNavigation => "recoverable_navigation",
            Self::RecoverableMount => "recoverable_mount",
            Self::ProgrammingInvariant => "programming_invariant",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canvas error type
#[derive(Debug, Error)]
pub enum Error {
    /// Record not found in the document store
    #[error("record not found: {0}")]
    RecordNotFound(Uuid),

    /// No live surface is mounted for the record
    #[error("no live surface mounted for record: {0}")]
    NotMounted(Uuid),

    /// The handle belongs to a surface instance that has been torn down
    #[error("stale surface handle for record: {0}")]
    StaleHandle(Uuid),

    /// The record's kind does not host a live surface
    #[error("object kind `{0}` does not host a live surface")]
    UnsupportedKind(String),

    /// The surface backend could not create a surface
    #[error("surface creation failed: {0}")]
    SurfaceCreate(String),

    /// The surface backend does not know the surface id
    #[error("surface not found: {0}")]
    SurfaceNotFound(String),

    /// A query against the surface failed
    #[error("surface query failed: {0}")]
    Query(String),

    /// A navigation command failed or the surface reported a failed load
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Snapshot merge failed
    #[error("restore failed: {0}")]
    Restore(String),

    /// The given url cannot be turned into an absolute url
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a surface creation error
    #[must_use]
    pub fn surface_create(msg: impl Into<String>) -> Self {
        Self::SurfaceCreate(msg.into())
    }

    /// Create a query error
    #[must_use]
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a navigation error
    #[must_use]
    pub fn navigation(msg: impl Into<String>) -> Self {
        Self::Navigation(msg.into())
    }

    /// Create a restore error
    #[must_use]
    pub fn restore(msg: impl Into<String>) -> Self {
        Self::Restore(msg.into())
    }

    /// Create a database error
    #[must_use]
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an invalid url error
    #[must_use]
    pub fn invalid_url(msg: impl Into<String>) -> Self {
        Self::InvalidUrl(msg.into())
    }

    /// Classify the error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Query(_) | Self::SurfaceNotFound(_) => ErrorClass::RecoverableQuery,
            Self::Restore(_) => ErrorClass::RecoverableRestore,
            Self::Navigation(_) | Self::InvalidUrl(_) => ErrorClass::RecoverableNavigation,
            Self::SurfaceCreate(_) | Self::UnsupportedKind(_) => ErrorClass::RecoverableMount,
            Self::NotMounted(_) | Self::StaleHandle(_) | Self::InvalidConfig(_) | Self::Internal(_) => {
                ErrorClass::ProgrammingInvariant
            }
            Self::RecordNotFound(_) | Self::Database(_) | Self::Serialization(_) => {
                ErrorClass::Storage
            }
        }
    }

    /// Check if error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.class(), ErrorClass::ProgrammingInvariant)
    }

    /// Get a stable error code for logs and event payloads
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RecordNotFound(_) => "record_not_found",
            Self::NotMounted(_) => "not_mounted",
            Self::StaleHandle(_) => "stale_handle",
            Self::UnsupportedKind(_) => "unsupported_kind",
            Self::SurfaceCreate(_) => "surface_create_failed",
            Self::SurfaceNotFound(_) => "surface_not_found",
            Self::Query(_) => "query_failed",
            Self::Navigation(_) => "navigation_failed",
            Self::Restore(_) => "restore_failed",
            Self::InvalidUrl(_) => "invalid_url",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Database(_) => "database_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for canvas operations
pub type Result<T> = std::result::Result<T, Error>;
