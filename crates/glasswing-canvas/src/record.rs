//! Canvas Object Records
//!
//! This module defines the persisted shape of a canvas object as the
//! document store sees it, the partial patch used to update it, and the
//! transient capture sample polled from a live surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Enumerated object kinds on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Embedded live content surface
    LiveSurface,
    /// Markdown note
    Note,
    /// Search result card
    SearchCard,
}

impl ObjectKind {
    /// Get the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LiveSurface => "live_surface",
            Self::Note => "note",
            Self::SearchCard => "search_card",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live_surface" => Ok(Self::LiveSurface),
            "note" => Ok(Self::Note),
            "search_card" => Ok(Self::SearchCard),
            other => Err(Error::UnsupportedKind(other.to_string())),
        }
    }
}

/// Position of an object on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal canvas coordinate
    pub x: f64,
    /// Vertical canvas coordinate
    pub y: f64,
}

impl Position {
    /// Create a position
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Offset this position by a delta
    #[must_use]
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// Width and height of an object
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Width
    pub w: f64,
    /// Height
    pub h: f64,
}

impl Bounds {
    /// Create bounds
    #[must_use]
    pub fn new(w: f64, h: f64) -> Self {
        Self { w, h }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self { w: 800.0, h: 600.0 }
    }
}

/// Scroll offset of a surface's content
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollOffset {
    /// Horizontal scroll
    pub x: f64,
    /// Vertical scroll
    pub y: f64,
}

impl ScrollOffset {
    /// Top-left of the document
    pub const ORIGIN: Self = Self { x: 0.0, y: 0.0 };

    /// Create a scroll offset
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Persisted props of a canvas object.
///
/// Serialized as `{ w, h, url, scrollX, scrollY, snapshot?, createdAt }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveProps {
    /// Width
    pub w: f64,
    /// Height
    pub h: f64,
    /// Current top-level navigation target
    pub url: String,
    /// Last known horizontal scroll
    pub scroll_x: f64,
    /// Last known vertical scroll
    pub scroll_y: f64,
    /// Serialized DOM used as a restoration hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    /// When the object was created
    pub created_at: DateTime<Utc>,
}

impl LiveProps {
    /// Fresh props at the given url with zero scroll and no snapshot
    #[must_use]
    pub fn new(url: impl Into<String>, bounds: Bounds) -> Self {
        Self {
            w: bounds.w,
            h: bounds.h,
            url: url.into(),
            scroll_x: 0.0,
            scroll_y: 0.0,
            snapshot: None,
            created_at: Utc::now(),
        }
    }

    /// Scroll offset as a value
    #[must_use]
    pub fn scroll_offset(&self) -> ScrollOffset {
        ScrollOffset::new(self.scroll_x, self.scroll_y)
    }

    /// Bounds as a value
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.w, self.h)
    }
}

/// A canvas object as stored by the document store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasObjectRecord {
    /// Stable identifier
    pub id: Uuid,
    /// Object kind
    pub kind: ObjectKind,
    /// Canvas position
    pub position: Position,
    /// Persisted props
    pub props: LiveProps,
    /// When the last write was committed
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CanvasObjectRecord {
    /// Create a record with a fresh ID
    #[must_use]
    pub fn new(kind: ObjectKind, position: Position, props: LiveProps) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            position,
            props,
            last_synced_at: None,
        }
    }

    /// Create with a specific ID
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Current url
    #[must_use]
    pub fn url(&self) -> &str {
        &self.props.url
    }

    /// Current scroll offset
    #[must_use]
    pub fn scroll_offset(&self) -> ScrollOffset {
        self.props.scroll_offset()
    }

    /// Current snapshot, if any
    #[must_use]
    pub fn snapshot(&self) -> Option<&str> {
        self.props.snapshot.as_deref()
    }

    /// Current bounds
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        self.props.bounds()
    }

    /// Apply a patch in place (merge semantics: unset fields are left alone)
    pub fn apply(&mut self, patch: &RecordPatch) {
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(bounds) = patch.bounds {
            self.props.w = bounds.w;
            self.props.h = bounds.h;
        }
        if let Some(url) = &patch.url {
            self.props.url.clone_from(url);
        }
        if let Some(scroll) = patch.scroll {
            self.props.scroll_x = scroll.x;
            self.props.scroll_y = scroll.y;
        }
        if let Some(snapshot) = &patch.snapshot {
            self.props.snapshot.clone_from(snapshot);
        }
        if let Some(synced_at) = patch.synced_at {
            self.last_synced_at = Some(synced_at);
        }
    }
}

/// Partial update of a record.
///
/// `None` leaves a field alone. `snapshot: Some(None)` clears the snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordPatch {
    /// New position
    pub position: Option<Position>,
    /// New bounds
    pub bounds: Option<Bounds>,
    /// New url
    pub url: Option<String>,
    /// New scroll offset
    pub scroll: Option<ScrollOffset>,
    /// New snapshot, or `Some(None)` to clear it
    pub snapshot: Option<Option<String>>,
    /// Commit timestamp, stamped by the sync bridge
    pub synced_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    /// Empty patch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A top-level navigation: new url, scroll reset, snapshot cleared
    #[must_use]
    pub fn navigation(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            scroll: Some(ScrollOffset::ORIGIN),
            snapshot: Some(None),
            ..Self::default()
        }
    }

    /// Set the url
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the scroll offset
    #[must_use]
    pub fn with_scroll(mut self, scroll: ScrollOffset) -> Self {
        self.scroll = Some(scroll);
        self
    }

    /// Set or clear the snapshot
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Option<String>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Set the position
    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Set the bounds
    #[must_use]
    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Stamp the commit time
    #[must_use]
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.synced_at = Some(at);
        self
    }

    /// True when no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.bounds.is_none()
            && self.url.is_none()
            && self.scroll.is_none()
            && self.snapshot.is_none()
    }

    /// True when at least one set field differs from the record.
    ///
    /// The timestamp is not compared.
    #[must_use]
    pub fn differs_from(&self, record: &CanvasObjectRecord) -> bool {
        self.position.is_some_and(|p| p != record.position)
            || self.bounds.is_some_and(|b| b != record.bounds())
            || self.url.as_deref().is_some_and(|u| u != record.url())
            || self.scroll.is_some_and(|s| s != record.scroll_offset())
            || self
                .snapshot
                .as_ref()
                .is_some_and(|s| s.as_deref() != record.snapshot())
    }
}

/// One poll of a live surface's volatile state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSample {
    /// Horizontal scroll
    pub scroll_x: f64,
    /// Vertical scroll
    pub scroll_y: f64,
    /// Serialized document content
    #[serde(default)]
    pub serialized_content: Option<String>,
    /// Current top-level url
    pub current_url: String,
}

impl CaptureSample {
    /// Scroll offset as a value
    #[must_use]
    pub fn scroll_offset(&self) -> ScrollOffset {
        ScrollOffset::new(self.scroll_x, self.scroll_y)
    }

    /// True when scroll or url differ from the record.
    ///
    /// Serialized content is deliberately excluded: it changes on nearly
    /// every poll and is not a trigger.
    #[must_use]
    pub fn differs_from(&self, record: &CanvasObjectRecord) -> bool {
        self.scroll_offset() != record.scroll_offset() || self.current_url != record.url()
    }

    /// The patch committed for this sample. A sample without content
    /// leaves the stored snapshot as it is.
    #[must_use]
    pub fn to_patch(&self) -> RecordPatch {
        let patch = RecordPatch::new()
            .with_url(self.current_url.clone())
            .with_scroll(self.scroll_offset());
        match &self.serialized_content {
            Some(content) => patch.with_snapshot(Some(content.clone())),
            None => patch,
        }
    }
}
