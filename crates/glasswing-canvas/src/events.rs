//! Sync Event Log
//!
//! Every observable step of the live surface subsystem (mounts, commits,
//! skipped ticks, restorations, mode changes) is recorded here. The log is
//! bounded and also broadcast, so hosts can show a timeline and tests can
//! assert ordering between components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::record::{Position, ScrollOffset};

/// Sync event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventType {
    /// A live surface was mounted
    SurfaceMounted,
    /// A live surface was torn down
    SurfaceUnmounted,
    /// Surface creation failed
    MountFailed,
    /// Top-level navigation committed to the record
    Navigated,
    /// In-page navigation committed to the record
    NavigatedInPage,
    /// The surface reported a failed load
    LoadFailed,
    /// A capture changed the record
    CaptureCommitted,
    /// A capture tick was skipped (in flight or failed)
    CaptureSkipped,
    /// A capture result arrived after its surface was torn down
    CaptureDiscarded,
    /// Restoration finished
    RestoreCompleted,
    /// Snapshot merge failed and restoration fell back
    RestoreDegraded,
    /// Interaction mode changed
    ModeChanged,
    /// A popup was redirected to a sibling object
    PopupRedirected,
}

impl SyncEventType {
    /// Get the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SurfaceMounted => "surface_mounted",
            Self::SurfaceUnmounted => "surface_unmounted",
            Self::MountFailed => "mount_failed",
            Self::Navigated => "navigated",
            Self::NavigatedInPage => "navigated_in_page",
            Self::LoadFailed => "load_failed",
            Self::CaptureCommitted => "capture_committed",
            Self::CaptureSkipped => "capture_skipped",
            Self::CaptureDiscarded => "capture_discarded",
            Self::RestoreCompleted => "restore_completed",
            Self::RestoreDegraded => "restore_degraded",
            Self::ModeChanged => "mode_changed",
            Self::PopupRedirected => "popup_redirected",
        }
    }

    /// Check if this event wrote to the record
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Navigated | Self::NavigatedInPage | Self::CaptureCommitted
        )
    }

    /// Check if this event reports a degradation
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::MountFailed | Self::LoadFailed | Self::RestoreDegraded
        )
    }
}

impl std::fmt::Display for SyncEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded sync event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// Record the event concerns
    pub record_id: Uuid,
    /// Position in the log, strictly increasing
    pub sequence_num: u64,
    /// Event type
    pub event_type: SyncEventType,
    /// Event payload
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    /// Create a new event
    #[must_use]
    pub fn new(record_id: Uuid, sequence_num: u64, event_type: SyncEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            record_id,
            sequence_num,
            event_type,
            payload: serde_json::json!({}),
            timestamp: Utc::now(),
        }
    }

    /// Set the payload
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ============================================================================
// Event Payloads
// ============================================================================

/// What caused a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureTrigger {
    /// Scheduler interval
    Interval,
    /// Leaving interactive mode
    ModeExit,
    /// Explicit host request
    Manual,
}

/// Payload for capture committed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureCommittedPayload {
    /// What caused the capture
    pub trigger: CaptureTrigger,
    /// Committed url
    pub url: String,
    /// Committed scroll
    pub scroll: ScrollOffset,
    /// Whether serialized content was stored alongside
    pub has_snapshot: bool,
}

/// Payload for capture skipped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSkippedPayload {
    /// What caused the capture
    pub trigger: CaptureTrigger,
    /// Why the tick was skipped
    pub reason: String,
}

/// Payload for navigation events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigatedPayload {
    /// New url
    pub url: String,
}

/// Payload for load and mount failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePayload {
    /// Error code
    pub code: String,
    /// Description
    pub description: String,
}

/// Payload for restoration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePayload {
    /// Restoration tier reached
    pub tier: String,
    /// Head resources inserted by the merge
    pub inserted: usize,
}

/// Payload for a mode change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeChangedPayload {
    /// Previous mode
    pub from: String,
    /// New mode
    pub to: String,
}

/// Payload for a redirected popup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopupRedirectedPayload {
    /// Target url
    pub url: String,
    /// Canvas position requested for the new object
    pub position: Position,
}

// ============================================================================
// Event Recording
// ============================================================================

/// Bounded, broadcasting recorder for sync events
pub struct SyncEventRecorder {
    capacity: usize,
    sequence_counter: AtomicU64,
    events: RwLock<VecDeque<SyncEvent>>,
    tx: broadcast::Sender<SyncEvent>,
}

impl SyncEventRecorder {
    /// Create a recorder keeping at most `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity.min(1024));
        Self {
            capacity,
            sequence_counter: AtomicU64::new(1),
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            tx,
        }
    }

    /// Subscribe to events as they are recorded
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Record an event
    pub async fn record(
        &self,
        record_id: Uuid,
        event_type: SyncEventType,
        payload: serde_json::Value,
    ) {
        let seq = self.sequence_counter.fetch_add(1, Ordering::SeqCst);
        let event = SyncEvent::new(record_id, seq, event_type).with_payload(payload);

        {
            let mut events = self.events.write().await;
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(event.clone());
        }

        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Get all retained events
    pub async fn get_events(&self) -> Vec<SyncEvent> {
        let events = self.events.read().await;
        events.iter().cloned().collect()
    }

    /// Get retained events for one record
    pub async fn events_for(&self, record_id: Uuid) -> Vec<SyncEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.record_id == record_id)
            .cloned()
            .collect()
    }

    /// Count retained events of a type for one record
    pub async fn count_of(&self, record_id: Uuid, event_type: SyncEventType) -> usize {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.record_id == record_id && e.event_type == event_type)
            .count()
    }

    /// Get event count
    pub async fn event_count(&self) -> usize {
        let events = self.events.read().await;
        events.len()
    }

    /// Clear all events
    pub async fn clear(&self) {
        let mut events = self.events.write().await;
        events.clear();
    }

    /// Record a committed capture
    pub async fn record_capture_committed(
        &self,
        record_id: Uuid,
        trigger: CaptureTrigger,
        url: &str,
        scroll: ScrollOffset,
        has_snapshot: bool,
    ) {
        self.record(
            record_id,
            SyncEventType::CaptureCommitted,
            serde_json::to_value(CaptureCommittedPayload {
                trigger,
                url: url.to_string(),
                scroll,
                has_snapshot,
            })
            .unwrap_or_default(),
        )
        .await;
    }

    /// Record a skipped capture
    pub async fn record_capture_skipped(
        &self,
        record_id: Uuid,
        trigger: CaptureTrigger,
        reason: &str,
    ) {
        self.record(
            record_id,
            SyncEventType::CaptureSkipped,
            serde_json::to_value(CaptureSkippedPayload {
                trigger,
                reason: reason.to_string(),
            })
            .unwrap_or_default(),
        )
        .await;
    }

    /// Record a committed navigation
    pub async fn record_navigated(&self, record_id: Uuid, url: &str, in_page: bool) {
        let event_type = if in_page {
            SyncEventType::NavigatedInPage
        } else {
            SyncEventType::Navigated
        };
        self.record(
            record_id,
            event_type,
            serde_json::to_value(NavigatedPayload {
                url: url.to_string(),
            })
            .unwrap_or_default(),
        )
        .await;
    }

    /// Record a failure of the given type
    pub async fn record_failure(
        &self,
        record_id: Uuid,
        event_type: SyncEventType,
        code: &str,
        description: &str,
    ) {
        self.record(
            record_id,
            event_type,
            serde_json::to_value(FailurePayload {
                code: code.to_string(),
                description: description.to_string(),
            })
            .unwrap_or_default(),
        )
        .await;
    }

    /// Record a mode change
    pub async fn record_mode_changed(&self, record_id: Uuid, from: &str, to: &str) {
        self.record(
            record_id,
            SyncEventType::ModeChanged,
            serde_json::to_value(ModeChangedPayload {
                from: from.to_string(),
                to: to.to_string(),
            })
            .unwrap_or_default(),
        )
        .await;
    }
}

impl Default for SyncEventRecorder {
    fn default() -> Self {
        Self::new(1024)
    }
}

// ============================================================================
// Timeline Entry
// ============================================================================

/// Timeline entry for displaying event history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTimelineEntry {
    /// Event ID
    pub event_id: Uuid,
    /// Record ID
    pub record_id: Uuid,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Event type
    pub event_type: SyncEventType,
    /// Human-readable summary
    pub summary: String,
}

impl From<&SyncEvent> for SyncTimelineEntry {
    fn from(event: &SyncEvent) -> Self {
        Self {
            event_id: event.id,
            record_id: event.record_id,
            timestamp: event.timestamp,
            event_type: event.event_type,
            summary: create_event_summary(event),
        }
    }
}

fn create_event_summary(event: &SyncEvent) -> String {
    let url = event.payload.get("url").and_then(|v| v.as_str());
    match (event.event_type, url) {
        (SyncEventType::Navigated, Some(url)) => format!("Navigated to {url}"),
        (SyncEventType::NavigatedInPage, Some(url)) => format!("In-page navigation to {url}"),
        (SyncEventType::PopupRedirected, Some(url)) => format!("Popup redirected: {url}"),
        (SyncEventType::SurfaceMounted, _) => "Surface mounted".to_string(),
        (SyncEventType::SurfaceUnmounted, _) => "Surface unmounted".to_string(),
        (SyncEventType::MountFailed, _) => "Surface creation failed".to_string(),
        (SyncEventType::Navigated, None) => "Navigated".to_string(),
        (SyncEventType::NavigatedInPage, None) => "In-page navigation".to_string(),
        (SyncEventType::LoadFailed, _) => "Load failed".to_string(),
        (SyncEventType::CaptureCommitted, _) => "State captured".to_string(),
        (SyncEventType::CaptureSkipped, _) => "Capture skipped".to_string(),
        (SyncEventType::CaptureDiscarded, _) => "Late capture discarded".to_string(),
        (SyncEventType::RestoreCompleted, _) => "State restored".to_string(),
        (SyncEventType::RestoreDegraded, _) => "Restore degraded to scroll-only".to_string(),
        (SyncEventType::ModeChanged, _) => {
            let to = event
                .payload
                .get("to")
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            format!("Mode changed to {to}")
        }
        (SyncEventType::PopupRedirected, None) => "Popup redirected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_as_str() {
        assert_eq!(SyncEventType::CaptureCommitted.as_str(), "capture_committed");
        assert_eq!(SyncEventType::ModeChanged.to_string(), "mode_changed");
    }

    #[test]
    fn test_event_type_classification() {
        assert!(SyncEventType::Navigated.is_write());
        assert!(SyncEventType::CaptureCommitted.is_write());
        assert!(!SyncEventType::CaptureSkipped.is_write());
        assert!(SyncEventType::RestoreDegraded.is_failure());
    }

    #[tokio::test]
    async fn test_recorder_sequence_and_filter() {
        let recorder = SyncEventRecorder::new(16);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        recorder.record_navigated(a, "https://a.example", false).await;
        recorder.record_navigated(b, "https://b.example", true).await;
        recorder
            .record_capture_skipped(a, CaptureTrigger::Interval, "query failed")
            .await;

        let events = recorder.get_events().await;
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].sequence_num < w[1].sequence_num));

        assert_eq!(recorder.events_for(a).await.len(), 2);
        assert_eq!(recorder.count_of(b, SyncEventType::NavigatedInPage).await, 1);
    }

    #[tokio::test]
    async fn test_recorder_is_bounded() {
        let recorder = SyncEventRecorder::new(2);
        let id = Uuid::new_v4();
        for _ in 0..5 {
            recorder
                .record(id, SyncEventType::CaptureSkipped, serde_json::json!({}))
                .await;
        }
        let events = recorder.get_events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sequence_num, 5);
    }

    #[tokio::test]
    async fn test_recorder_broadcasts() {
        let recorder = SyncEventRecorder::new(8);
        let mut rx = recorder.subscribe();
        let id = Uuid::new_v4();

        recorder.record_mode_changed(id, "passive", "interactive").await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, SyncEventType::ModeChanged);
        assert_eq!(event.payload["to"], "interactive");
    }

    #[test]
    fn test_timeline_summary() {
        let event = SyncEvent::new(Uuid::new_v4(), 1, SyncEventType::Navigated)
            .with_payload(serde_json::json!({"url": "https://b.example"}));
        let entry = SyncTimelineEntry::from(&event);
        assert_eq!(entry.summary, "Navigated to https://b.example");

        let event = SyncEvent::new(Uuid::new_v4(), 2, SyncEventType::CaptureDiscarded);
        assert_eq!(SyncTimelineEntry::from(&event).summary, "Late capture discarded");
    }
}
