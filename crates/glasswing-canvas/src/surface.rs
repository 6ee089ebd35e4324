//! Live Surface Backend
//!
//! The content engine behind a live surface runs out of process and is only
//! reachable through asynchronous calls. This module is the capability
//! boundary to it: typed queries instead of script payloads, and a per-surface
//! event stream delivered in FIFO order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::record::{CaptureSample, Position};

/// Identifier of a surface inside its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Isolation settings applied when a surface is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    /// Allow page scripts
    #[serde(default = "default_true")]
    pub javascript: bool,
    /// Let the surface open OS-level windows. When false, popups are
    /// redirected to sibling canvas objects.
    #[serde(default)]
    pub allow_popups: bool,
    /// Allow downloads to start from the surface
    #[serde(default)]
    pub allow_downloads: bool,
    /// Storage partition shared by all surfaces of a document
    #[serde(default)]
    pub partition: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            javascript: true,
            allow_popups: false,
            allow_downloads: false,
            partition: None,
        }
    }
}

/// Typed request against a surface
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceQuery {
    /// Read scroll position, current url and serialized content
    CaptureState,
    /// Serialized form of every head-level resource element (scripts,
    /// stylesheets, inline styles) in the live document
    HeadResources,
    /// Append the given serialized head resources to the live document
    InsertHeadResources(Vec<String>),
    /// Scroll the document
    ScrollTo {
        /// Horizontal offset
        x: f64,
        /// Vertical offset
        y: f64,
    },
}

impl SurfaceQuery {
    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CaptureState => "capture_state",
            Self::HeadResources => "head_resources",
            Self::InsertHeadResources(_) => "insert_head_resources",
            Self::ScrollTo { .. } => "scroll_to",
        }
    }
}

/// Result of a [`SurfaceQuery`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Answer to [`SurfaceQuery::CaptureState`]
    State(CaptureSample),
    /// Answer to [`SurfaceQuery::HeadResources`]
    HeadResources(Vec<String>),
    /// Answer to [`SurfaceQuery::InsertHeadResources`]: number inserted
    Inserted(usize),
    /// Query had no result value
    Done,
}

/// What to do with a popup the surface asked to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopupDecision {
    /// Let the surface open its own window
    Allow,
    /// Suppress the window
    Deny,
}

/// Notification emitted by a surface
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    /// A load started
    DidStartLoading,
    /// The document finished loading
    DidFinishLoad,
    /// The load failed
    DidFailLoad {
        /// Engine error code
        code: i32,
        /// Engine description
        description: String,
    },
    /// Top-level navigation committed
    DidNavigate {
        /// New url
        url: String,
    },
    /// In-page navigation (hash change, client-side route)
    DidNavigateInPage {
        /// New url
        url: String,
    },
    /// The page asked for a new window
    NewSurfaceRequested {
        /// Target url
        url: String,
        /// Cursor position relative to the surface, when known
        position: Option<Position>,
    },
}

impl SurfaceEvent {
    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DidStartLoading => "did-start-loading",
            Self::DidFinishLoad => "did-finish-load",
            Self::DidFailLoad { .. } => "did-fail-load",
            Self::DidNavigate { .. } => "did-navigate",
            Self::DidNavigateInPage { .. } => "did-navigate-in-page",
            Self::NewSurfaceRequested { .. } => "new-surface-requested",
        }
    }
}

/// A freshly created surface and its event stream
#[derive(Debug)]
pub struct CreatedSurface {
    /// Backend identifier
    pub id: SurfaceId,
    /// Events for this surface, in order
    pub events: mpsc::UnboundedReceiver<SurfaceEvent>,
}

/// Capability interface to the content engine hosting live surfaces
#[async_trait]
pub trait SurfaceBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Create a surface showing `initial_url`
    async fn create(&self, initial_url: &str, policy: &SandboxPolicy) -> Result<CreatedSurface>;

    /// Destroy a surface
    async fn destroy(&self, surface: SurfaceId) -> Result<()>;

    /// Navigate to a url
    async fn load_url(&self, surface: SurfaceId, url: &str) -> Result<()>;

    /// Reload the current document
    async fn reload(&self, surface: SurfaceId) -> Result<()>;

    /// Go back in history
    async fn go_back(&self, surface: SurfaceId) -> Result<()>;

    /// Go forward in history
    async fn go_forward(&self, surface: SurfaceId) -> Result<()>;

    /// Whether there is a history entry to go back to
    async fn can_go_back(&self, surface: SurfaceId) -> Result<bool>;

    /// Whether there is a history entry to go forward to
    async fn can_go_forward(&self, surface: SurfaceId) -> Result<bool>;

    /// Run a typed query
    async fn execute(&self, surface: SurfaceId, query: SurfaceQuery) -> Result<QueryResult>;

    /// Answer a pending popup request
    async fn resolve_popup(&self, surface: SurfaceId, decision: PopupDecision) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_denies_popups() {
        let policy = SandboxPolicy::default();
        assert!(policy.javascript);
        assert!(!policy.allow_popups);
    }

    #[test]
    fn test_policy_deserialize_defaults() {
        let policy: SandboxPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, SandboxPolicy::default());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(SurfaceEvent::DidFinishLoad.name(), "did-finish-load");
        assert_eq!(
            SurfaceEvent::DidNavigateInPage {
                url: "https://a.example#x".into()
            }
            .name(),
            "did-navigate-in-page"
        );
        assert_eq!(SurfaceQuery::CaptureState.name(), "capture_state");
        assert_eq!(SurfaceId(7).to_string(), "surface-7");
    }
}
