//! Object kind registry
//!
//! Behaviour per [`ObjectKind`] is resolved once, when a kind is registered,
//! instead of matching on type tags at every call site.

use std::collections::HashMap;
use std::sync::Arc;

use crate::record::{Bounds, ObjectKind};

/// Per-kind behaviour table entry
pub trait ObjectBehavior: Send + Sync {
    /// Kind this behaviour describes
    fn kind(&self) -> ObjectKind;

    /// Whether objects of this kind host a live surface
    fn hosts_live_surface(&self) -> bool {
        false
    }

    /// Bounds for newly created objects
    fn default_bounds(&self) -> Bounds {
        Bounds::default()
    }

    /// Display label
    fn label(&self) -> &'static str;
}

/// Embedded live content surface
pub struct LiveSurfaceBehavior;

impl ObjectBehavior for LiveSurfaceBehavior {
    fn kind(&self) -> ObjectKind {
        ObjectKind::LiveSurface
    }

    fn hosts_live_surface(&self) -> bool {
        true
    }

    fn label(&self) -> &'static str {
        "Live surface"
    }
}

/// Markdown note, rendered by the note editor
pub struct NoteBehavior;

impl ObjectBehavior for NoteBehavior {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Note
    }

    fn default_bounds(&self) -> Bounds {
        Bounds::new(320.0, 240.0)
    }

    fn label(&self) -> &'static str {
        "Note"
    }
}

/// Search result card
pub struct SearchCardBehavior;

impl ObjectBehavior for SearchCardBehavior {
    fn kind(&self) -> ObjectKind {
        ObjectKind::SearchCard
    }

    fn default_bounds(&self) -> Bounds {
        Bounds::new(360.0, 420.0)
    }

    fn label(&self) -> &'static str {
        "Search card"
    }
}

/// Registry of object behaviours
#[derive(Default)]
pub struct KindRegistry {
    behaviors: HashMap<ObjectKind, Arc<dyn ObjectBehavior>>,
}

impl KindRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LiveSurfaceBehavior));
        registry.register(Arc::new(NoteBehavior));
        registry.register(Arc::new(SearchCardBehavior));
        registry
    }

    /// Register a behaviour, replacing any earlier one for the same kind
    pub fn register(&mut self, behavior: Arc<dyn ObjectBehavior>) {
        self.behaviors.insert(behavior.kind(), behavior);
    }

    /// Look up the behaviour for a kind
    #[must_use]
    pub fn resolve(&self, kind: ObjectKind) -> Option<Arc<dyn ObjectBehavior>> {
        self.behaviors.get(&kind).cloned()
    }

    /// Whether a kind hosts a live surface. Unregistered kinds do not.
    #[must_use]
    pub fn hosts_live_surface(&self, kind: ObjectKind) -> bool {
        self.behaviors
            .get(&kind)
            .is_some_and(|b| b.hosts_live_surface())
    }

    /// Number of registered kinds
    #[must_use]
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}
