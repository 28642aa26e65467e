//! Document abstraction used to mount challenge widgets.
//!
//! The broker never touches a real DOM directly. Everything it needs from
//! the host page (element creation, focus management, keyboard listening and
//! script injection) goes through the [`Document`] trait, so it can run
//! against a browser binding or the in-memory [`MemoryDocument`].

use crate::broker::error::BrokerError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

mod memory;
pub use memory::MemoryDocument;

/// Selector for elements that take part in keyboard focus order.
pub const FOCUSABLE_SELECTOR: &str =
    r#"button, [href], input, select, textarea, [tabindex]:not([tabindex="-1"])"#;

/// Opaque reference to an element owned by a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a registered keydown listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A keydown event as seen by document-level listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardEvent {
    /// Key name, e.g. `"Tab"` or `"Escape"`
    pub key: String,
    pub shift_key: bool,
}

impl KeyboardEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            shift_key: false,
        }
    }

    pub fn with_shift(mut self) -> Self {
        self.shift_key = true;
        self
    }
}

/// What a listener wants done with the event's default action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Continue,
    PreventDefault,
}

/// Document-level keydown handler.
pub type KeydownListener = Arc<dyn Fn(&KeyboardEvent) -> KeyOutcome + Send + Sync>;

/// The host page, as far as challenge mounting is concerned.
///
/// Element operations are synchronous and infallible: they mirror DOM calls
/// that cannot fail for elements the caller created. Operations on unknown
/// or already detached elements are no-ops.
///
/// # Thread Safety
///
/// Implementations are shared between the broker and the keydown listeners
/// it installs, so they must be `Send + Sync`. Listeners may call back into
/// the document; implementations must not hold internal locks while invoking
/// them.
#[async_trait]
pub trait Document: Send + Sync {
    /// Creates a detached element.
    fn create_element(&self, tag: &str) -> ElementId;

    fn set_attribute(&self, element: ElementId, name: &str, value: &str);

    /// Sets one inline style property.
    fn set_style(&self, element: ElementId, property: &str, value: &str);

    /// Appends an element to the document body.
    fn append_to_body(&self, element: ElementId);

    fn append_child(&self, parent: ElementId, child: ElementId);

    /// Detaches an element (and its subtree) from its parent.
    fn remove(&self, element: ElementId);

    /// Whether the element is attached to the document.
    fn is_connected(&self, element: ElementId) -> bool;

    /// The element that currently has keyboard focus.
    fn active_element(&self) -> Option<ElementId>;

    /// Moves keyboard focus to a connected element.
    fn focus(&self, element: ElementId);

    /// Descendants of `container` matching [`FOCUSABLE_SELECTOR`], in
    /// document order.
    fn focusable_descendants(&self, container: ElementId) -> Vec<ElementId>;

    /// First descendant of `container` with the given tag name.
    fn find_descendant(&self, container: ElementId, tag: &str) -> Option<ElementId>;

    fn add_keydown_listener(&self, listener: KeydownListener) -> ListenerId;

    fn remove_keydown_listener(&self, id: ListenerId);

    /// Whether a script tag whose `src` contains `marker` is present.
    fn has_script(&self, marker: &str) -> bool;

    /// Appends an async script tag and waits for it to load.
    ///
    /// On failure the tag is removed again, so a retry starts clean.
    async fn inject_script(&self, src: &str) -> Result<(), BrokerError>;
}
