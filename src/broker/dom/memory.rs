//! Headless in-memory document.
//!
//! Keeps a minimal element tree (tag, attributes, inline styles, parent and
//! children), keyboard focus, document-level keydown listeners and script
//! tags. It is what the test suite mounts challenges into, and it works for
//! hosts that drive a provider without a real page.

use super::{Document, ElementId, KeyOutcome, KeyboardEvent, KeydownListener, ListenerId};
use crate::broker::error::BrokerError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Called with the script `src` whenever an injected script loads.
pub type ScriptLoadHook = Arc<dyn Fn(&str) + Send + Sync>;

const FOCUSABLE_TAGS: [&str; 4] = ["button", "input", "select", "textarea"];

#[derive(Debug, Default)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    styles: BTreeMap<String, String>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    fn is_focusable(&self) -> bool {
        FOCUSABLE_TAGS.contains(&self.tag.as_str())
            || self.attributes.contains_key("href")
            || self
                .attributes
                .get("tabindex")
                .is_some_and(|index| index != "-1")
    }
}

struct State {
    nodes: HashMap<ElementId, Node>,
    next_id: u64,
    head: ElementId,
    body: ElementId,
    active: Option<ElementId>,
    listeners: Vec<(ListenerId, KeydownListener)>,
    next_listener: u64,
    script_failures: u32,
    script_attempts: u32,
    on_script_load: Option<ScriptLoadHook>,
}

impl State {
    fn new() -> Self {
        let head = ElementId(1);
        let body = ElementId(2);
        let mut nodes = HashMap::new();
        nodes.insert(head, Node::new("head"));
        nodes.insert(body, Node::new("body"));

        Self {
            nodes,
            next_id: 3,
            head,
            body,
            active: None,
            listeners: Vec::new(),
            next_listener: 1,
            script_failures: 0,
            script_attempts: 0,
            on_script_load: None,
        }
    }

    fn create(&mut self, tag: &str) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(tag));
        id
    }

    fn detach(&mut self, element: ElementId) {
        let Some(parent) = self.nodes.get_mut(&element).and_then(|node| node.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|child| *child != element);
        }
    }

    fn append(&mut self, parent: ElementId, child: ElementId) {
        if parent == child
            || !self.nodes.contains_key(&parent)
            || !self.nodes.contains_key(&child)
            || self.is_ancestor(child, parent)
        {
            return;
        }
        self.detach(child);
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
    }

    fn is_ancestor(&self, ancestor: ElementId, element: ElementId) -> bool {
        let mut current = self.nodes.get(&element).and_then(|node| node.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|node| node.parent);
        }
        false
    }

    fn is_connected(&self, element: ElementId) -> bool {
        element == self.head
            || element == self.body
            || self.is_ancestor(self.head, element)
            || self.is_ancestor(self.body, element)
    }

    // Preorder, so results come out in document order.
    fn descendants(&self, container: ElementId) -> Vec<ElementId> {
        let mut found = Vec::new();
        let mut stack: Vec<ElementId> = self
            .nodes
            .get(&container)
            .map(|node| node.children.iter().rev().copied().collect())
            .unwrap_or_default();

        while let Some(id) = stack.pop() {
            found.push(id);
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        found
    }

    fn scripts(&self) -> impl Iterator<Item = &str> + '_ {
        self.descendants(self.head)
            .into_iter()
            .chain(self.descendants(self.body))
            .filter_map(|id| self.nodes.get(&id))
            .filter(|node| node.tag == "script")
            .filter_map(|node| node.attributes.get("src").map(String::as_str))
            .collect::<Vec<_>>()
            .into_iter()
    }
}

/// A document that lives entirely in memory.
///
/// # Example
///
/// ```rust
/// use turnstile_broker::{Document, KeyboardEvent, MemoryDocument};
///
/// let document = MemoryDocument::new();
/// let button = document.create_element("button");
/// document.append_to_body(button);
/// document.focus(button);
///
/// assert_eq!(document.active_element(), Some(button));
/// assert!(!document.dispatch_keydown(&KeyboardEvent::new("Tab")));
/// ```
pub struct MemoryDocument {
    state: Mutex<State>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn head(&self) -> ElementId {
        self.state().head
    }

    pub fn body(&self) -> ElementId {
        self.state().body
    }

    /// Makes the next `count` script injections fail.
    pub fn fail_script_loads(&self, count: u32) {
        self.state().script_failures = count;
    }

    /// Registers a hook run after each successful script load.
    ///
    /// Typically used to flip a provider's readiness flag, as the real
    /// provider script does from its onload callback.
    pub fn on_script_load(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.state().on_script_load = Some(Arc::new(hook));
    }

    /// Number of script injections attempted so far, failed ones included.
    pub fn script_attempts(&self) -> u32 {
        self.state().script_attempts
    }

    /// `src` of every attached script tag.
    pub fn script_sources(&self) -> Vec<String> {
        self.state().scripts().map(str::to_string).collect()
    }

    /// Adds a script tag without loading it, as a page might have done.
    pub fn add_script_tag(&self, src: &str) -> ElementId {
        let mut state = self.state();
        let script = state.create("script");
        if let Some(node) = state.nodes.get_mut(&script) {
            node.attributes.insert("src".to_string(), src.to_string());
        }
        let head = state.head;
        state.append(head, script);
        script
    }

    pub fn tag_name(&self, element: ElementId) -> Option<String> {
        self.state().nodes.get(&element).map(|node| node.tag.clone())
    }

    pub fn attribute(&self, element: ElementId, name: &str) -> Option<String> {
        self.state()
            .nodes
            .get(&element)
            .and_then(|node| node.attributes.get(name).cloned())
    }

    pub fn style(&self, element: ElementId, property: &str) -> Option<String> {
        self.state()
            .nodes
            .get(&element)
            .and_then(|node| node.styles.get(property).cloned())
    }

    pub fn children(&self, element: ElementId) -> Vec<ElementId> {
        self.state()
            .nodes
            .get(&element)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub fn body_children(&self) -> Vec<ElementId> {
        let body = self.body();
        self.children(body)
    }

    /// Connected elements whose attribute `name` equals `value`.
    pub fn query_attribute(&self, name: &str, value: &str) -> Vec<ElementId> {
        let state = self.state();
        let mut found = state.descendants(state.head);
        found.extend(state.descendants(state.body));
        found.retain(|id| {
            state
                .nodes
                .get(id)
                .and_then(|node| node.attributes.get(name))
                .is_some_and(|v| v == value)
        });
        found
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    /// Delivers a keydown event to every listener.
    ///
    /// Returns `true` if any listener prevented the default action.
    pub fn dispatch_keydown(&self, event: &KeyboardEvent) -> bool {
        let listeners: Vec<KeydownListener> = self
            .state()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut prevented = false;
        for listener in listeners {
            if listener(event) == KeyOutcome::PreventDefault {
                prevented = true;
            }
        }
        prevented
    }

    /// Dispatches a plain keydown for `key`.
    pub fn press(&self, key: &str) -> bool {
        self.dispatch_keydown(&KeyboardEvent::new(key))
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryDocument")
            .field("elements", &state.nodes.len())
            .field("active", &state.active)
            .field("listeners", &state.listeners.len())
            .field("script_attempts", &state.script_attempts)
            .finish()
    }
}

#[async_trait]
impl Document for MemoryDocument {
    fn create_element(&self, tag: &str) -> ElementId {
        self.state().create(tag)
    }

    fn set_attribute(&self, element: ElementId, name: &str, value: &str) {
        if let Some(node) = self.state().nodes.get_mut(&element) {
            node.attributes.insert(name.to_string(), value.to_string());
        }
    }

    fn set_style(&self, element: ElementId, property: &str, value: &str) {
        if let Some(node) = self.state().nodes.get_mut(&element) {
            node.styles.insert(property.to_string(), value.to_string());
        }
    }

    fn append_to_body(&self, element: ElementId) {
        let mut state = self.state();
        let body = state.body;
        state.append(body, element);
    }

    fn append_child(&self, parent: ElementId, child: ElementId) {
        self.state().append(parent, child);
    }

    fn remove(&self, element: ElementId) {
        let mut state = self.state();
        state.detach(element);

        // Focus inside a removed subtree falls back to nothing
        if let Some(active) = state.active {
            if !state.is_connected(active) {
                state.active = None;
            }
        }
    }

    fn is_connected(&self, element: ElementId) -> bool {
        self.state().is_connected(element)
    }

    fn active_element(&self) -> Option<ElementId> {
        self.state().active
    }

    fn focus(&self, element: ElementId) {
        let mut state = self.state();
        if state.is_connected(element) {
            state.active = Some(element);
        }
    }

    fn focusable_descendants(&self, container: ElementId) -> Vec<ElementId> {
        let state = self.state();
        state
            .descendants(container)
            .into_iter()
            .filter(|id| state.nodes.get(id).is_some_and(Node::is_focusable))
            .collect()
    }

    fn find_descendant(&self, container: ElementId, tag: &str) -> Option<ElementId> {
        let state = self.state();
        let tag = tag.to_ascii_lowercase();
        state
            .descendants(container)
            .into_iter()
            .find(|id| state.nodes.get(id).is_some_and(|node| node.tag == tag))
    }

    fn add_keydown_listener(&self, listener: KeydownListener) -> ListenerId {
        let mut state = self.state();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.push((id, listener));
        id
    }

    fn remove_keydown_listener(&self, id: ListenerId) {
        self.state().listeners.retain(|(listener, _)| *listener != id);
    }

    fn has_script(&self, marker: &str) -> bool {
        self.state().scripts().any(|src| src.contains(marker))
    }

    async fn inject_script(&self, src: &str) -> Result<(), BrokerError> {
        let hook = {
            let mut state = self.state();
            state.script_attempts += 1;

            let script = state.create("script");
            if let Some(node) = state.nodes.get_mut(&script) {
                node.attributes.insert("src".to_string(), src.to_string());
                node.attributes.insert("async".to_string(), String::new());
                node.attributes.insert("defer".to_string(), String::new());
            }
            let head = state.head;
            state.append(head, script);

            if state.script_failures > 0 {
                state.script_failures -= 1;
                state.detach(script);
                return Err(BrokerError::ScriptLoad(
                    "Failed to load Turnstile script".to_string(),
                ));
            }
            state.on_script_load.clone()
        };

        // Loading completes on a later tick
        tokio::task::yield_now().await;
        if let Some(hook) = hook {
            hook(src);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_tree_and_connectivity() {
        let document = MemoryDocument::new();
        let container = document.create_element("div");
        let child = document.create_element("span");
        document.append_child(container, child);

        assert!(!document.is_connected(child));
        document.append_to_body(container);
        assert!(document.is_connected(child));
        assert_eq!(document.body_children(), vec![container]);

        document.remove(container);
        assert!(!document.is_connected(child));
        assert!(document.body_children().is_empty());
    }

    #[test]
    fn test_append_rejects_cycles() {
        let document = MemoryDocument::new();
        let outer = document.create_element("div");
        let inner = document.create_element("div");
        document.append_child(outer, inner);
        document.append_child(inner, outer);

        assert_eq!(document.children(outer), vec![inner]);
        assert!(document.children(inner).is_empty());
    }

    #[test]
    fn test_focus_requires_connection() {
        let document = MemoryDocument::new();
        let button = document.create_element("button");
        document.focus(button);
        assert_eq!(document.active_element(), None);

        document.append_to_body(button);
        document.focus(button);
        assert_eq!(document.active_element(), Some(button));

        document.remove(button);
        assert_eq!(document.active_element(), None);
    }

    #[test]
    fn test_focusable_descendants_in_document_order() {
        let document = MemoryDocument::new();
        let container = document.create_element("div");
        let button = document.create_element("button");
        let link = document.create_element("a");
        document.set_attribute(link, "href", "#");
        let plain = document.create_element("span");
        let skipped = document.create_element("div");
        document.set_attribute(skipped, "tabindex", "-1");
        let tabbable = document.create_element("div");
        document.set_attribute(tabbable, "tabindex", "0");
        let nested = document.create_element("input");

        document.append_child(container, button);
        document.append_child(container, plain);
        document.append_child(plain, nested);
        document.append_child(container, link);
        document.append_child(container, skipped);
        document.append_child(container, tabbable);

        assert_eq!(
            document.focusable_descendants(container),
            vec![button, nested, link, tabbable]
        );
        assert_eq!(document.find_descendant(container, "INPUT"), Some(nested));
    }

    #[test]
    fn test_keydown_listeners() {
        let document = Arc::new(MemoryDocument::new());
        let seen = Arc::new(AtomicBool::new(false));

        let id = document.add_keydown_listener({
            let seen = Arc::clone(&seen);
            let document = Arc::downgrade(&document);
            Arc::new(move |event: &KeyboardEvent| {
                seen.store(true, Ordering::SeqCst);
                // Re-entrant access must not deadlock
                if let Some(document) = document.upgrade() {
                    let _ = document.active_element();
                }
                if event.key == "Tab" {
                    KeyOutcome::PreventDefault
                } else {
                    KeyOutcome::Continue
                }
            })
        });

        assert!(document.press("Tab"));
        assert!(!document.press("a"));
        assert!(seen.load(Ordering::SeqCst));

        document.remove_keydown_listener(id);
        assert_eq!(document.listener_count(), 0);
        assert!(!document.press("Tab"));
    }

    #[tokio::test]
    async fn test_script_injection() {
        let document = MemoryDocument::new();
        let loaded = Arc::new(AtomicBool::new(false));
        document.on_script_load({
            let loaded = Arc::clone(&loaded);
            move |_| loaded.store(true, Ordering::SeqCst)
        });
        document.fail_script_loads(1);

        let src = "https://challenges.cloudflare.com/turnstile/v0/api.js";
        assert!(document.inject_script(src).await.is_err());
        assert!(!document.has_script("challenges.cloudflare.com/turnstile"));
        assert!(!loaded.load(Ordering::SeqCst));

        document.inject_script(src).await.unwrap();
        assert!(document.has_script("challenges.cloudflare.com/turnstile"));
        assert!(loaded.load(Ordering::SeqCst));
        assert_eq!(document.script_attempts(), 2);
        assert_eq!(document.script_sources(), vec![src.to_string()]);
    }
}
