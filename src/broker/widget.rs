//! Challenge widget lifecycle.
//!
//! Mounts the container a challenge renders into, tracks the provider's
//! widget handle per action, and tears everything down again on every exit
//! path. Interactive challenges get an accessible modal: an ARIA dialog over
//! a backdrop, a Tab focus trap, Escape to cancel, and focus restoration.
//! Other challenges render into one invisible container reused for the
//! broker's lifetime. When dialogs stack, only the most recently mounted one
//! reacts to the keyboard.
//!
//! Teardown is owned by [`MountGuard`]; dropping it is the only way a mount
//! ends, so success, failure, cancellation, clearing and a dropped future
//! all release the same resources.

use crate::broker::config::Language;
use crate::broker::dom::{Document, ElementId, KeyOutcome, KeyboardEvent, ListenerId};
use crate::broker::error::BrokerError;
use crate::broker::provider::{
    ChallengeCallbacks, ChallengeOutcome, ChallengeProvider, RenderOptions, WidgetHandle,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

/// Delay before focus moves into a freshly rendered challenge iframe.
pub const IFRAME_FOCUS_DELAY: Duration = Duration::from_millis(100);

const DIALOG_STYLES: [(&str, &str); 5] = [
    ("position", "fixed"),
    ("top", "50%"),
    ("left", "50%"),
    ("transform", "translate(-50%, -50%)"),
    ("z-index", "9999"),
];

const BACKDROP_STYLES: [(&str, &str); 7] = [
    ("position", "fixed"),
    ("top", "0"),
    ("left", "0"),
    ("width", "100%"),
    ("height", "100%"),
    ("background-color", "rgba(0, 0, 0, 0.5)"),
    ("z-index", "9998"),
];

/// Where a challenge for one action is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetState {
    /// No challenge is mounted for the action.
    Idle,
    /// The container is being built and the provider called.
    Mounting,
    /// The provider rendered; waiting for its callback.
    AwaitingUser,
    /// A token was issued.
    Resolved,
    /// The provider reported an error or timeout.
    Rejected,
    /// The user pressed Escape.
    Cancelled,
    /// Cleared while its mount is still unwinding; no further callbacks
    /// are honored. The action reads as `Idle` once the mount is gone.
    Disposed,
}

struct Slot {
    mount_id: u64,
    state: WidgetState,
    handle: Option<WidgetHandle>,
    callbacks: Option<ChallengeCallbacks>,
}

// Open dialogs in mount order; the last one owns the keyboard.
type ModalStack = Arc<Mutex<Vec<ElementId>>>;

fn lock_stack(modals: &ModalStack) -> MutexGuard<'_, Vec<ElementId>> {
    modals.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns challenge containers and the action to widget handle map.
pub(crate) struct WidgetLifecycle {
    document: Arc<dyn Document>,
    provider: Arc<dyn ChallengeProvider>,
    language: Language,
    slots: Mutex<HashMap<String, Slot>>,
    invisible: Mutex<Option<ElementId>>,
    modals: ModalStack,
    next_mount: AtomicU64,
}

impl WidgetLifecycle {
    pub(crate) fn new(
        document: Arc<dyn Document>,
        provider: Arc<dyn ChallengeProvider>,
        language: Language,
    ) -> Self {
        Self {
            document,
            provider,
            language,
            slots: Mutex::new(HashMap::new()),
            invisible: Mutex::new(None),
            modals: Arc::new(Mutex::new(Vec::new())),
            next_mount: AtomicU64::new(1),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state(&self, action: &str) -> WidgetState {
        self.slots()
            .get(action)
            .map_or(WidgetState::Idle, |slot| slot.state)
    }

    /// The registered widget handle for an action, if any.
    #[cfg(test)]
    pub(crate) fn handle(&self, action: &str) -> Option<WidgetHandle> {
        self.slots()
            .get(action)
            .and_then(|slot| slot.handle.clone())
    }

    #[cfg(test)]
    pub(crate) fn mounted(&self) -> usize {
        self.slots().len()
    }

    /// Builds the container for a challenge and registers it under `action`.
    pub(crate) fn mount(
        self: &Arc<Self>,
        action: &str,
        modal: bool,
        callbacks: ChallengeCallbacks,
    ) -> MountGuard {
        let mount_id = self.next_mount.fetch_add(1, Ordering::Relaxed);

        let (container, modal) = if modal {
            let modal = self.mount_modal(&callbacks);
            (modal.dialog, Some(modal))
        } else {
            (self.invisible_container(), None)
        };

        self.slots().insert(
            action.to_string(),
            Slot {
                mount_id,
                state: WidgetState::Mounting,
                handle: None,
                callbacks: Some(callbacks.clone()),
            },
        );

        MountGuard {
            lifecycle: Arc::clone(self),
            action: action.to_string(),
            mount_id,
            container,
            modal,
            handle: None,
            callbacks,
        }
    }

    fn mount_modal(&self, callbacks: &ChallengeCallbacks) -> Modal {
        let document = &self.document;
        let restore_focus = document.active_element();

        let dialog = document.create_element("div");
        document.set_attribute(dialog, "role", "dialog");
        document.set_attribute(dialog, "aria-modal", "true");
        document.set_attribute(dialog, "aria-label", self.language.dialog_label());
        for (property, value) in DIALOG_STYLES {
            document.set_style(dialog, property, value);
        }

        let backdrop = document.create_element("div");
        document.set_attribute(backdrop, "aria-hidden", "true");
        for (property, value) in BACKDROP_STYLES {
            document.set_style(backdrop, property, value);
        }

        lock_stack(&self.modals).push(dialog);

        let weak = Arc::downgrade(document);
        let modals = Arc::clone(&self.modals);
        let callbacks = callbacks.clone();
        let listener = document.add_keydown_listener(Arc::new(move |event: &KeyboardEvent| {
            if lock_stack(&modals).last() != Some(&dialog) {
                return KeyOutcome::Continue;
            }
            handle_modal_key(&weak, dialog, &callbacks, event)
        }));

        document.append_to_body(backdrop);
        document.append_to_body(dialog);

        Modal {
            dialog,
            backdrop,
            listener,
            restore_focus,
        }
    }

    fn invisible_container(&self) -> ElementId {
        let mut invisible = self.invisible.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(container) = *invisible {
            if self.document.is_connected(container) {
                return container;
            }
        }

        let container = self.document.create_element("div");
        self.document.set_attribute(container, "aria-hidden", "true");
        self.document.set_style(container, "display", "none");
        self.document.append_to_body(container);
        *invisible = Some(container);
        container
    }

    /// Disposes whatever is registered for `action`.
    ///
    /// A pending challenge is settled as cleared and its widget removed.
    /// Returns `false` if nothing was registered.
    pub(crate) fn dispose(&self, action: &str) -> bool {
        let registered = {
            let mut slots = self.slots();
            slots.get_mut(action).and_then(|slot| {
                let callbacks = slot.callbacks.take()?;
                slot.state = WidgetState::Disposed;
                Some((callbacks, slot.handle.take()))
            })
        };

        let Some((callbacks, handle)) = registered else {
            return false;
        };
        callbacks.dispose();
        if let Some(handle) = handle {
            if callbacks.release() {
                self.provider.remove(&handle);
            }
        }
        true
    }

    /// Disposes every registered widget and drops the invisible container.
    pub(crate) fn shutdown(&self) -> usize {
        let actions: Vec<String> = self.slots().keys().cloned().collect();
        let disposed = actions
            .iter()
            .filter(|action| self.dispose(action))
            .count();

        let invisible = self
            .invisible
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(container) = invisible {
            self.document.remove(container);
        }
        disposed
    }
}

struct Modal {
    dialog: ElementId,
    backdrop: ElementId,
    listener: ListenerId,
    restore_focus: Option<ElementId>,
}

fn handle_modal_key(
    document: &Weak<dyn Document>,
    dialog: ElementId,
    callbacks: &ChallengeCallbacks,
    event: &KeyboardEvent,
) -> KeyOutcome {
    match event.key.as_str() {
        "Tab" => match document.upgrade() {
            Some(document) => trap_focus(document.as_ref(), dialog, event.shift_key),
            None => KeyOutcome::Continue,
        },
        "Escape" => {
            callbacks.cancel();
            KeyOutcome::Continue
        }
        _ => KeyOutcome::Continue,
    }
}

/// Keeps Tab focus cycling among the dialog's focusable descendants.
fn trap_focus(document: &dyn Document, dialog: ElementId, backwards: bool) -> KeyOutcome {
    let focusable = document.focusable_descendants(dialog);
    let (Some(&first), Some(&last)) = (focusable.first(), focusable.last()) else {
        return KeyOutcome::PreventDefault;
    };

    let active = document.active_element();
    let inside = active.is_some_and(|element| focusable.contains(&element));

    if backwards && (!inside || active == Some(first)) {
        document.focus(last);
        KeyOutcome::PreventDefault
    } else if !backwards && (!inside || active == Some(last)) {
        document.focus(first);
        KeyOutcome::PreventDefault
    } else {
        KeyOutcome::Continue
    }
}

/// One mounted challenge. Dropping it tears the mount down.
pub(crate) struct MountGuard {
    lifecycle: Arc<WidgetLifecycle>,
    action: String,
    mount_id: u64,
    container: ElementId,
    modal: Option<Modal>,
    handle: Option<WidgetHandle>,
    callbacks: ChallengeCallbacks,
}

impl MountGuard {
    #[cfg(test)]
    pub(crate) fn container(&self) -> ElementId {
        self.container
    }

    #[cfg(test)]
    pub(crate) fn is_modal(&self) -> bool {
        self.modal.is_some()
    }

    /// Asks the provider to render into this mount.
    pub(crate) fn render(&mut self, options: RenderOptions) -> Result<(), BrokerError> {
        let result = self.lifecycle.provider.render(self.container, options);
        match &result {
            Ok(handle) => {
                self.handle = Some(handle.clone());
                self.update_slot(|slot| {
                    // Still registered, i.e. not disposed while rendering
                    if slot.callbacks.is_some() {
                        slot.handle = Some(handle.clone());
                        if slot.state == WidgetState::Mounting {
                            slot.state = WidgetState::AwaitingUser;
                        }
                    }
                });
            }
            Err(_) => self.set_state(WidgetState::Rejected),
        }
        result.map(|_| ())
    }

    /// Waits for the challenge to settle.
    ///
    /// For modal mounts, focus moves into the challenge iframe shortly after
    /// rendering if the provider inserted one.
    pub(crate) async fn wait(
        &mut self,
        mut receiver: oneshot::Receiver<ChallengeOutcome>,
    ) -> ChallengeOutcome {
        if self.modal.is_some() {
            tokio::select! {
                outcome = &mut receiver => return self.settled(outcome),
                _ = tokio::time::sleep(IFRAME_FOCUS_DELAY) => self.focus_iframe(),
            }
        }
        let outcome = receiver.await;
        self.settled(outcome)
    }

    fn settled(
        &self,
        outcome: Result<ChallengeOutcome, oneshot::error::RecvError>,
    ) -> ChallengeOutcome {
        let outcome = outcome.unwrap_or(ChallengeOutcome::Cleared);
        let state = match outcome {
            ChallengeOutcome::Token(_) => WidgetState::Resolved,
            ChallengeOutcome::Failed | ChallengeOutcome::TimedOut => WidgetState::Rejected,
            ChallengeOutcome::Cancelled => WidgetState::Cancelled,
            ChallengeOutcome::Cleared => WidgetState::Disposed,
        };
        self.set_state(state);
        outcome
    }

    fn focus_iframe(&self) {
        let document = &self.lifecycle.document;
        if let Some(iframe) = document.find_descendant(self.container, "iframe") {
            document.focus(iframe);
        }
    }

    fn set_state(&self, state: WidgetState) {
        self.update_slot(|slot| {
            if slot.state != WidgetState::Disposed {
                slot.state = state;
            }
        });
    }

    fn update_slot(&self, update: impl FnOnce(&mut Slot)) {
        let mut slots = self.lifecycle.slots();
        if let Some(slot) = slots.get_mut(&self.action) {
            if slot.mount_id == self.mount_id {
                update(slot);
            }
        }
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        let document = &self.lifecycle.document;

        if let Some(modal) = self.modal.take() {
            document.remove_keydown_listener(modal.listener);
            lock_stack(&self.lifecycle.modals).retain(|&dialog| dialog != modal.dialog);
            document.remove(modal.dialog);
            document.remove(modal.backdrop);

            if let Some(previous) = modal.restore_focus {
                if document.is_connected(previous) {
                    document.focus(previous);
                }
            }
        }

        if let Some(handle) = self.handle.take() {
            if self.callbacks.release() {
                self.lifecycle.provider.remove(&handle);
            }
        }

        // A newer mount for the same action keeps its slot
        let mut slots = self.lifecycle.slots();
        if slots
            .get(&self.action)
            .is_some_and(|slot| slot.mount_id == self.mount_id)
        {
            slots.remove(&self.action);
        }
    }
}
