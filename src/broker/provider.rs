//! The verification provider seam.
//!
//! A [`ChallengeProvider`] is the page-global widget library: it renders a
//! challenge into a container and later reports the outcome through the
//! [`ChallengeCallbacks`] it was handed. The callbacks turn that
//! callback-style API into a single awaited outcome per challenge.

use crate::broker::dom::ElementId;
use crate::broker::error::BrokerError;
use crate::broker::policy::Appearance;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Opaque widget identifier returned by [`ChallengeProvider::render`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WidgetHandle(pub String);

impl WidgetHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WidgetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything passed to a single render call.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub sitekey: String,
    pub action: String,
    pub appearance: Appearance,
    /// Provider language code, e.g. `"auto"` or `"de"`
    pub language: String,
    /// Provider theme, e.g. `"auto"`
    pub theme: String,
    pub callbacks: ChallengeCallbacks,
}

/// The page-global verification provider.
///
/// # Example Implementation
///
/// ```rust
/// use turnstile_broker::{BrokerError, ChallengeProvider, ElementId, RenderOptions, WidgetHandle};
///
/// /// Passes every challenge immediately.
/// struct AlwaysPass;
///
/// impl ChallengeProvider for AlwaysPass {
///     fn is_ready(&self) -> bool {
///         true
///     }
///
///     fn render(&self, _container: ElementId, options: RenderOptions) -> Result<WidgetHandle, BrokerError> {
///         options.callbacks.success(format!("token-for-{}", options.action));
///         Ok(WidgetHandle::new("widget-1"))
///     }
///
///     fn remove(&self, _handle: &WidgetHandle) {}
/// }
/// ```
pub trait ChallengeProvider: Send + Sync {
    /// The provider's global readiness flag.
    fn is_ready(&self) -> bool;

    /// Renders a challenge into `container`.
    ///
    /// The provider reports the outcome later through `options.callbacks`;
    /// it may also settle them before returning.
    fn render(
        &self,
        container: ElementId,
        options: RenderOptions,
    ) -> Result<WidgetHandle, BrokerError>;

    /// Destroys a rendered widget.
    fn remove(&self, handle: &WidgetHandle);
}

/// How a single challenge attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Token(String),
    Failed,
    TimedOut,
    Cancelled,
    Cleared,
}

impl ChallengeOutcome {
    /// The token, or the error this outcome stands for.
    pub fn into_result(self) -> Result<String, BrokerError> {
        match self {
            ChallengeOutcome::Token(token) => Ok(token),
            ChallengeOutcome::Failed => Err(BrokerError::ChallengeFailed),
            ChallengeOutcome::TimedOut => Err(BrokerError::ChallengeTimeout),
            ChallengeOutcome::Cancelled => Err(BrokerError::Cancelled),
            ChallengeOutcome::Cleared => Err(BrokerError::Cleared),
        }
    }
}

type ExpiryHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

struct CallbackSlot {
    action: String,
    sender: Mutex<Option<oneshot::Sender<ChallengeOutcome>>>,
    // Token delivered through `success`, kept for the expiry callback
    issued: Mutex<Option<String>>,
    released: AtomicBool,
    disposed: AtomicBool,
    on_expired: ExpiryHook,
}

/// The provider-facing callbacks of one challenge attempt.
///
/// Cheap to clone; all clones share one slot. The first of
/// [`success`](Self::success), [`error`](Self::error),
/// [`timeout`](Self::timeout), Escape cancellation or disposal settles the
/// challenge. Every later call returns `false` and has no effect.
#[derive(Clone)]
pub struct ChallengeCallbacks {
    slot: Arc<CallbackSlot>,
}

impl ChallengeCallbacks {
    /// Creates callbacks for `action` plus the receiver of their outcome.
    ///
    /// `on_expired` receives the action and the issued token when the
    /// provider reports that token expired.
    pub fn channel(
        action: impl Into<String>,
        on_expired: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> (Self, oneshot::Receiver<ChallengeOutcome>) {
        let (sender, receiver) = oneshot::channel();
        let callbacks = Self {
            slot: Arc::new(CallbackSlot {
                action: action.into(),
                sender: Mutex::new(Some(sender)),
                issued: Mutex::new(None),
                released: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                on_expired: Arc::new(on_expired),
            }),
        };
        (callbacks, receiver)
    }

    pub fn action(&self) -> &str {
        &self.slot.action
    }

    /// The provider issued a token.
    pub fn success(&self, token: impl Into<String>) -> bool {
        let token = token.into();
        let Some(sender) = self.sender().take() else {
            return false;
        };
        *self.slot.issued.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        let _ = sender.send(ChallengeOutcome::Token(token));
        true
    }

    /// The provider's error callback.
    pub fn error(&self) -> bool {
        self.settle(ChallengeOutcome::Failed)
    }

    /// The provider's timeout callback.
    pub fn timeout(&self) -> bool {
        self.settle(ChallengeOutcome::TimedOut)
    }

    /// The provider's expiry callback: the issued token is no longer valid.
    ///
    /// A no-op before a token was issued and after the challenge was
    /// disposed.
    pub fn expired(&self) {
        if self.is_disposed() {
            return;
        }
        let issued = self
            .slot
            .issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(token) = issued {
            (self.slot.on_expired)(&self.slot.action, &token);
        }
    }

    /// Whether the challenge has already been settled.
    pub fn is_settled(&self) -> bool {
        self.sender().is_none()
    }

    pub fn is_disposed(&self) -> bool {
        self.slot.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel(&self) -> bool {
        self.settle(ChallengeOutcome::Cancelled)
    }

    /// Claims the widget for removal. Returns `true` for the first caller
    /// only, which then owns the provider `remove` call.
    pub(crate) fn release(&self) -> bool {
        !self.slot.released.swap(true, Ordering::SeqCst)
    }

    /// Marks the challenge disposed and settles it as cleared if still
    /// pending. Later callbacks, expiry included, are ignored.
    pub(crate) fn dispose(&self) {
        self.slot.disposed.store(true, Ordering::SeqCst);
        self.settle(ChallengeOutcome::Cleared);
    }

    fn sender(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<ChallengeOutcome>>> {
        self.slot.sender.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn settle(&self, outcome: ChallengeOutcome) -> bool {
        let Some(sender) = self.sender().take() else {
            return false;
        };
        // A dropped receiver means nobody awaits the outcome any more
        let _ = sender.send(outcome);
        true
    }
}

impl fmt::Debug for ChallengeCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeCallbacks")
            .field("action", &self.slot.action)
            .field("settled", &self.is_settled())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_first_callback_wins() {
        let (callbacks, receiver) = ChallengeCallbacks::channel("login", |_, _| {});
        let clone = callbacks.clone();

        assert!(clone.success("tok-1"));
        assert!(!callbacks.error());
        assert!(!callbacks.timeout());
        assert!(!callbacks.success("tok-2"));
        assert!(callbacks.is_settled());

        assert_eq!(
            receiver.await.unwrap(),
            ChallengeOutcome::Token("tok-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_dispose_settles_as_cleared() {
        let (callbacks, receiver) = ChallengeCallbacks::channel("login", |_, _| {});

        callbacks.dispose();
        callbacks.dispose();
        assert!(!callbacks.success("late"));
        assert!(callbacks.is_disposed());
        assert_eq!(receiver.await.unwrap(), ChallengeOutcome::Cleared);
    }

    #[test]
    fn test_release_is_claimed_once() {
        let (callbacks, _receiver) = ChallengeCallbacks::channel("login", |_, _| {});
        assert!(callbacks.release());
        assert!(!callbacks.clone().release());
    }

    #[test]
    fn test_expired_runs_hook_until_disposed() {
        let calls = Arc::new(AtomicU32::new(0));
        let (callbacks, _receiver) = ChallengeCallbacks::channel("newsletter", {
            let calls = Arc::clone(&calls);
            move |action: &str, token: &str| {
                assert_eq!(action, "newsletter");
                assert_eq!(token, "tok");
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Nothing issued yet
        callbacks.expired();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        callbacks.success("tok");
        callbacks.expired();
        callbacks.expired();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        callbacks.dispose();
        callbacks.expired();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_settling_without_receiver_is_harmless() {
        let (callbacks, receiver) = ChallengeCallbacks::channel("login", |_, _| {});
        drop(receiver);
        assert!(callbacks.timeout());
    }

    #[test]
    fn test_outcome_errors() {
        assert_eq!(
            ChallengeOutcome::Token("t".into()).into_result(),
            Ok("t".to_string())
        );
        assert_eq!(
            ChallengeOutcome::Failed.into_result(),
            Err(BrokerError::ChallengeFailed)
        );
        assert_eq!(
            ChallengeOutcome::TimedOut.into_result(),
            Err(BrokerError::ChallengeTimeout)
        );
        assert_eq!(
            ChallengeOutcome::Cancelled.into_result(),
            Err(BrokerError::Cancelled)
        );
        assert_eq!(
            ChallengeOutcome::Cleared.into_result(),
            Err(BrokerError::Cleared)
        );
    }
}
