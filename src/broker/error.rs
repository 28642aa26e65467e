use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Broad category of a [`BrokerError`].
///
/// Calling UI can use the category to pick a message, and
/// [`BrokerError::is_retryable`] to decide whether to offer a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The provider script could not be loaded or is not ready yet.
    Script,
    /// The provider reported a failure, timeout, or the challenge was abandoned.
    Challenge,
    /// A transient transport failure surfaced by the provider.
    Network,
    /// The broker is misconfigured.
    Validation,
}

/// Error types that can occur while obtaining a verification token.
///
/// Every variant maps to an [`ErrorKind`], a stable machine-readable
/// [`code`](BrokerError::code), and a retryable flag.
///
/// # Error Categories
///
/// - **Validation**: `MissingSiteKey`, `InvalidConfig`
/// - **Script**: `ScriptLoad`, `NotReady`
/// - **Challenge**: `ChallengeFailed`, `ChallengeTimeout`, `ChallengeRetry`, `Render`,
///   `Cancelled`, `Cleared`
/// - **Network**: `Network`
///
/// # Example
///
/// ```rust
/// use turnstile_broker::{BrokerError, ErrorKind};
///
/// let error = BrokerError::Cancelled;
/// assert_eq!(error.kind(), ErrorKind::Challenge);
/// assert_eq!(error.code(), "CHALLENGE_CANCELLED");
/// assert!(!error.is_retryable());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No site key was configured.
    ///
    /// This is fatal to initialization; the broker cannot render any
    /// challenge without a site key.
    #[error("No Turnstile site key configured")]
    MissingSiteKey,

    /// The configuration is otherwise unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The provider script failed to load.
    ///
    /// Raised after the script bootstrap exhausted its retry budget, or
    /// when the provider never reported readiness.
    #[error("{0}")]
    ScriptLoad(String),

    /// A challenge was requested before the provider script finished loading.
    ///
    /// The broker fails fast instead of queueing the request.
    #[error("Turnstile is not ready")]
    NotReady,

    /// The provider invoked its error callback.
    #[error("Turnstile challenge failed")]
    ChallengeFailed,

    /// The provider invoked its timeout callback.
    #[error("Turnstile challenge timed out")]
    ChallengeTimeout,

    /// A challenge attempt failed and the broker is about to retry.
    ///
    /// Only ever published through the broker's observable error state;
    /// it is never returned from a token request.
    #[error("Challenge failed, retrying... ({remaining} attempts left)")]
    ChallengeRetry {
        /// Attempts still available after this one.
        remaining: u32,
    },

    /// The provider rejected the render call itself.
    #[error("Failed to render challenge: {0}")]
    Render(String),

    /// The user dismissed the challenge dialog with the Escape key.
    #[error("Challenge cancelled by user")]
    Cancelled,

    /// The challenge was disposed by `clear_token` before it completed.
    #[error("Challenge cleared before completion")]
    Cleared,

    /// A transport failure reported by the provider.
    #[error("Network error: {0}")]
    Network(String),
}

impl BrokerError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::MissingSiteKey | BrokerError::InvalidConfig(_) => ErrorKind::Validation,
            BrokerError::ScriptLoad(_) | BrokerError::NotReady => ErrorKind::Script,
            BrokerError::Network(_) => ErrorKind::Network,
            BrokerError::ChallengeFailed
            | BrokerError::ChallengeTimeout
            | BrokerError::ChallengeRetry { .. }
            | BrokerError::Render(_)
            | BrokerError::Cancelled
            | BrokerError::Cleared => ErrorKind::Challenge,
        }
    }

    /// Returns a stable code suitable for logs and analytics.
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::MissingSiteKey => "MISSING_SITE_KEY",
            BrokerError::InvalidConfig(_) => "INVALID_CONFIG",
            BrokerError::ScriptLoad(_) => "SCRIPT_LOAD_FAILED",
            BrokerError::NotReady => "NOT_READY",
            BrokerError::ChallengeFailed => "CHALLENGE_FAILED",
            BrokerError::ChallengeTimeout => "CHALLENGE_TIMEOUT",
            BrokerError::ChallengeRetry { .. } => "CHALLENGE_RETRY",
            BrokerError::Render(_) => "RENDER_FAILED",
            BrokerError::Cancelled => "CHALLENGE_CANCELLED",
            BrokerError::Cleared => "CHALLENGE_CLEARED",
            BrokerError::Network(_) => "NETWORK_ERROR",
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// User cancellation, explicit clearing, and configuration problems are
    /// never retried automatically.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            BrokerError::MissingSiteKey
                | BrokerError::InvalidConfig(_)
                | BrokerError::Cancelled
                | BrokerError::Cleared
        )
    }
}

/// Serializable view of a [`BrokerError`] for UI state and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    pub code: String,
    pub retryable: bool,
}

impl BrokerError {
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
            code: self.code().to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl Serialize for BrokerError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.info().serialize(serializer)
    }
}
