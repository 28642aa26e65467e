use crate::broker::time_utils::is_expired;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How long a verification token stays usable after it was issued.
pub const TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// A cached verification token and its usage bookkeeping.
///
/// A record is created when a challenge completes, has its `use_count`
/// incremented on every cache hit, and is evicted on expiry, explicit clear,
/// LRU overflow, or once its reuse budget is spent.
///
/// # Validity
///
/// A record is valid only while `now - issued_at < ttl` **and**
/// `use_count < max_uses`.
///
/// # Example
///
/// ```rust
/// use turnstile_broker::{TokenRecord, TOKEN_TTL};
///
/// let record = TokenRecord::new("token-abc", "contact-form", 1_000, 5, false);
/// assert!(record.is_valid(1_000 + 60_000, TOKEN_TTL));
/// assert!(!record.is_valid(1_000 + 300_000, TOKEN_TTL));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// The token handed to consumers, possibly sealed at rest.
    pub token: String,

    /// Milliseconds since the Unix epoch when the provider issued the token.
    pub issued_at: u64,

    /// The action this token was obtained for.
    pub action: String,

    /// How many times the token has been served from the cache.
    pub use_count: u32,

    /// Reuse budget derived from the action's security level.
    pub max_uses: u32,

    /// Whether `token` holds the sealed form rather than the raw token.
    pub encrypted: bool,
}

impl TokenRecord {
    /// Creates a fresh, unused record.
    pub fn new(
        token: impl Into<String>,
        action: impl Into<String>,
        issued_at: u64,
        max_uses: u32,
        encrypted: bool,
    ) -> Self {
        Self {
            token: token.into(),
            issued_at,
            action: action.into(),
            use_count: 0,
            max_uses,
            encrypted,
        }
    }

    pub fn is_expired(&self, now: u64, ttl: Duration) -> bool {
        is_expired(self.issued_at, now, ttl)
    }

    /// Whether the reuse budget has been spent.
    pub fn is_exhausted(&self) -> bool {
        self.use_count >= self.max_uses
    }

    pub fn is_valid(&self, now: u64, ttl: Duration) -> bool {
        !self.is_expired(now, ttl) && !self.is_exhausted()
    }

    /// Uses remaining before the record is exhausted.
    pub fn remaining_uses(&self) -> u32 {
        self.max_uses.saturating_sub(self.use_count)
    }
}

// Tokens are bearer credentials; keep them out of logs.
impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("action", &self.action)
            .field("use_count", &self.use_count)
            .field("max_uses", &self.max_uses)
            .field("encrypted", &self.encrypted)
            .finish()
    }
}
