//! Time utilities for token bookkeeping.
//!
//! Token records carry wall-clock issue times in milliseconds since the Unix
//! epoch so snapshots stay meaningful outside the process.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A clock returning milliseconds since the Unix epoch.
///
/// Injected into the broker so tests can move time forward.
pub type TimeProviderFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Get current timestamp in milliseconds since Unix epoch.
///
/// A system clock set before the epoch yields zero instead of panicking.
pub(crate) fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The system clock as a [`TimeProviderFn`].
pub fn system_time_provider() -> TimeProviderFn {
    Arc::new(current_millis)
}

/// Check if something issued at `issued_at` has outlived `ttl` at `now`.
pub(crate) fn is_expired(issued_at: u64, now: u64, ttl: Duration) -> bool {
    now.saturating_sub(issued_at) >= ttl.as_millis() as u64
}
