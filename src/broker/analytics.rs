//! Usage analytics for the token broker.
//!
//! Counts challenge requests and outcomes, cache hits and misses, and keeps a
//! running average of how long successful challenges take. Collection can be
//! switched off with `enable_analytics`, in which case [`NoOpAnalytics`] is
//! plugged in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time view of the broker's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    /// Challenges started through `execute_challenge`
    pub challenges_requested: u64,
    /// Challenges that produced a token
    pub challenges_completed: u64,
    /// Challenges that ended in an error after all retries
    pub challenges_failed: u64,
    /// Running average duration of completed challenges
    pub avg_challenge_time_ms: f64,
    /// Tokens served from the cache
    pub token_cache_hits: u64,
    /// Token requests the cache could not serve
    pub token_cache_misses: u64,
}

impl AnalyticsSnapshot {
    /// Share of cache lookups that were served from the cache, in `[0, 1]`.
    pub fn cache_hit_ratio(&self) -> f64 {
        let lookups = self.token_cache_hits + self.token_cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.token_cache_hits as f64 / lookups as f64
        }
    }
}

/// Events reported by the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsEvent {
    /// A challenge was started
    ChallengeRequested { action: String },
    /// A challenge produced a token
    ChallengeCompleted { action: String, duration: Duration },
    /// A challenge failed for good
    ChallengeFailed {
        action: String,
        duration: Duration,
        /// Stable code of the final error
        error_code: &'static str,
    },
    /// A token was served from the cache
    CacheHit { action: String },
    /// The cache had no usable token
    CacheMiss { action: String },
}

/// Backend for broker analytics.
///
/// Implementations must be thread-safe; the broker may record events from
/// several concurrent token requests.
///
/// # Example Implementation
///
/// ```rust
/// use turnstile_broker::{AnalyticsEvent, AnalyticsRecorder, AnalyticsSnapshot};
/// use async_trait::async_trait;
/// use tokio::sync::Mutex;
///
/// #[derive(Default)]
/// pub struct EventLog {
///     events: Mutex<Vec<AnalyticsEvent>>,
/// }
///
/// #[async_trait]
/// impl AnalyticsRecorder for EventLog {
///     async fn record_event(&self, event: AnalyticsEvent) {
///         self.events.lock().await.push(event);
///     }
///
///     async fn snapshot(&self) -> AnalyticsSnapshot {
///         AnalyticsSnapshot::default()
///     }
///
///     async fn reset(&self) {
///         self.events.lock().await.clear();
///     }
/// }
/// ```
#[async_trait]
pub trait AnalyticsRecorder: Send + Sync {
    /// Record one event. Should be cheap; it sits on the token request path.
    async fn record_event(&self, event: AnalyticsEvent);

    /// Current counters.
    async fn snapshot(&self) -> AnalyticsSnapshot;

    /// Reset every counter to zero.
    async fn reset(&self);
}

/// Default recorder backed by atomic counters.
///
/// # Example
///
/// ```rust
/// use turnstile_broker::{AnalyticsEvent, AnalyticsRecorder, InMemoryAnalytics};
/// use std::time::Duration;
///
/// # async fn example() {
/// let analytics = InMemoryAnalytics::new();
/// analytics
///     .record_event(AnalyticsEvent::ChallengeCompleted {
///         action: "login".to_string(),
///         duration: Duration::from_millis(800),
///     })
///     .await;
///
/// let snapshot = analytics.snapshot().await;
/// assert_eq!(snapshot.challenges_completed, 1);
/// assert_eq!(snapshot.avg_challenge_time_ms, 800.0);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryAnalytics {
    challenges_requested: AtomicU64,
    challenges_completed: AtomicU64,
    challenges_failed: AtomicU64,
    token_cache_hits: AtomicU64,
    token_cache_misses: AtomicU64,

    // Sum of completed challenge durations in microseconds
    challenge_time_total_us: AtomicU64,
}

impl InMemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalyticsRecorder for InMemoryAnalytics {
    async fn record_event(&self, event: AnalyticsEvent) {
        match event {
            AnalyticsEvent::ChallengeRequested { .. } => {
                self.challenges_requested.fetch_add(1, Ordering::Relaxed);
            }
            AnalyticsEvent::ChallengeCompleted { duration, .. } => {
                self.challenge_time_total_us
                    .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
                self.challenges_completed.fetch_add(1, Ordering::Relaxed);
            }
            AnalyticsEvent::ChallengeFailed { .. } => {
                self.challenges_failed.fetch_add(1, Ordering::Relaxed);
            }
            AnalyticsEvent::CacheHit { .. } => {
                self.token_cache_hits.fetch_add(1, Ordering::Relaxed);
            }
            AnalyticsEvent::CacheMiss { .. } => {
                self.token_cache_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn snapshot(&self) -> AnalyticsSnapshot {
        let completed = self.challenges_completed.load(Ordering::Relaxed);
        let total_us = self.challenge_time_total_us.load(Ordering::Relaxed);

        AnalyticsSnapshot {
            challenges_requested: self.challenges_requested.load(Ordering::Relaxed),
            challenges_completed: completed,
            challenges_failed: self.challenges_failed.load(Ordering::Relaxed),
            avg_challenge_time_ms: if completed > 0 {
                total_us as f64 / completed as f64 / 1_000.0
            } else {
                0.0
            },
            token_cache_hits: self.token_cache_hits.load(Ordering::Relaxed),
            token_cache_misses: self.token_cache_misses.load(Ordering::Relaxed),
        }
    }

    async fn reset(&self) {
        self.challenges_requested.store(0, Ordering::Relaxed);
        self.challenges_completed.store(0, Ordering::Relaxed);
        self.challenges_failed.store(0, Ordering::Relaxed);
        self.token_cache_hits.store(0, Ordering::Relaxed);
        self.token_cache_misses.store(0, Ordering::Relaxed);
        self.challenge_time_total_us.store(0, Ordering::Relaxed);
    }
}

/// Recorder that discards everything.
#[derive(Debug, Default)]
pub struct NoOpAnalytics;

impl NoOpAnalytics {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnalyticsRecorder for NoOpAnalytics {
    async fn record_event(&self, _event: AnalyticsEvent) {}

    async fn snapshot(&self) -> AnalyticsSnapshot {
        AnalyticsSnapshot::default()
    }

    async fn reset(&self) {}
}
