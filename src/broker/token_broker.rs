use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::time::Instant;

use crate::broker::analytics::{AnalyticsEvent, AnalyticsRecorder, AnalyticsSnapshot};
use crate::broker::builder::TokenBrokerBuilder;
use crate::broker::cache::TokenCache;
use crate::broker::config::BrokerConfig;
use crate::broker::dom::Document;
use crate::broker::encryption::TokenSealer;
use crate::broker::error::BrokerError;
use crate::broker::provider::{ChallengeCallbacks, ChallengeProvider, RenderOptions};
use crate::broker::record::TokenRecord;
use crate::broker::script::ScriptLoader;
use crate::broker::time_utils::TimeProviderFn;
use crate::broker::widget::{WidgetLifecycle, WidgetState};

/// Action warmed by [`TokenBroker::preload`].
pub const PRELOAD_ACTION: &str = "pageload";

// Debug output is opt-in per broker through `debug_mode`.
macro_rules! broker_debug {
    ($inner:expr, $($arg:tt)*) => {
        if $inner.config.debug_mode {
            tracing::debug!(target: "turnstile", $($arg)*);
        }
    };
}

#[derive(Debug, Default)]
struct Status {
    ready: bool,
    loading: bool,
    error: Option<BrokerError>,
}

/// Obtains, caches and hands out verification tokens.
///
/// The broker decides per action whether a cached token may be reused,
/// runs challenges through the provider with retries when it may not, and
/// keeps usage analytics. Cloning is cheap; clones share one cache.
///
/// To create an instance, use [`TokenBroker::builder`].
///
/// # Example
///
/// ```rust,no_run
/// use turnstile_broker::{BrokerConfig, ChallengeProvider, MemoryDocument, TokenBroker};
/// use std::sync::Arc;
///
/// # async fn example(provider: Arc<dyn ChallengeProvider>) -> Result<(), turnstile_broker::BrokerError> {
/// let broker = TokenBroker::builder(provider, Arc::new(MemoryDocument::new()))
///     .with_config(BrokerConfig::default().with_site_key("0x4AAAAAAA"))
///     .build_and_init()
///     .await?;
///
/// let token = broker.get_token("contact-form").await?;
/// println!("submit with token {token}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TokenBroker {
    inner: Arc<BrokerInner>,
}

pub(crate) struct BrokerInner {
    pub(crate) config: BrokerConfig,
    site_key: String,
    document: Arc<dyn Document>,
    provider: Arc<dyn ChallengeProvider>,
    widgets: Arc<WidgetLifecycle>,
    cache: Mutex<TokenCache>,
    analytics: Arc<dyn AnalyticsRecorder>,
    sealer: Option<TokenSealer>,
    clock: TimeProviderFn,
    status: Mutex<Status>,
}

/// Externally observable broker state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerState {
    pub is_ready: bool,
    pub is_loading: bool,
    /// Most recent error, including transient retry notices
    pub error: Option<BrokerError>,
    /// Cached tokens, least recently used first
    pub tokens: Vec<TokenRecord>,
    pub analytics: AnalyticsSnapshot,
}

impl BrokerState {
    /// One-line status report.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Ready: {}, Loading: {}, Tokens cached: {}, Cache hits: {}, Cache misses: {}, Challenges: {}/{}, Avg time: {}ms",
            if self.is_ready { "yes" } else { "no" },
            if self.is_loading { "yes" } else { "no" },
            self.tokens.len(),
            self.analytics.token_cache_hits,
            self.analytics.token_cache_misses,
            self.analytics.challenges_completed,
            self.analytics.challenges_requested,
            self.analytics.avg_challenge_time_ms.round(),
        );
        if let Some(error) = &self.error {
            summary.push_str(&format!(", Error: {error}"));
        }
        summary
    }
}

impl TokenBroker {
    /// Creates a builder for a broker over `provider` and `document`.
    pub fn builder(
        provider: Arc<dyn ChallengeProvider>,
        document: Arc<dyn Document>,
    ) -> TokenBrokerBuilder {
        TokenBrokerBuilder::new(provider, document)
    }

    pub(crate) fn new(
        config: BrokerConfig,
        site_key: String,
        provider: Arc<dyn ChallengeProvider>,
        document: Arc<dyn Document>,
        analytics: Arc<dyn AnalyticsRecorder>,
        clock: TimeProviderFn,
    ) -> Self {
        let widgets = Arc::new(WidgetLifecycle::new(
            Arc::clone(&document),
            Arc::clone(&provider),
            config.language,
        ));
        let sealer = config.enable_encryption.then(TokenSealer::new);

        Self {
            inner: Arc::new(BrokerInner {
                cache: Mutex::new(TokenCache::new(config.max_cache_size)),
                config,
                site_key,
                document,
                provider,
                widgets,
                analytics,
                sealer,
                clock,
                status: Mutex::new(Status::default()),
            }),
        }
    }

    /// Loads the provider script and marks the broker ready.
    ///
    /// An already present script tag is never injected twice; the broker
    /// waits for the provider's readiness flag instead. With
    /// `preload_on_ready` set, a token for [`PRELOAD_ACTION`] is fetched
    /// afterwards.
    pub async fn init(&self) -> Result<(), BrokerError> {
        let inner = &self.inner;
        {
            let mut status = inner.status();
            status.loading = true;
            status.error = None;
        }

        let loader = ScriptLoader {
            document: inner.document.as_ref(),
            provider: inner.provider.as_ref(),
            script_url: &inner.config.script_url,
            script_marker: &inner.config.script_marker,
            backoff: inner.config.backoff(),
            ready_timeout: inner.config.ready_timeout(),
        };
        let result = loader
            .load(|remaining, error| {
                broker_debug!(inner, "Retrying script load, attempts remaining: {remaining} ({error})");
            })
            .await;

        match result {
            Ok(bootstrap) => {
                {
                    let mut status = inner.status();
                    status.ready = true;
                    status.loading = false;
                }
                broker_debug!(inner, ?bootstrap, "Turnstile ready");

                if inner.config.preload_on_ready {
                    self.preload().await;
                }
                Ok(())
            }
            Err(error) => {
                let mut status = inner.status();
                status.loading = false;
                status.error = Some(error.clone());
                Err(error)
            }
        }
    }

    /// Returns a token for `action`, from the cache when policy allows.
    ///
    /// High-security actions always run a fresh challenge. Otherwise a valid
    /// cached token is handed out and its use counted; a miss runs a
    /// challenge.
    pub async fn get_token(&self, action: &str) -> Result<String, BrokerError> {
        let inner = &self.inner;

        if inner.config.security_levels.is_high_security(action) {
            broker_debug!(inner, "High-security action \"{action}\", fetching new token");
            inner.record(AnalyticsEvent::CacheMiss {
                action: action.to_string(),
            })
            .await;
            return self.execute_challenge(action).await;
        }

        if let Some(token) = inner.take_cached(action) {
            broker_debug!(inner, "Using cached token for action \"{action}\"");
            inner.record(AnalyticsEvent::CacheHit {
                action: action.to_string(),
            })
            .await;
            return Ok(token);
        }

        broker_debug!(inner, "No valid cached token for action \"{action}\", executing challenge");
        inner.record(AnalyticsEvent::CacheMiss {
            action: action.to_string(),
        })
        .await;
        self.execute_challenge(action).await
    }

    /// [`get_token`](Self::get_token) for the configured default action.
    pub async fn get_default_token(&self) -> Result<String, BrokerError> {
        let action = self.inner.config.default_action.clone();
        self.get_token(&action).await
    }

    /// Runs a fresh challenge for `action`, bypassing the cache lookup.
    ///
    /// Attempts are retried with exponential backoff; cancellation and
    /// clearing end the challenge immediately. Fails fast with
    /// [`BrokerError::NotReady`] before [`init`](Self::init) succeeded.
    pub async fn execute_challenge(&self, action: &str) -> Result<String, BrokerError> {
        let inner = &self.inner;
        if !inner.status().ready || !inner.provider.is_ready() {
            return Err(BrokerError::NotReady);
        }

        inner.record(AnalyticsEvent::ChallengeRequested {
            action: action.to_string(),
        })
        .await;
        let started = Instant::now();

        let result = inner
            .config
            .backoff()
            .run_if(
                || inner.attempt(action),
                BrokerError::is_retryable,
                |remaining, error| {
                    broker_debug!(inner, "Retrying challenge execution, attempts remaining: {remaining} ({error})");
                    inner.status().error = Some(BrokerError::ChallengeRetry { remaining });
                },
            )
            .await;

        let duration = started.elapsed();
        match &result {
            Ok(_) => {
                {
                    let mut status = inner.status();
                    if matches!(status.error, Some(BrokerError::ChallengeRetry { .. })) {
                        status.error = None;
                    }
                }
                inner.record(AnalyticsEvent::ChallengeCompleted {
                    action: action.to_string(),
                    duration,
                })
                .await;
            }
            Err(error) => {
                broker_debug!(inner, "Challenge for action \"{action}\" failed: {error}");
                inner.status().error = Some(error.clone());
                inner.record(AnalyticsEvent::ChallengeFailed {
                    action: action.to_string(),
                    duration,
                    error_code: error.code(),
                })
                .await;
            }
        }
        result
    }

    /// Drops the cached token for `action` and disposes its widget.
    ///
    /// A challenge still in flight for the action fails with
    /// [`BrokerError::Cleared`]; its token, should one still arrive, is not
    /// cached. Clearing an unknown action does nothing.
    pub fn clear_token(&self, action: &str) {
        let inner = &self.inner;
        let removed = inner.cache().remove(action).is_some();
        let disposed = inner.widgets.dispose(action);
        broker_debug!(inner, removed, disposed, "Cleared token for action: {action}");
    }

    /// Best-effort [`get_token`](Self::get_token) that never fails.
    pub async fn preload_token(&self, action: &str) {
        if !self.is_ready() {
            return;
        }
        broker_debug!(self.inner, "Preloading token for action: {action}");
        if let Err(error) = self.get_token(action).await {
            broker_debug!(self.inner, "Failed to preload token: {error}");
        }
    }

    /// Preloads a token for [`PRELOAD_ACTION`].
    pub async fn preload(&self) {
        self.preload_token(PRELOAD_ACTION).await;
    }

    pub async fn reset_analytics(&self) {
        self.inner.analytics.reset().await;
    }

    pub async fn analytics(&self) -> AnalyticsSnapshot {
        self.inner.analytics.snapshot().await
    }

    /// Snapshot of readiness, the last error, cached tokens and analytics.
    pub async fn state(&self) -> BrokerState {
        let (is_ready, is_loading, error) = {
            let status = self.inner.status();
            (status.ready, status.loading, status.error.clone())
        };
        BrokerState {
            is_ready,
            is_loading,
            error,
            tokens: self.cached_tokens(),
            analytics: self.analytics().await,
        }
    }

    /// Cached token records, least recently used first.
    pub fn cached_tokens(&self) -> Vec<TokenRecord> {
        self.inner
            .cache()
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.status().ready
    }

    pub fn is_loading(&self) -> bool {
        self.inner.status().loading
    }

    pub fn error(&self) -> Option<BrokerError> {
        self.inner.status().error.clone()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Lifecycle state of the challenge mounted for `action`, `Idle` when
    /// none is.
    pub fn widget_state(&self, action: &str) -> WidgetState {
        self.inner.widgets.state(action)
    }

    /// Disposes every outstanding widget.
    ///
    /// Pending challenges fail with [`BrokerError::Cleared`]. Also runs when
    /// the last clone of the broker is dropped.
    pub fn shutdown(&self) {
        let disposed = self.inner.widgets.shutdown();
        broker_debug!(self.inner, disposed, "Broker shut down");
    }
}

impl fmt::Debug for TokenBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.inner.status();
        f.debug_struct("TokenBroker")
            .field("ready", &status.ready)
            .field("loading", &status.loading)
            .field("error", &status.error)
            .field("cached_tokens", &self.inner.cache().len())
            .finish_non_exhaustive()
    }
}

impl BrokerInner {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cache(&self) -> MutexGuard<'_, TokenCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn record(&self, event: AnalyticsEvent) {
        self.analytics.record_event(event).await;
    }

    /// Hands out a valid cached token and counts the use.
    ///
    /// Invalid records are evicted on the way. Returns `None` on a miss.
    fn take_cached(&self, action: &str) -> Option<String> {
        let now = (self.clock)();
        let ttl = self.config.token_ttl();

        let (stored, encrypted) = {
            let mut cache = self.cache();
            if !cache.peek(action)?.is_valid(now, ttl) {
                cache.remove(action);
                return None;
            }

            let record = cache.get_mut(action)?;
            record.use_count += 1;
            let taken = (record.token.clone(), record.encrypted);
            if self.config.consume_on_cache_hit || record.is_exhausted() {
                cache.remove(action);
            }
            taken
        };

        if !encrypted {
            return Some(stored);
        }
        let token = self.sealer.as_ref().and_then(|sealer| sealer.open(&stored));
        if token.is_none() {
            broker_debug!(self, "Discarding unreadable sealed token for action \"{action}\"");
            self.cache().remove(action);
        }
        token
    }

    /// Caches a freshly issued token, sealing it if configured.
    fn store(&self, action: &str, token: &str, max_uses: u32) {
        let sealed = self.sealer.as_ref().and_then(|sealer| sealer.seal(token));
        if self.sealer.is_some() && sealed.is_none() {
            broker_debug!(self, "Token sealing unavailable, caching plain token");
        }
        let encrypted = sealed.is_some();
        let stored = sealed.unwrap_or_else(|| token.to_string());

        let record = TokenRecord::new(stored, action, (self.clock)(), max_uses, encrypted);
        if let Some((evicted, _)) = self.cache().insert(action.to_string(), record) {
            broker_debug!(self, "Evicted cached token for action \"{evicted}\"");
        }
    }

    /// Handles the provider's expiry callback for a token it issued.
    ///
    /// Only removes the cached record if it still holds that token.
    fn expire_token(&self, action: &str, token: &str) {
        let mut cache = self.cache();
        let Some(record) = cache.peek(action) else {
            return;
        };
        let cached = if record.encrypted {
            self.sealer
                .as_ref()
                .and_then(|sealer| sealer.open(&record.token))
        } else {
            Some(record.token.clone())
        };
        if cached.as_deref() == Some(token) {
            cache.remove(action);
            drop(cache);
            broker_debug!(self, "Token for action \"{action}\" expired");
        }
    }

    /// One challenge attempt: mount, render, wait, store, tear down.
    async fn attempt(self: &Arc<Self>, action: &str) -> Result<String, BrokerError> {
        let level = self.config.security_levels.level_of(action);

        let weak = Arc::downgrade(self);
        let (callbacks, receiver) = ChallengeCallbacks::channel(action, move |action, token| {
            if let Some(inner) = weak.upgrade() {
                inner.expire_token(action, token);
            }
        });

        let mut mount = self
            .widgets
            .mount(action, level.is_high_security(), callbacks.clone());
        mount.render(RenderOptions {
            sitekey: self.site_key.clone(),
            action: action.to_string(),
            appearance: level.appearance(self.config.appearance),
            language: self.config.language.as_str().to_string(),
            theme: self.config.theme.as_str().to_string(),
            callbacks: callbacks.clone(),
        })?;

        let token = mount.wait(receiver).await.into_result()?;

        // Cleared while the token was on its way
        if callbacks.is_disposed() {
            broker_debug!(self, "Dropping token for cleared action \"{action}\"");
            return Err(BrokerError::Cleared);
        }

        // Single-use tokens are consumed by this very call
        if level.is_cacheable() {
            self.store(action, &token, level.max_uses());
        }
        drop(mount);
        Ok(token)
    }
}

impl Drop for BrokerInner {
    fn drop(&mut self) {
        self.widgets.shutdown();
    }
}
