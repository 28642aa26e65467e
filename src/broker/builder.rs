use std::sync::Arc;

use crate::broker::analytics::{AnalyticsRecorder, InMemoryAnalytics, NoOpAnalytics};
use crate::broker::config::BrokerConfig;
use crate::broker::dom::Document;
use crate::broker::error::BrokerError;
use crate::broker::provider::ChallengeProvider;
use crate::broker::time_utils::{TimeProviderFn, system_time_provider};
use crate::broker::token_broker::TokenBroker;

/// A builder for creating a [`TokenBroker`].
///
/// Defaults to [`BrokerConfig::default`], in-memory analytics and the system
/// clock. The configuration must carry a site key.
#[must_use = "The builder does nothing unless `.build()` or `.build_and_init()` is called."]
pub struct TokenBrokerBuilder {
    provider: Arc<dyn ChallengeProvider>,
    document: Arc<dyn Document>,
    config: BrokerConfig,
    analytics: Option<Arc<dyn AnalyticsRecorder>>,
    clock: Option<TimeProviderFn>,
}

impl TokenBrokerBuilder {
    pub(crate) fn new(provider: Arc<dyn ChallengeProvider>, document: Arc<dyn Document>) -> Self {
        Self {
            provider,
            document,
            config: BrokerConfig::default(),
            analytics: None,
            clock: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the site key on the current configuration.
    pub fn with_site_key(mut self, site_key: impl Into<String>) -> Self {
        self.config.site_key = Some(site_key.into());
        self
    }

    /// Records analytics into a custom backend.
    ///
    /// Ignored when `enable_analytics` is off.
    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsRecorder>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Uses a custom clock (milliseconds since the Unix epoch) for token ages.
    pub fn with_time_provider(mut self, clock: TimeProviderFn) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the broker without loading the provider script.
    ///
    /// Fails with [`BrokerError::MissingSiteKey`] if no site key is set.
    pub fn build(self) -> Result<TokenBroker, BrokerError> {
        if let Err(error) = self.config.check() {
            match &error {
                BrokerError::MissingSiteKey => tracing::warn!(
                    "No site key provided. Turnstile will not be initialized."
                ),
                _ => tracing::warn!("{error}. Turnstile will not be initialized."),
            }
            return Err(error);
        }
        for warning in self.config.validate() {
            tracing::warn!("{warning}");
        }

        let site_key = self
            .config
            .site_key()
            .map(str::to_string)
            .ok_or(BrokerError::MissingSiteKey)?;

        let analytics: Arc<dyn AnalyticsRecorder> = if self.config.enable_analytics {
            self.analytics
                .unwrap_or_else(|| Arc::new(InMemoryAnalytics::new()))
        } else {
            Arc::new(NoOpAnalytics::new())
        };
        let clock = self.clock.unwrap_or_else(system_time_provider);

        Ok(TokenBroker::new(
            self.config,
            site_key,
            self.provider,
            self.document,
            analytics,
            clock,
        ))
    }

    /// Builds the broker and runs [`TokenBroker::init`].
    pub async fn build_and_init(self) -> Result<TokenBroker, BrokerError> {
        let broker = self.build()?;
        broker.init().await?;
        Ok(broker)
    }
}
