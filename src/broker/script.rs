//! Provider script bootstrap.
//!
//! The provider script is a page-global resource that other code may already
//! have loaded. The bootstrap never injects a second copy: if a matching tag
//! exists it only waits for the provider's readiness flag, otherwise it
//! injects the script under the shared backoff policy first.

use crate::broker::backoff::ExponentialBackoff;
use crate::broker::dom::Document;
use crate::broker::error::BrokerError;
use crate::broker::provider::ChallengeProvider;
use std::time::Duration;
use tokio::time::Instant;

/// Interval between readiness checks.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) const SCRIPT_LOAD_FAILED: &str =
    "Failed to load Turnstile script after multiple attempts";

/// How the provider became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bootstrap {
    /// The provider was already loaded and ready.
    AlreadyReady,
    /// An existing script tag finished loading while we waited.
    AwaitedExisting,
    /// The script was injected by this bootstrap.
    Injected,
}

pub(crate) struct ScriptLoader<'a> {
    pub document: &'a dyn Document,
    pub provider: &'a dyn ChallengeProvider,
    pub script_url: &'a str,
    pub script_marker: &'a str,
    pub backoff: ExponentialBackoff,
    pub ready_timeout: Duration,
}

impl ScriptLoader<'_> {
    /// Makes sure the provider script is present and ready.
    pub(crate) async fn load(
        &self,
        mut on_retry: impl FnMut(u32, &BrokerError),
    ) -> Result<Bootstrap, BrokerError> {
        if self.document.has_script(self.script_marker) {
            if self.provider.is_ready() {
                return Ok(Bootstrap::AlreadyReady);
            }
            self.wait_until_ready().await?;
            return Ok(Bootstrap::AwaitedExisting);
        }

        self.backoff
            .run(
                || self.document.inject_script(self.script_url),
                |remaining, error| on_retry(remaining, error),
            )
            .await
            .map_err(|_| BrokerError::ScriptLoad(SCRIPT_LOAD_FAILED.to_string()))?;

        if !self.provider.is_ready() {
            self.wait_until_ready().await?;
        }
        Ok(Bootstrap::Injected)
    }

    async fn wait_until_ready(&self) -> Result<(), BrokerError> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if self.provider.is_ready() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrokerError::ScriptLoad(format!(
                    "Turnstile did not become ready within {}ms",
                    self.ready_timeout.as_millis()
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}
