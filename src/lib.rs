//! # Turnstile Broker
//!
//! An adaptive challenge-and-token broker for interactive proof-of-humanity
//! widgets.
//!
//! Forms that talk to a protected backend need a fresh verification token
//! per submission. This library sits between the application and the
//! page-global verification provider: it loads the provider script once,
//! decides per action whether a cached token may be reused, runs challenges
//! through the provider with retries when it may not, and keeps usage
//! analytics.
//!
//! ## Features
//!
//! - **Per-action security policy**: interactive, managed and non-interactive levels control
//!   token reuse and whether the user sees the challenge
//! - **Bounded LRU token cache**: tokens expire after five minutes or when
//!   their use budget is spent
//! - **Retries with exponential backoff**: for script loading and challenges
//! - **Accessible modal**: high-security challenges run in a focus-trapped
//!   dialog that Escape cancels
//! - **Deterministic teardown**: every widget and DOM node a challenge
//!   creates is removed on every exit path
//! - **Analytics**: request, completion, failure and cache hit counters
//! - **Token encryption at rest**: optional AES-256-GCM sealing of cached
//!   tokens (`encryption` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use turnstile_broker::{
//!     BrokerConfig, BrokerError, ChallengeProvider, ElementId, MemoryDocument, RenderOptions,
//!     TokenBroker, WidgetHandle,
//! };
//!
//! struct AlwaysPass;
//!
//! impl ChallengeProvider for AlwaysPass {
//!     fn is_ready(&self) -> bool {
//!         true
//!     }
//!
//!     fn render(&self, _container: ElementId, options: RenderOptions) -> Result<WidgetHandle, BrokerError> {
//!         options.callbacks.success(format!("token-for-{}", options.action));
//!         Ok(WidgetHandle::new(options.action))
//!     }
//!
//!     fn remove(&self, _handle: &WidgetHandle) {}
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), BrokerError> {
//! let broker = TokenBroker::builder(Arc::new(AlwaysPass), Arc::new(MemoryDocument::new()))
//!     .with_config(BrokerConfig::default().with_site_key("0x4AAAAAAA"))
//!     .build_and_init()
//!     .await?;
//!
//! let token = broker.get_token("contact-form").await?;
//! assert_eq!(token, "token-for-contact-form");
//! # Ok(())
//! # }
//! ```
//!
//! ### Security Levels
//!
//! ```rust
//! use turnstile_broker::{BrokerConfig, SecurityLevel, SecurityPolicy};
//!
//! let config = BrokerConfig::default()
//!     .with_site_key("0x4AAAAAAA")
//!     .with_security_levels(
//!         SecurityPolicy::default()
//!             .with_level("wire-transfer", SecurityLevel::Interactive)
//!             .with_level("search", SecurityLevel::NonInteractive),
//!     );
//!
//! assert!(config.security_levels.is_high_security("wire-transfer"));
//! assert!(config.security_levels.is_cacheable("search"));
//! ```
//!
//! ## Configuration
//!
//! The site key is read from `PUBLIC_TURNSTILE_SITE_KEY` by
//! [`BrokerConfig::from_env`]. Without a site key the broker refuses to
//! build and logs a warning.
//!
//! ## Architecture
//!
//! - **[`TokenBroker`]**: cache policy, challenge execution and analytics
//! - **[`ChallengeProvider`]**: the page-global verification widget library
//! - **[`Document`]**: the DOM surface challenges are mounted into
//! - **[`AnalyticsRecorder`]**: pluggable analytics backends
//! - **[`BrokerError`]**: typed errors with stable codes

pub mod broker;

pub use broker::*;
