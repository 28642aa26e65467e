// Core building blocks
mod backoff;
mod cache;
mod config;
mod encryption;
mod error;
mod policy;
mod record;
mod time_utils;

// Challenge execution
mod builder;
mod script;
mod token_broker;
mod widget;

// Environment seams and analytics
pub mod analytics;
pub mod dom;
pub mod provider;

// Core components exports
pub use backoff::ExponentialBackoff;
pub use builder::TokenBrokerBuilder;
pub use cache::{DEFAULT_CACHE_CAPACITY, LruCache, TokenCache};
pub use config::{
    BrokerConfig, ConfigPreset, DEFAULT_SCRIPT_MARKER, DEFAULT_SCRIPT_URL, Language,
    SITE_KEY_ENV, Theme,
};
pub use encryption::TokenSealer;
pub use error::{BrokerError, ErrorInfo, ErrorKind};
pub use policy::{Appearance, DEFAULT_POLICY_KEY, SecurityLevel, SecurityPolicy};
pub use record::{TOKEN_TTL, TokenRecord};
pub use script::READY_POLL_INTERVAL;
pub use time_utils::{TimeProviderFn, system_time_provider};
pub use token_broker::{BrokerState, PRELOAD_ACTION, TokenBroker};
pub use widget::{IFRAME_FOCUS_DELAY, WidgetState};

// Seam exports
pub use analytics::{
    AnalyticsEvent, AnalyticsRecorder, AnalyticsSnapshot, InMemoryAnalytics, NoOpAnalytics,
};
pub use dom::{
    Document, ElementId, FOCUSABLE_SELECTOR, KeyOutcome, KeyboardEvent, KeydownListener,
    ListenerId, MemoryDocument,
};
pub use provider::{
    ChallengeCallbacks, ChallengeOutcome, ChallengeProvider, RenderOptions, WidgetHandle,
};
