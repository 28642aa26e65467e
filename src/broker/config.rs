use crate::broker::backoff::ExponentialBackoff;
use crate::broker::cache::DEFAULT_CACHE_CAPACITY;
use crate::broker::encryption::TokenSealer;
use crate::broker::error::BrokerError;
use crate::broker::policy::{Appearance, DEFAULT_POLICY_KEY, SecurityLevel, SecurityPolicy};
use crate::broker::record::TOKEN_TTL;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the public site key.
pub const SITE_KEY_ENV: &str = "PUBLIC_TURNSTILE_SITE_KEY";

/// Explicit-render URL of the provider script.
pub const DEFAULT_SCRIPT_URL: &str =
    "https://challenges.cloudflare.com/turnstile/v0/api.js?render=explicit&onload=onloadTurnstileCallback";

/// Substring identifying an already present provider script tag.
pub const DEFAULT_SCRIPT_MARKER: &str = "challenges.cloudflare.com/turnstile";

/// Predefined configuration presets for common deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPreset {
    /// Production defaults.
    ///
    /// - 3 retries starting at 1 second
    /// - Analytics on, debug logging off
    Production,

    /// Development-friendly configuration.
    ///
    /// - Debug logging on
    /// - Short retry delay (250 ms) for faster feedback
    Development,

    /// High-security configuration.
    ///
    /// - Unknown actions fall back to interactive challenges
    /// - Tokens sealed at rest and kept for at most 2 minutes
    /// - Smaller cache (5 actions)
    HighSecurity,

    /// Load configuration from environment variables.
    ///
    /// Reads configuration from:
    /// - `PUBLIC_TURNSTILE_SITE_KEY`: Site key
    /// - `TURNSTILE_RETRY_ATTEMPTS`: Retry attempts (default: 3)
    /// - `TURNSTILE_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 1000)
    /// - `TURNSTILE_DEBUG`: `true`/`1` enables debug logging
    FromEnv,
}

/// Language passed to the provider; also picks the modal's accessible label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Auto,
    De,
    En,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Auto => "auto",
            Language::De => "de",
            Language::En => "en",
        }
    }

    /// Accessible name of the challenge dialog.
    pub fn dialog_label(self) -> &'static str {
        match self {
            Language::De => "Sicherheitsüberprüfung",
            Language::Auto | Language::En => "Security verification",
        }
    }
}

/// Widget color theme passed to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Auto,
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Auto => "auto",
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

/// Construction-time configuration of a [`TokenBroker`](crate::TokenBroker).
///
/// Every field is optional when deserializing; missing fields take their
/// defaults. Keys are camelCase so a page can hand over the same JSON object
/// it already uses for its widget configuration.
///
/// # Example
///
/// ```rust
/// use turnstile_broker::{BrokerConfig, ConfigPreset};
///
/// let config = BrokerConfig::from(ConfigPreset::Production).with_site_key("0x4AAAAAAA");
/// assert!(config.check().is_ok());
///
/// let config = BrokerConfig::from_json(r#"{"siteKey": "0x4AAAAAAA", "retryAttempts": 5}"#).unwrap();
/// assert_eq!(config.retry_attempts, 5);
/// assert_eq!(config.max_cache_size, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Public site key; required.
    pub site_key: Option<String>,
    /// Appearance used for `managed` actions
    pub appearance: Appearance,
    pub language: Language,
    pub theme: Theme,
    /// Action used when a caller does not name one
    pub default_action: String,
    /// Action name to security level table
    pub security_levels: SecurityPolicy,
    /// Token cache capacity, in actions
    pub max_cache_size: usize,
    pub enable_analytics: bool,
    /// Seal cached tokens at rest
    pub enable_encryption: bool,
    /// Retries after the first failed attempt
    pub retry_attempts: u32,
    /// Initial backoff delay; doubles per retry
    pub retry_delay_ms: u64,
    pub debug_mode: bool,
    /// Lifetime of a cached token
    pub token_ttl_ms: u64,
    /// Remove a cached token as soon as it is handed out
    pub consume_on_cache_hit: bool,
    /// Warm the cache for the `pageload` action once the script is ready
    pub preload_on_ready: bool,
    /// How long to wait for an existing script to report readiness
    pub ready_timeout_ms: u64,
    pub script_url: String,
    /// Substring that identifies an existing provider script tag
    pub script_marker: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            site_key: None,
            appearance: Appearance::Execute,
            language: Language::Auto,
            theme: Theme::Auto,
            default_action: DEFAULT_POLICY_KEY.to_string(),
            security_levels: SecurityPolicy::default(),
            max_cache_size: DEFAULT_CACHE_CAPACITY,
            enable_analytics: true,
            enable_encryption: false,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            debug_mode: false,
            token_ttl_ms: TOKEN_TTL.as_millis() as u64,
            consume_on_cache_hit: true,
            preload_on_ready: false,
            ready_timeout_ms: 10_000,
            script_url: DEFAULT_SCRIPT_URL.to_string(),
            script_marker: DEFAULT_SCRIPT_MARKER.to_string(),
        }
    }
}

impl BrokerConfig {
    /// Sets the site key.
    pub fn with_site_key(mut self, site_key: impl Into<String>) -> Self {
        self.site_key = Some(site_key.into());
        self
    }

    /// Replaces the security level table.
    pub fn with_security_levels(mut self, levels: SecurityPolicy) -> Self {
        self.security_levels = levels;
        self
    }

    /// Builds a configuration from environment variables on top of the defaults.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(site_key) = std::env::var(SITE_KEY_ENV) {
            config.site_key = Some(site_key);
        }
        if let Some(attempts) = env_parse("TURNSTILE_RETRY_ATTEMPTS") {
            config.retry_attempts = attempts;
        }
        if let Some(delay) = env_parse("TURNSTILE_RETRY_DELAY_MS") {
            config.retry_delay_ms = delay;
        }
        if let Ok(debug) = std::env::var("TURNSTILE_DEBUG") {
            config.debug_mode = matches!(debug.trim(), "1" | "true" | "TRUE" | "yes");
        }

        config
    }

    /// Parses a full configuration from JSON; absent keys take defaults.
    pub fn from_json(json: &str) -> Result<Self, BrokerError> {
        serde_json::from_str(json).map_err(|e| BrokerError::InvalidConfig(e.to_string()))
    }

    /// Applies a JSON override document on top of this configuration.
    ///
    /// Only the top-level keys present in `json` are replaced; a
    /// `securityLevels` override replaces the whole table.
    pub fn with_overrides(self, json: &str) -> Result<Self, BrokerError> {
        let overrides: serde_json::Value =
            serde_json::from_str(json).map_err(|e| BrokerError::InvalidConfig(e.to_string()))?;
        let serde_json::Value::Object(overrides) = overrides else {
            return Err(BrokerError::InvalidConfig(
                "override document must be a JSON object".to_string(),
            ));
        };

        let mut merged =
            serde_json::to_value(&self).map_err(|e| BrokerError::InvalidConfig(e.to_string()))?;
        if let serde_json::Value::Object(fields) = &mut merged {
            fields.extend(overrides);
        }
        serde_json::from_value(merged).map_err(|e| BrokerError::InvalidConfig(e.to_string()))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_millis(self.token_ttl_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// The retry policy shared by script loading and challenge execution.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.retry_attempts, self.retry_delay())
    }

    /// The site key, if one is set and not blank.
    pub fn site_key(&self) -> Option<&str> {
        self.site_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Checks for problems that make the configuration unusable.
    pub fn check(&self) -> Result<(), BrokerError> {
        if self.site_key().is_none() {
            return Err(BrokerError::MissingSiteKey);
        }
        if self.token_ttl_ms == 0 {
            return Err(BrokerError::InvalidConfig(
                "token TTL must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates the configuration and returns any warnings.
    ///
    /// # Returns
    ///
    /// A vector of warning messages for potentially problematic settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.site_key().is_none() {
            warnings.push("No site key configured; the broker cannot be initialized".to_string());
        }

        if self.max_cache_size == 0 {
            warnings.push("Cache size of 0 disables token caching".to_string());
        }

        // Retry budget
        if self.retry_attempts > 10 {
            warnings.push("Many retry attempts (> 10) delay error reporting".to_string());
        }
        if self.retry_attempts > 0 && self.retry_delay_ms < 100 {
            warnings.push(
                "Very short retry delay (< 100 ms) may hammer a failing provider".to_string(),
            );
        }
        if self.backoff().total_delay() > Duration::from_secs(60) {
            warnings.push("Total retry delay exceeds one minute".to_string());
        }

        // Token lifetime
        if self.token_ttl() > TOKEN_TTL {
            warnings.push(
                "Token TTL longer than 5 minutes outlives the provider's token validity"
                    .to_string(),
            );
        }
        if self.token_ttl_ms > 0 && self.token_ttl() < Duration::from_secs(10) {
            warnings.push("Very short token TTL (< 10 seconds) defeats caching".to_string());
        }

        if self.enable_encryption && !TokenSealer::is_available() {
            warnings.push(
                "Encryption requested but the `encryption` feature is disabled; tokens are stored in plain text"
                    .to_string(),
            );
        }

        if self.ready_timeout_ms == 0 {
            warnings.push("Ready timeout of 0 fails whenever the script is still loading".to_string());
        }

        warnings
    }

    /// Returns a summary of the current configuration.
    pub fn summary(&self) -> String {
        format!(
            "BrokerConfig {{ Site key: {}, Actions: {}, Cache: {}, Retries: {} x {}ms, Token TTL: {}s, Analytics: {}, Encryption: {}, Debug: {} }}",
            if self.site_key().is_some() { "set" } else { "missing" },
            self.security_levels.len(),
            self.max_cache_size,
            self.retry_attempts,
            self.retry_delay_ms,
            self.token_ttl().as_secs(),
            self.enable_analytics,
            self.enable_encryption,
            self.debug_mode,
        )
    }
}

impl From<ConfigPreset> for BrokerConfig {
    fn from(preset: ConfigPreset) -> Self {
        match preset {
            ConfigPreset::Production => Self::default(),
            ConfigPreset::Development => Self {
                debug_mode: true,
                retry_delay_ms: 250,
                ..Self::default()
            },
            ConfigPreset::HighSecurity => Self {
                security_levels: SecurityPolicy::default()
                    .with_level(DEFAULT_POLICY_KEY, SecurityLevel::Interactive),
                enable_encryption: true,
                token_ttl_ms: 120_000,
                max_cache_size: 5,
                ..Self::default()
            },
            ConfigPreset::FromEnv => Self::from_env(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env_vars() {
        unsafe {
            std::env::remove_var(SITE_KEY_ENV);
            std::env::remove_var("TURNSTILE_RETRY_ATTEMPTS");
            std::env::remove_var("TURNSTILE_RETRY_DELAY_MS");
            std::env::remove_var("TURNSTILE_DEBUG");
        }
    }

    #[test]
    fn test_default_configuration() {
        let config = BrokerConfig::default();
        assert_eq!(config.site_key, None);
        assert_eq!(config.appearance, Appearance::Execute);
        assert_eq!(config.language, Language::Auto);
        assert_eq!(config.default_action, "default");
        assert_eq!(config.max_cache_size, 10);
        assert!(config.enable_analytics);
        assert!(!config.enable_encryption);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert!(!config.debug_mode);
        assert_eq!(config.token_ttl(), TOKEN_TTL);
        assert!(config.consume_on_cache_hit);
    }

    #[test]
    fn test_presets() {
        let config = BrokerConfig::from(ConfigPreset::Development);
        assert!(config.debug_mode);
        assert_eq!(config.retry_delay_ms, 250);

        let config = BrokerConfig::from(ConfigPreset::HighSecurity);
        assert!(config.enable_encryption);
        assert!(config.security_levels.is_high_security("some-new-action"));
        assert_eq!(config.token_ttl().as_secs(), 120);
        assert_eq!(config.max_cache_size, 5);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env_vars();

        unsafe {
            std::env::set_var(SITE_KEY_ENV, "0xENVKEY");
            std::env::set_var("TURNSTILE_RETRY_ATTEMPTS", "5");
            std::env::set_var("TURNSTILE_RETRY_DELAY_MS", "not-a-number");
            std::env::set_var("TURNSTILE_DEBUG", "true");
        }

        let config = BrokerConfig::from(ConfigPreset::FromEnv);
        assert_eq!(config.site_key(), Some("0xENVKEY"));
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_delay_ms, 1000);
        assert!(config.debug_mode);

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_default_ignores_env() {
        clear_env_vars();
        unsafe {
            std::env::set_var(SITE_KEY_ENV, "0xENVKEY");
        }

        assert_eq!(BrokerConfig::default().site_key, None);

        clear_env_vars();
    }

    #[test]
    fn test_check() {
        assert_eq!(
            BrokerConfig::default().check(),
            Err(BrokerError::MissingSiteKey)
        );
        assert_eq!(
            BrokerConfig::default().with_site_key("   ").check(),
            Err(BrokerError::MissingSiteKey)
        );
        assert!(BrokerConfig::default().with_site_key("0xKEY").check().is_ok());

        let config = BrokerConfig {
            token_ttl_ms: 0,
            ..BrokerConfig::default().with_site_key("0xKEY")
        };
        assert!(matches!(config.check(), Err(BrokerError::InvalidConfig(_))));
    }

    #[test]
    fn test_validation_valid_config() {
        let config = BrokerConfig::from(ConfigPreset::Production).with_site_key("0xKEY");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validation_warnings() {
        let config = BrokerConfig {
            retry_attempts: 12,
            retry_delay_ms: 50,
            token_ttl_ms: 5_000,
            max_cache_size: 0,
            ..BrokerConfig::default()
        };
        let warnings = config.validate();

        assert!(warnings.iter().any(|w| w.contains("No site key")));
        assert!(warnings.iter().any(|w| w.contains("Many retry attempts")));
        assert!(warnings.iter().any(|w| w.contains("Very short retry delay")));
        assert!(warnings.iter().any(|w| w.contains("Very short token TTL")));
        assert!(warnings.iter().any(|w| w.contains("Cache size of 0")));

        let config = BrokerConfig {
            token_ttl_ms: 600_000,
            retry_attempts: 6,
            ..BrokerConfig::default().with_site_key("0xKEY")
        };
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("outlives")));
        // 1 + 2 + 4 + 8 + 16 + 32 seconds
        assert!(warnings.iter().any(|w| w.contains("Total retry delay")));
    }

    #[test]
    fn test_from_json() {
        let config = BrokerConfig::from_json(
            r#"{
                "siteKey": "0xKEY",
                "language": "de",
                "theme": "dark",
                "securityLevels": {"checkout": "interactive"},
                "enableEncryption": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.site_key(), Some("0xKEY"));
        assert_eq!(config.language, Language::De);
        assert_eq!(config.theme, Theme::Dark);
        assert!(config.security_levels.is_high_security("checkout"));
        assert_eq!(config.security_levels.len(), 1);
        assert!(config.enable_encryption);
        assert_eq!(config.retry_attempts, 3);

        assert!(matches!(
            BrokerConfig::from_json("{not json"),
            Err(BrokerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_with_overrides() {
        let config = BrokerConfig::from(ConfigPreset::Development)
            .with_site_key("0xKEY")
            .with_overrides(r#"{"retryDelayMs": 500, "appearance": "always"}"#)
            .unwrap();

        assert_eq!(config.retry_delay_ms, 500);
        assert_eq!(config.appearance, Appearance::Always);
        // Untouched fields keep the preset's values
        assert!(config.debug_mode);
        assert_eq!(config.site_key(), Some("0xKEY"));

        assert!(BrokerConfig::default().with_overrides("[1, 2]").is_err());
    }

    #[test]
    fn test_language_labels() {
        assert_eq!(Language::De.dialog_label(), "Sicherheitsüberprüfung");
        assert_eq!(Language::En.dialog_label(), "Security verification");
        assert_eq!(Language::Auto.dialog_label(), "Security verification");
        assert_eq!(Language::Auto.as_str(), "auto");
        assert_eq!(Theme::Dark.as_str(), "dark");
    }

    #[test]
    fn test_summary() {
        let summary = BrokerConfig::default().with_site_key("0xKEY").summary();
        assert!(summary.contains("Site key: set"));
        assert!(summary.contains("Retries: 3 x 1000ms"));
        assert!(summary.contains("Token TTL: 300s"));
    }
}
