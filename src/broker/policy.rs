//! Per-action security policy.
//!
//! Maps an action name to a [`SecurityLevel`] and derives everything the
//! broker needs from that level: reuse budget, widget appearance, and
//! whether tokens may be served from the cache.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of the fallback entry in a policy table.
pub const DEFAULT_POLICY_KEY: &str = "default";

/// How strictly a given action is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityLevel {
    /// Always show the challenge; every token is single-use and never cached.
    Interactive,
    /// Let the provider decide whether to interact; moderate reuse.
    Managed,
    /// Never force a visible challenge; generous reuse.
    NonInteractive,
}

impl SecurityLevel {
    /// Maximum number of times a token issued under this level may be handed out.
    pub fn max_uses(self) -> u32 {
        match self {
            SecurityLevel::Interactive => 1,
            SecurityLevel::Managed => 5,
            SecurityLevel::NonInteractive => 10,
        }
    }

    /// Whether tokens for this level may be served from the cache.
    pub fn is_cacheable(self) -> bool {
        !self.is_high_security()
    }

    /// High-security actions bypass the cache and use the modal challenge.
    pub fn is_high_security(self) -> bool {
        matches!(self, SecurityLevel::Interactive)
    }

    /// Widget appearance for this level.
    ///
    /// `Managed` leaves the decision to the provider, expressed by the
    /// configured default appearance.
    pub fn appearance(self, managed_default: Appearance) -> Appearance {
        match self {
            SecurityLevel::Interactive => Appearance::Always,
            SecurityLevel::NonInteractive => Appearance::InteractionOnly,
            SecurityLevel::Managed => managed_default,
        }
    }
}

/// Visual presentation mode passed to the provider's render call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Appearance {
    /// The widget is always visible.
    Always,
    /// The widget becomes visible only while executing.
    #[default]
    Execute,
    /// The widget is shown only if the provider needs user interaction.
    InteractionOnly,
}

impl Appearance {
    /// The provider's wire name for this appearance.
    pub fn as_str(self) -> &'static str {
        match self {
            Appearance::Always => "always",
            Appearance::Execute => "execute",
            Appearance::InteractionOnly => "interaction-only",
        }
    }
}

/// Static mapping from action name to [`SecurityLevel`].
///
/// Lookups fall back to the `default` entry, then to [`SecurityLevel::Managed`].
/// The table is fixed for the lifetime of a broker.
///
/// # Example
///
/// ```rust
/// use turnstile_broker::{SecurityLevel, SecurityPolicy};
///
/// let policy = SecurityPolicy::default();
/// assert_eq!(policy.level_of("payment-form"), SecurityLevel::Interactive);
/// assert_eq!(policy.level_of("unknown-action"), SecurityLevel::Managed);
/// assert_eq!(policy.max_uses("newsletter"), 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityPolicy {
    levels: BTreeMap<String, SecurityLevel>,
}

impl SecurityPolicy {
    /// Creates an empty policy; every action resolves to `Managed`.
    pub fn empty() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Creates a policy from `(action, level)` pairs.
    pub fn from_levels<I, S>(levels: I) -> Self
    where
        I: IntoIterator<Item = (S, SecurityLevel)>,
        S: Into<String>,
    {
        Self {
            levels: levels
                .into_iter()
                .map(|(action, level)| (action.into(), level))
                .collect(),
        }
    }

    /// Adds or replaces the level for an action.
    pub fn with_level(mut self, action: impl Into<String>, level: SecurityLevel) -> Self {
        self.levels.insert(action.into(), level);
        self
    }

    /// Resolves the security level of an action.
    pub fn level_of(&self, action: &str) -> SecurityLevel {
        self.levels
            .get(action)
            .or_else(|| self.levels.get(DEFAULT_POLICY_KEY))
            .copied()
            .unwrap_or(SecurityLevel::Managed)
    }

    pub fn max_uses(&self, action: &str) -> u32 {
        self.level_of(action).max_uses()
    }

    pub fn is_high_security(&self, action: &str) -> bool {
        self.level_of(action).is_high_security()
    }

    pub fn is_cacheable(&self, action: &str) -> bool {
        self.level_of(action).is_cacheable()
    }

    pub fn appearance(&self, action: &str, managed_default: Appearance) -> Appearance {
        self.level_of(action).appearance(managed_default)
    }

    /// Number of explicitly configured actions.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::from_levels([
            ("contact-form", SecurityLevel::Managed),
            ("account-signup", SecurityLevel::Managed),
            ("account-login", SecurityLevel::Managed),
            ("password-reset", SecurityLevel::Interactive),
            ("payment-form", SecurityLevel::Interactive),
            ("newsletter", SecurityLevel::NonInteractive),
            (DEFAULT_POLICY_KEY, SecurityLevel::Managed),
        ])
    }
}
