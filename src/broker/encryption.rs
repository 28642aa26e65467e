//! Optional at-rest sealing of cached tokens.
//!
//! With the `encryption` feature enabled, tokens are sealed with AES-256-GCM
//! under a random key generated once per broker session. The sealed form is
//! `base64(iv || ciphertext)` with a fresh 12-byte IV per token. Without the
//! feature, or if sealing fails for any reason, the broker keeps the plain
//! token instead.

use std::fmt;

#[cfg(feature = "encryption")]
use aes_gcm::aead::{Aead, KeyInit};
#[cfg(feature = "encryption")]
use aes_gcm::{Aes256Gcm, Nonce};
#[cfg(feature = "encryption")]
use base64::{Engine, engine::general_purpose::STANDARD};
#[cfg(feature = "encryption")]
use rand::RngCore;

#[cfg(feature = "encryption")]
const IV_LEN: usize = 12;

/// Seals and opens cached tokens with a per-session key.
///
/// # Example
///
/// ```rust
/// use turnstile_broker::TokenSealer;
///
/// let sealer = TokenSealer::new();
/// if let Some(sealed) = sealer.seal("token-abc") {
///     assert_ne!(sealed, "token-abc");
///     assert_eq!(sealer.open(&sealed).as_deref(), Some("token-abc"));
/// }
/// ```
pub struct TokenSealer {
    #[cfg(feature = "encryption")]
    key: [u8; 32],
}

impl TokenSealer {
    /// Creates a sealer with a freshly generated key.
    pub fn new() -> Self {
        #[cfg(feature = "encryption")]
        {
            let mut key = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            Self { key }
        }
        #[cfg(not(feature = "encryption"))]
        {
            Self {}
        }
    }

    /// Whether this build can seal tokens at all.
    pub fn is_available() -> bool {
        cfg!(feature = "encryption")
    }

    /// Seals a token, or returns `None` if sealing is unavailable or failed.
    pub fn seal(&self, token: &str) -> Option<String> {
        #[cfg(feature = "encryption")]
        {
            let mut iv = [0u8; IV_LEN];
            rand::thread_rng().fill_bytes(&mut iv);
            let cipher = Aes256Gcm::new_from_slice(&self.key).ok()?;
            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&iv), token.as_bytes())
                .ok()?;

            let mut combined = Vec::with_capacity(IV_LEN + ciphertext.len());
            combined.extend_from_slice(&iv);
            combined.extend_from_slice(&ciphertext);
            Some(STANDARD.encode(combined))
        }
        #[cfg(not(feature = "encryption"))]
        {
            let _ = token;
            None
        }
    }

    /// Recovers a token sealed by this sealer.
    ///
    /// Returns `None` for malformed input or input sealed under another key.
    pub fn open(&self, sealed: &str) -> Option<String> {
        #[cfg(feature = "encryption")]
        {
            let combined = STANDARD.decode(sealed).ok()?;
            if combined.len() <= IV_LEN {
                return None;
            }
            let (iv, ciphertext) = combined.split_at(IV_LEN);
            let cipher = Aes256Gcm::new_from_slice(&self.key).ok()?;
            let plaintext = cipher.decrypt(Nonce::from_slice(iv), ciphertext).ok()?;
            String::from_utf8(plaintext).ok()
        }
        #[cfg(not(feature = "encryption"))]
        {
            let _ = sealed;
            None
        }
    }
}

impl Default for TokenSealer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenSealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSealer")
            .field("available", &Self::is_available())
            .finish_non_exhaustive()
    }
}
