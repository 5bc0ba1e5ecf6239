//! Client-side sessions sealed into an encrypted cookie.
//!
//! Nothing is persisted server-side: the whole session payload is encrypted
//! with ChaCha20-Poly1305 under a server-held key and handed to the browser
//! as a cookie value (`nonce (12 bytes) || ciphertext`, URL-safe base64).
//! Opening never errors: any parse, decode or decrypt failure means "no
//! session", so a tampered or stale cookie degrades to the logged-out state.

use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// AAD bound to every sealed session; versioned so a payload change can
/// invalidate old cookies without rotating the key.
const SEAL_CONTEXT: &[u8] = b"gardisto-session:v1";

/// Decrypted session payload carried by the cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub username: String,
    /// Organisation acronym, kept for display and scoping.
    pub organisation: String,
    /// Ordinal role rank, compared downstream as `role >= required`.
    pub role: i16,
}

/// Seals and opens session cookies with a 32-byte server key.
#[derive(Clone)]
pub struct SessionKeeper {
    key: [u8; 32],
}

impl SessionKeeper {
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Load the key from its base64 configuration form.
    ///
    /// # Errors
    /// Returns an error if the value is not base64 or not exactly 32 bytes.
    pub fn from_base64(encoded: &SecretString) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.expose_secret().trim())
            .context("session key is not URL-safe base64")?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("session key must decode to exactly 32 bytes"))?;
        Ok(Self::new(key))
    }

    /// Generate a random key for processes started without one configured.
    /// Cookies sealed with it die with the process.
    #[must_use]
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    /// Encrypt a session into a cookie value.
    ///
    /// # Errors
    /// Returns an error if serialization or encryption fails.
    pub fn seal(&self, session: &Session) -> Result<String> {
        let plaintext = serde_json::to_vec(session).context("failed to serialize session")?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = Payload {
            msg: &plaintext,
            aad: SEAL_CONTEXT,
        };
        let ciphertext = cipher
            .encrypt(nonce, payload)
            .map_err(|e| anyhow!("session seal failure: {e}"))?;

        let mut sealed = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decrypt a cookie value back into a session.
    ///
    /// Fails open: every malformed, tampered or foreign-key input returns
    /// `None` and the caller treats the request as unauthenticated.
    #[must_use]
    pub fn open(&self, value: &str) -> Option<Session> {
        let data = URL_SAFE_NO_PAD.decode(value.trim()).ok()?;
        if data.len() < 12 {
            return None;
        }
        let (nonce_bytes, ciphertext) = data.split_at(12);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let payload = Payload {
            msg: ciphertext,
            aad: SEAL_CONTEXT,
        };
        let plaintext = match cipher.decrypt(Nonce::from_slice(nonce_bytes), payload) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!("session cookie failed authentication, treating as absent");
                return None;
            }
        };

        serde_json::from_slice(&plaintext).ok()
    }
}

impl std::fmt::Debug for SessionKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeeper").field("key", &"***").finish()
    }
}
