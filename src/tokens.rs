//! One-time magic-link credentials.
//!
//! Tokens are 24 bytes of OS randomness, URL-safe base64 encoded, stored
//! process-wide keyed by value. Consumption is a single-winner operation:
//! the used-flag check and set happen under one lock, so of N concurrent
//! consumers of the same value exactly one succeeds. Sweeping removes
//! tokens past their expiry whether or not they were used; consumed but
//! unexpired tokens stay queryable.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::clock::unix_ms;
use crate::error::TokenError;

const TOKEN_BYTES: usize = 24;

#[derive(Clone, Debug)]
pub struct LinkToken {
    pub value: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub used: bool,
    /// The session that consumed the token, once consumed.
    pub session_id: Option<String>,
}

pub struct LinkTokenStore {
    tokens: Mutex<HashMap<String, LinkToken>>,
}

impl Default for LinkTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkTokenStore {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Mint and store a token valid for `valid_minutes` from now. A zero or
    /// negative validity yields an already-expired token: issuable, never
    /// consumable.
    pub fn issue(&self, valid_minutes: i64) -> LinkToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let value = URL_SAFE_NO_PAD.encode(bytes);

        let now = unix_ms();
        let token = LinkToken {
            value: value.clone(),
            created_at: now,
            expires_at: now + valid_minutes * 60_000,
            used: false,
            session_id: None,
        };
        self.tokens.lock().unwrap().insert(value, token.clone());
        log::info!(target: "tokens", "issued link token (valid {valid_minutes}m)");
        token
    }

    /// Atomically check and consume: invalid, already-used and expired
    /// tokens fail in that order; on success the token is bound to
    /// `session_id` and marked used in the same critical section.
    pub fn validate_and_consume(
        &self,
        value: &str,
        session_id: &str,
    ) -> Result<LinkToken, TokenError> {
        if value.trim().is_empty() {
            return Err(TokenError::Invalid);
        }
        let mut tokens = self.tokens.lock().unwrap();
        let token = tokens.get_mut(value).ok_or(TokenError::Invalid)?;
        if token.used {
            return Err(TokenError::AlreadyUsed);
        }
        if token.expires_at < unix_ms() {
            return Err(TokenError::Expired);
        }
        token.used = true;
        token.session_id = Some(session_id.to_string());
        Ok(token.clone())
    }

    /// Read-only lookup for diagnostics; no side effects.
    pub fn get(&self, value: &str) -> Option<LinkToken> {
        self.tokens.lock().unwrap().get(value).cloned()
    }

    /// Drop every token past its expiry, used or not. Returns how many were
    /// removed. Safe to call repeatedly and concurrently.
    pub fn sweep(&self) -> usize {
        let now = unix_ms();
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|_, token| token.expires_at >= now);
        let removed = before - tokens.len();
        if removed > 0 {
            log::debug!(target: "tokens", "swept {removed} expired tokens");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }
}
