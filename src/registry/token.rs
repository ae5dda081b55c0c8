//! Bearer token memoization, keyed by image scope path.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::{DEFAULT_TOKEN_EXPIRY_SECS, TOKEN_EXPIRY_SAFETY_MARGIN_SECS};

/// Tokens are released a safety margin before the server-declared expiry.
/// The whole cache assumes one TTL; when a response declares a different
/// `expires_in` every cached entry is discarded so no mixed-TTL state exists.
pub struct TokenCache {
    tokens: HashMap<String, CachedToken>,
    assumed_ttl_secs: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl TokenCache {
    pub fn new() -> Self {
        TokenCache {
            tokens: HashMap::new(),
            assumed_ttl_secs: DEFAULT_TOKEN_EXPIRY_SECS,
        }
    }

    pub fn get(&self, scope: &str) -> Option<String> {
        self.tokens.get(scope).and_then(|cached| {
            if cached.expires_at > Instant::now() {
                Some(cached.token.clone())
            } else {
                None
            }
        })
    }

    pub fn insert(&mut self, scope: String, token: String, expires_in: Option<u64>) {
        let ttl = expires_in.unwrap_or(DEFAULT_TOKEN_EXPIRY_SECS);
        if ttl != self.assumed_ttl_secs {
            tracing::info!(
                old_ttl = self.assumed_ttl_secs,
                new_ttl = ttl,
                "Token lifetime changed, rebuilding token cache"
            );
            self.tokens.clear();
            self.assumed_ttl_secs = ttl;
        }

        let expires_at = Instant::now()
            + Duration::from_secs(ttl.saturating_sub(TOKEN_EXPIRY_SAFETY_MARGIN_SECS));
        self.tokens.insert(scope, CachedToken { token, expires_at });

        // Drop anything already expired while we hold the map anyway
        self.tokens
            .retain(|_, cached| cached.expires_at > Instant::now());
    }

    pub fn assumed_ttl_secs(&self) -> u64 {
        self.assumed_ttl_secs
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}
