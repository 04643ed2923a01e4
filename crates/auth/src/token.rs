//! Session token cache.

use crate::{AuthError, Clock, Result, SystemClock};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Arc;

/// Token lifetime in seconds.
pub const TOKEN_TTL_SECS: i64 = 3600;

/// Random bytes per token (hex-encoded, so tokens are twice as long).
const TOKEN_BYTES: usize = 32;

/// An issued session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    value: String,
    username: String,
    issued_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.issued_at > ttl
    }
}

/// Issues, validates and revokes session tokens.
///
/// Expired tokens are removed lazily, by the first validation that notices
/// them. There is no background sweep.
pub struct TokenCache {
    entries: Mutex<HashMap<String, SessionToken>>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            ttl: TimeDelta::seconds(TOKEN_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a fresh token for `username`.
    pub fn issue(&self, username: &str) -> SessionToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);

        let token = SessionToken {
            value: hex::encode(bytes),
            username: username.to_string(),
            issued_at: self.clock.now(),
        };
        self.entries
            .lock()
            .insert(token.value.clone(), token.clone());
        token
    }

    /// Check a token, returning the username it was issued to.
    ///
    /// An expired token is evicted before `TokenExpired` is returned.
    pub fn check(&self, token: &str) -> Result<String> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = entries.get(token).ok_or(AuthError::InvalidToken)?;
        if entry.is_expired(now, self.ttl) {
            entries.remove(token);
            return Err(AuthError::TokenExpired);
        }
        Ok(entry.username.clone())
    }

    pub fn validate(&self, token: &str) -> bool {
        self.check(token).is_ok()
    }

    /// Remove a token. Revoking an unknown token is a no-op.
    pub fn revoke(&self, token: &str) {
        self.entries.lock().remove(token);
    }

    /// Whether the cache holds an entry for `token`, expired or not.
    pub fn contains(&self, token: &str) -> bool {
        self.entries.lock().contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use std::collections::HashSet;

    fn cache_with_clock() -> (TokenCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (TokenCache::with_clock(clock.clone()), clock)
    }

    #[test]
    fn issued_token_is_valid() {
        let (cache, clock) = cache_with_clock();
        let token = cache.issue("alice");

        assert_eq!(token.value().len(), TOKEN_BYTES * 2);
        assert_eq!(token.username(), "alice");
        assert_eq!(token.issued_at(), clock.now());
        assert_eq!(cache.check(token.value()), Ok("alice".to_string()));
    }

    #[test]
    fn unknown_token_is_invalid() {
        let cache = TokenCache::new();
        assert_eq!(cache.check("nope"), Err(AuthError::InvalidToken));
        assert!(!cache.validate(""));
    }

    #[test]
    fn token_valid_until_ttl() {
        let (cache, clock) = cache_with_clock();
        let token = cache.issue("alice");

        clock.advance(TimeDelta::seconds(TOKEN_TTL_SECS));
        assert!(cache.validate(token.value()));
    }

    #[test]
    fn expired_token_is_evicted() {
        let (cache, clock) = cache_with_clock();
        let token = cache.issue("alice");

        clock.advance(TimeDelta::seconds(TOKEN_TTL_SECS + 1));
        assert!(cache.contains(token.value()));
        assert_eq!(cache.check(token.value()), Err(AuthError::TokenExpired));
        assert!(!cache.contains(token.value()));
        assert_eq!(cache.check(token.value()), Err(AuthError::InvalidToken));
    }

    #[test]
    fn custom_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = TokenCache::with_clock(clock.clone()).with_ttl(TimeDelta::minutes(5));
        let token = cache.issue("alice");

        clock.advance(TimeDelta::minutes(6));
        assert!(!cache.validate(token.value()));
    }

    #[test]
    fn revoke_invalidates_immediately() {
        let (cache, _) = cache_with_clock();
        let token = cache.issue("alice");
        let other = cache.issue("bob");

        cache.revoke(token.value());
        assert!(!cache.validate(token.value()));
        assert!(cache.validate(other.value()));

        // Revoking twice is fine.
        cache.revoke(token.value());
        cache.revoke("never-issued");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn tokens_are_unique() {
        let cache = TokenCache::new();
        let tokens: HashSet<_> = (0..1000)
            .map(|_| cache.issue("alice").value().to_string())
            .collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn concurrent_issue_and_validate() {
        let cache = Arc::new(TokenCache::new());
        let handles: Vec<_> = (0..16)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let user = format!("user-{t}");
                    (0..250)
                        .map(|_| {
                            let token = cache.issue(&user);
                            assert!(cache.validate(token.value()));
                            token
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let issued: Vec<SessionToken> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(cache.len(), issued.len());
        for token in &issued {
            assert_eq!(cache.check(token.value()).as_deref(), Ok(token.username()));
        }
    }
}
