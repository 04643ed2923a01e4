//! Aggregate store over a shared key space.
//!
//! Membership is tracked with conditional inserts ("create this key only if it
//! does not exist yet") and totals with counters that are bumped only when a
//! conditional insert reports a new key. Several ingest processes can share
//! one key space and still count each message, user, bot and server once.
//!
//! The conditional insert and the counter increment are two separate writes.
//! If the process dies or the key space fails between them, the key stays
//! recorded and the counter stays one short, permanently. Counts are therefore
//! exact in the common case and may drift low under failures; they are never
//! retried as a pair.

use crate::password::{DEFAULT_COST, Passwords};
use crate::{AggregateStore, Result, StatsSnapshot};
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, warn};

/// A keyed membership collection and its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Messages,
    Users,
    Bots,
    Servers,
}

impl Collection {
    /// Name of the counter tracking this collection's size.
    pub fn counter(self) -> &'static str {
        match self {
            Collection::Messages => "messagecount",
            Collection::Users => "usercount",
            Collection::Bots => "botcount",
            Collection::Servers => "servercount",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collection::Messages => "messages",
            Collection::Users => "users",
            Collection::Bots => "bots",
            Collection::Servers => "servers",
        };
        f.write_str(name)
    }
}

/// Storage tier behind [`ReplicatedStore`].
#[async_trait]
pub trait KeySpace: Send + Sync {
    /// Create `key` in `collection` if absent. Returns `true` when created.
    async fn insert_if_absent(&self, collection: Collection, key: &str) -> Result<bool>;

    /// Add one to the counter for `collection`.
    async fn increment(&self, collection: Collection) -> Result<()>;

    /// Current counter value for `collection`; zero if never incremented.
    async fn counter(&self, collection: Collection) -> Result<u64>;

    async fn password_hash(&self, username: &str) -> Result<Option<String>>;

    /// Store an account unless one already exists. Returns `true` when created.
    async fn insert_account_if_absent(&self, username: &str, password_hash: &str) -> Result<bool>;
}

/// Aggregate store backed by a [`KeySpace`].
pub struct ReplicatedStore<K> {
    keys: K,
    passwords: Passwords,
}

impl<K: KeySpace> ReplicatedStore<K> {
    pub fn new(keys: K) -> Self {
        Self {
            keys,
            passwords: Passwords::new(DEFAULT_COST),
        }
    }

    /// Set the bcrypt cost used by [`provision`](Self::provision).
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.passwords = Passwords::new(cost);
        self
    }

    pub fn key_space(&self) -> &K {
        &self.keys
    }

    /// Seed an account. Existing accounts are left untouched.
    ///
    /// Returns `true` if the account was created by this call.
    pub async fn provision(&self, username: &str, password: &str) -> Result<bool> {
        let hash = self.passwords.hash_blocking(password).await?;
        let created = self.keys.insert_account_if_absent(username, &hash).await?;
        if !created {
            // Unknown-user logins verify at the stored account's cost.
            if let Some(existing) = self.keys.password_hash(username).await? {
                self.passwords.observe(&existing);
            }
        }
        debug!(username, created, "provisioned account");
        Ok(created)
    }

    async fn tally(&self, collection: Collection, key: &str) -> Result<()> {
        if self.keys.insert_if_absent(collection, key).await? {
            self.keys.increment(collection).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<K: KeySpace> AggregateStore for ReplicatedStore<K> {
    /// Each membership is tallied independently; a failure in one does not
    /// stop the others. The first failure is returned after all three ran.
    async fn update(&self, id: &str, user: &str, server: &str, is_bot: bool) -> Result<()> {
        let people = if is_bot {
            Collection::Bots
        } else {
            Collection::Users
        };

        let mut first_error = None;
        for (collection, key) in [
            (Collection::Messages, id),
            (people, user),
            (Collection::Servers, server),
        ] {
            if let Err(err) = self.tally(collection, key).await {
                warn!(%collection, key, error = %err, "failed to tally key");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stats(&self) -> Result<StatsSnapshot> {
        Ok(StatsSnapshot {
            messages: self.keys.counter(Collection::Messages).await?,
            users: self.keys.counter(Collection::Users).await?,
            bots: self.keys.counter(Collection::Bots).await?,
            servers: self.keys.counter(Collection::Servers).await?,
        })
    }

    async fn validate_login(&self, username: &str, password: &str) -> bool {
        let stored = match self.keys.password_hash(username).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(username, error = %err, "account lookup failed");
                None
            }
        };
        self.passwords.verify(password, stored).await
    }
}
