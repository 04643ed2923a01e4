//! Process-local aggregate store.

use crate::password::{DEFAULT_COST, Passwords};
use crate::{AggregateStore, Result, StatsSnapshot};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct Tallies {
    messages: HashSet<String>,
    users: HashSet<String>,
    bots: HashSet<String>,
    servers: HashSet<String>,
}

/// In-memory store guarded by a single lock.
///
/// Every operation takes the same lock, so a [`StatsSnapshot`] is always
/// internally consistent.
#[derive(Debug)]
pub struct LocalStore {
    tallies: Mutex<Tallies>,
    accounts: HashMap<String, String>,
    passwords: Passwords,
}

impl LocalStore {
    pub fn new() -> Self {
        Self {
            tallies: Mutex::new(Tallies::default()),
            accounts: HashMap::new(),
            passwords: Passwords::new(DEFAULT_COST),
        }
    }

    /// Set the bcrypt cost used by [`with_account`](Self::with_account).
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.passwords = Passwords::new(cost);
        self
    }

    /// Provision an account. Blocks while the password is hashed.
    pub fn with_account(mut self, username: &str, password: &str) -> Result<Self> {
        let hash = self.passwords.hash(password)?;
        self.accounts.insert(username.to_string(), hash);
        Ok(self)
    }

    /// Record one event, returning whether `id` was new.
    pub fn record(&self, id: &str, user: &str, server: &str, is_bot: bool) -> bool {
        let mut tallies = self.tallies.lock();
        if !tallies.messages.insert(id.to_string()) {
            return false;
        }
        if is_bot {
            tallies.bots.insert(user.to_string());
        } else {
            tallies.users.insert(user.to_string());
        }
        tallies.servers.insert(server.to_string());
        true
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let tallies = self.tallies.lock();
        StatsSnapshot {
            messages: tallies.messages.len() as u64,
            users: tallies.users.len() as u64,
            bots: tallies.bots.len() as u64,
            servers: tallies.servers.len() as u64,
        }
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AggregateStore for LocalStore {
    async fn update(&self, id: &str, user: &str, server: &str, is_bot: bool) -> Result<()> {
        self.record(id, user, server, is_bot);
        Ok(())
    }

    async fn stats(&self) -> Result<StatsSnapshot> {
        Ok(self.snapshot())
    }

    async fn validate_login(&self, username: &str, password: &str) -> bool {
        let stored = self.accounts.get(username).cloned();
        self.passwords.verify(password, stored).await
    }
}
