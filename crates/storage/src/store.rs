//! The aggregate store capability shared by every backend.

use crate::Result;
use async_trait::async_trait;
use std::fmt;

/// Totals observed so far.
///
/// Every field only ever grows over the lifetime of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages: u64,
    pub users: u64,
    pub bots: u64,
    pub servers: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} messages\n{} users\n{} bots\n{} servers",
            self.messages, self.users, self.bots, self.servers
        )
    }
}

/// Counts distinct messages, users, bots and servers.
///
/// `update` is idempotent per message `id`: replaying an id never moves the
/// message count, and users or servers that were already seen are never
/// counted twice, even when they show up again under a new id.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Record one event.
    async fn update(&self, id: &str, user: &str, server: &str, is_bot: bool) -> Result<()>;

    /// Read the current totals.
    async fn stats(&self) -> Result<StatsSnapshot>;

    /// Check a username/password pair against the provisioned accounts.
    ///
    /// Unknown users and wrong passwords are indistinguishable to the caller.
    async fn validate_login(&self, username: &str, password: &str) -> bool;
}
