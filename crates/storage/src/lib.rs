//! Aggregate stores for wikistats.
//!
//! This crate counts what the event stream has delivered so far: messages,
//! distinct human users, distinct bots and distinct servers. Counting is
//! idempotent per message id, so an event that is delivered twice (for
//! example when the stream resumes after a reconnect) is only counted once.
//!
//! # Overview
//!
//! ## AggregateStore
//!
//! The [`AggregateStore`] trait is the capability the rest of the system
//! depends on: `update` one event, read a [`StatsSnapshot`], and
//! `validate_login` against the provisioned accounts. Backends are chosen at
//! startup and shared as `Arc<dyn AggregateStore>`.
//!
//! ## LocalStore
//!
//! [`LocalStore`] keeps four sets behind one lock. Snapshots are coherent:
//! the four numbers always describe the same moment.
//!
//! ## ReplicatedStore
//!
//! [`ReplicatedStore`] runs on top of a [`KeySpace`] shared by any number of
//! processes. Each membership is a conditional insert and each new member
//! bumps a counter in a second write. The two writes are not atomic, so a
//! failure between them leaves a permanent undercount of one; counters are
//! read independently of each other. [`SqliteKeySpace`] is the bundled key
//! space.
//!
//! # Example
//!
//! ```no_run
//! use storage::{AggregateStore, ReplicatedStore, SqliteKeySpace};
//!
//! # async fn example() -> storage::Result<()> {
//! let store = ReplicatedStore::new(SqliteKeySpace::open("wikistats.db")?);
//! store.provision("admin", "admin").await?;
//!
//! store.update("event-1", "alice", "https://en.wikipedia.org", false).await?;
//! store.update("event-1", "alice", "https://en.wikipedia.org", false).await?;
//!
//! let stats = store.stats().await?;
//! assert_eq!(stats.messages, 1);
//! # Ok(())
//! # }
//! ```

mod error;
mod local;
mod password;
mod replicated;
mod sqlite;
mod store;

pub use error::{Error, Result};
pub use local::LocalStore;
pub use password::{DEFAULT_COST, hash_password};
pub use replicated::{Collection, KeySpace, ReplicatedStore};
pub use sqlite::SqliteKeySpace;
pub use store::{AggregateStore, StatsSnapshot};
