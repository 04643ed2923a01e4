//! SQLite key space.

use crate::replicated::{Collection, KeySpace};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How long a writer waits on a database locked by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// [`KeySpace`] stored in a SQLite database.
///
/// File-backed databases run in WAL mode so several processes can share one
/// file. Calls run on the blocking thread pool.
#[derive(Clone)]
pub struct SqliteKeySpace {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeySpace {
    /// Open or create a key space at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    /// Create an in-memory key space (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (id TEXT PRIMARY KEY);
            CREATE TABLE IF NOT EXISTS users (name TEXT PRIMARY KEY);
            CREATE TABLE IF NOT EXISTS bots (name TEXT PRIMARY KEY);
            CREATE TABLE IF NOT EXISTS servers (name TEXT PRIMARY KEY);
            CREATE TABLE IF NOT EXISTS counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS accounts (
                username TEXT PRIMARY KEY,
                password TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock())).await?
    }
}

fn insert_statement(collection: Collection) -> &'static str {
    match collection {
        Collection::Messages => "INSERT OR IGNORE INTO messages (id) VALUES (?1)",
        Collection::Users => "INSERT OR IGNORE INTO users (name) VALUES (?1)",
        Collection::Bots => "INSERT OR IGNORE INTO bots (name) VALUES (?1)",
        Collection::Servers => "INSERT OR IGNORE INTO servers (name) VALUES (?1)",
    }
}

#[async_trait]
impl KeySpace for SqliteKeySpace {
    async fn insert_if_absent(&self, collection: Collection, key: &str) -> Result<bool> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let inserted = conn.execute(insert_statement(collection), params![key])?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn increment(&self, collection: Collection) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO counters (name, value) VALUES (?1, 1)
                 ON CONFLICT(name) DO UPDATE SET value = value + 1",
                params![collection.counter()],
            )?;
            Ok(())
        })
        .await
    }

    async fn counter(&self, collection: Collection) -> Result<u64> {
        self.with_conn(move |conn| {
            let value: Option<i64> = conn
                .query_row(
                    "SELECT value FROM counters WHERE name = ?1",
                    params![collection.counter()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.map_or(0, |v| u64::try_from(v).unwrap_or(0)))
        })
        .await
    }

    async fn password_hash(&self, username: &str) -> Result<Option<String>> {
        let username = username.to_owned();
        self.with_conn(move |conn| {
            let hash = conn
                .query_row(
                    "SELECT password FROM accounts WHERE username = ?1",
                    params![username],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hash)
        })
        .await
    }

    async fn insert_account_if_absent(&self, username: &str, password_hash: &str) -> Result<bool> {
        let username = username.to_owned();
        let password_hash = password_hash.to_owned();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO accounts (username, password) VALUES (?1, ?2)",
                params![username, password_hash],
            )?;
            Ok(inserted == 1)
        })
        .await
    }
}
