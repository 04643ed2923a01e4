use thiserror::Error;

/// Storage errors.
///
/// A failed key-space write during an update may leave that update partially
/// applied; see [`ReplicatedStore`](crate::ReplicatedStore).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("password hash error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("key space unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
