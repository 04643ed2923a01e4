//! Authentication error types.

use thiserror::Error;

/// Reasons a request is rejected at the authentication boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No bearer token was presented.
    #[error("missing token")]
    MissingToken,

    /// The token was never issued, or has been revoked or evicted.
    #[error("invalid token")]
    InvalidToken,

    /// The token outlived its TTL and has now been evicted.
    #[error("token expired")]
    TokenExpired,

    /// The username/password pair did not match an account.
    #[error("invalid username or password")]
    InvalidCredentials,
}

pub type Result<T> = std::result::Result<T, AuthError>;
