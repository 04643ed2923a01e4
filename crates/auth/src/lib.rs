//! Session tokens and login types.
//!
//! [`TokenCache`] hands out opaque bearer tokens after a successful login and
//! checks them on later requests. Tokens live for one hour; an expired token
//! is dropped by the first check that sees it.

mod clock;
mod credentials;
mod error;
mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{Credentials, bearer_token};
pub use error::{AuthError, Result};
pub use token::{SessionToken, TOKEN_TTL_SECS, TokenCache};
