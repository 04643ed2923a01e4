//! bcrypt hashing for provisioned accounts.

use crate::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Work factor used when none is configured.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Hash a password with a fresh salt.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    Ok(bcrypt::hash(password, cost)?)
}

/// A well-formed bcrypt hash at `cost` that no password produces.
///
/// Verifying against it runs the full key schedule, so an unknown username
/// costs as much as a wrong password.
fn decoy_hash(cost: u32) -> String {
    format!("$2b${cost:02}${}", ".".repeat(53))
}

/// Work factor encoded in a bcrypt hash (`$2b$<cost>$...`).
fn hash_cost(hash: &str) -> Option<u32> {
    hash.split('$').nth(2)?.parse().ok()
}

#[derive(Debug, Clone)]
pub(crate) struct Passwords {
    cost: u32,
    // Cost of the stored hashes most recently seen; the decoy is verified at it.
    decoy_cost: Arc<AtomicU32>,
}

impl Passwords {
    pub(crate) fn new(cost: u32) -> Self {
        Self {
            cost,
            decoy_cost: Arc::new(AtomicU32::new(cost)),
        }
    }

    pub(crate) fn hash(&self, password: &str) -> Result<String> {
        let hash = hash_password(password, self.cost)?;
        self.observe(&hash);
        Ok(hash)
    }

    pub(crate) async fn hash_blocking(&self, password: &str) -> Result<String> {
        let passwords = self.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || passwords.hash(&password)).await?
    }

    /// Align the decoy with an existing account's hash.
    pub(crate) fn observe(&self, stored: &str) {
        if let Some(cost) = hash_cost(stored) {
            self.decoy_cost.store(cost, Ordering::Relaxed);
        }
    }

    pub(crate) fn decoy_cost(&self) -> u32 {
        self.decoy_cost.load(Ordering::Relaxed)
    }

    /// Verify `password` against `stored`, or against the decoy when there is
    /// no stored hash. Only a stored hash can ever match.
    pub(crate) async fn verify(&self, password: &str, stored: Option<String>) -> bool {
        if let Some(hash) = &stored {
            self.observe(hash);
        }
        let hash = stored.unwrap_or_else(|| decoy_hash(self.decoy_cost()));
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || bcrypt::verify(&password, &hash).unwrap_or(false))
            .await
            .unwrap_or(false)
    }
}
