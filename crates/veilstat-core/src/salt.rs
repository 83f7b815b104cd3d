//! Rotating salt used to parameterize visitor hashing.
//!
//! Exactly one salt is current at a time. A salt is never mutated: once it
//! expires, the first caller to notice generates a successor and publishes it
//! through [`SaltStore::put_if_current`]. Callers racing at the expiry
//! instant all converge on whichever successor the store accepted first.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use thiserror::Error;
use tracing::info;

/// Number of random bytes in a salt (hex-encoded to twice as many chars).
pub const SALT_BYTES: usize = 32;

#[derive(Clone, PartialEq, Eq)]
pub struct Salt {
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Salt")
            .field("value", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Salt {
    /// Generate a fresh random salt valid for `ttl` starting at `now`.
    pub fn generate(now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        let mut buf = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut buf);
        Self {
            value: hex::encode(buf),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum SaltError {
    #[error("salt store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for the current salt.
///
/// Implementations must make `put_if_current` atomic with respect to other
/// callers, including callers in other processes sharing the same store.
#[async_trait]
pub trait SaltStore: Send + Sync + 'static {
    async fn load(&self) -> Result<Option<Salt>, SaltError>;

    /// Store `candidate` only if the stored salt's value is still `expected`,
    /// or the stored salt has expired as of `candidate.created_at`, or no salt
    /// exists yet.
    ///
    /// Returns the salt that is current after the call: `candidate` when it
    /// was stored, otherwise the salt another caller published first.
    async fn put_if_current(
        &self,
        expected: Option<&str>,
        candidate: &Salt,
    ) -> Result<Salt, SaltError>;
}

/// In-process store. Only suitable when a single ingestion process runs.
#[derive(Default)]
pub struct MemorySaltStore {
    slot: Mutex<Option<Salt>>,
}

impl MemorySaltStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SaltStore for MemorySaltStore {
    async fn load(&self) -> Result<Option<Salt>, SaltError> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| SaltError::Unavailable("salt slot poisoned".to_string()))?;
        Ok(slot.clone())
    }

    async fn put_if_current(
        &self,
        expected: Option<&str>,
        candidate: &Salt,
    ) -> Result<Salt, SaltError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| SaltError::Unavailable("salt slot poisoned".to_string()))?;
        let replace = match slot.as_ref() {
            None => true,
            Some(stored) => {
                Some(stored.value.as_str()) == expected
                    || stored.is_expired(candidate.created_at)
            }
        };
        if replace {
            *slot = Some(candidate.clone());
        }
        slot.clone()
            .ok_or_else(|| SaltError::Unavailable("salt slot empty after write".to_string()))
    }
}

/// Service object handing out the current salt.
#[derive(Clone)]
pub struct SaltManager {
    store: Arc<dyn SaltStore>,
    ttl: chrono::Duration,
}

impl SaltManager {
    pub fn new(store: Arc<dyn SaltStore>, ttl: std::time::Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1));
        Self { store, ttl }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Return the active salt, generating a successor if none exists or the
    /// stored one has expired.
    pub async fn current_salt(&self) -> Result<Salt, SaltError> {
        self.current_salt_at(Utc::now()).await
    }

    pub async fn current_salt_at(&self, now: DateTime<Utc>) -> Result<Salt, SaltError> {
        let stored = self.store.load().await?;
        if let Some(salt) = stored.as_ref().filter(|s| !s.is_expired(now)) {
            return Ok(salt.clone());
        }
        let expected = stored.as_ref().map(|s| s.value.clone());
        self.publish(expected.as_deref(), now).await
    }

    /// Out-of-band rotation. Callers racing on the same observed salt
    /// produce a single successor.
    pub async fn rotate(&self) -> Result<Salt, SaltError> {
        let now = Utc::now();
        let stored = self.store.load().await?;
        let expected = stored.as_ref().map(|s| s.value.clone());
        self.publish(expected.as_deref(), now).await
    }

    /// Rotate only when the stored salt is missing or expired.
    /// Returns `true` when this call published a new salt.
    pub async fn rotate_if_expired(&self) -> Result<bool, SaltError> {
        let now = Utc::now();
        let before = self.store.load().await?;
        if before.as_ref().is_some_and(|s| !s.is_expired(now)) {
            return Ok(false);
        }
        let after = self.current_salt_at(now).await?;
        Ok(before.map(|s| s.value) != Some(after.value))
    }

    async fn publish(&self, expected: Option<&str>, now: DateTime<Utc>) -> Result<Salt, SaltError> {
        let candidate = Salt::generate(now, self.ttl);
        let current = self.store.put_if_current(expected, &candidate).await?;
        if current.value == candidate.value {
            info!(expires_at = %current.expires_at, "Salt rotated");
        }
        Ok(current)
    }
}
