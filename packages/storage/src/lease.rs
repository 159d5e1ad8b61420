//! Named, expiring, exclusive leases.
//!
//! A lease is held by an opaque token and lapses after its TTL, so a crashed
//! holder never blocks a key forever. Only the token's owner can cancel it.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use ulid::Ulid;

use crate::StorageError;

#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Try once to take `key`. Returns the owner token on success.
    async fn try_obtain(&self, key: &str, ttl: Duration) -> Result<Option<String>, StorageError>;

    /// Drop the lease if `token` still owns it.
    async fn cancel(&self, key: &str, token: &str) -> Result<bool, StorageError>;
}

/// Process-local leases.
#[derive(Default)]
pub struct MemoryLeases {
    leases: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLeases {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseBackend for MemoryLeases {
    async fn try_obtain(&self, key: &str, ttl: Duration) -> Result<Option<String>, StorageError> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = leases.get(key)
            && *expires_at > now
        {
            return Ok(None);
        }
        let token = Ulid::new().to_string();
        leases.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn cancel(&self, key: &str, token: &str) -> Result<bool, StorageError> {
        let mut leases = self.leases.lock().await;
        match leases.get(key) {
            Some((owner, _)) if owner == token => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// How hard to try for a lease and how long to keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    /// Extra attempts after the first one fails.
    pub retries: u32,
    pub sleep: Duration,
    pub ttl: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            sleep: Duration::from_millis(10),
            ttl: Duration::from_secs(60),
        }
    }
}

/// Run `f` while holding the lease on `key`.
///
/// Polls up to `policy.retries` more times, sleeping between attempts, and
/// fails with [`StorageError::LeaseNotObtained`] if the key stays taken.
pub async fn in_lock<F, Fut, T, E>(
    backend: &dyn LeaseBackend,
    key: &str,
    policy: LeasePolicy,
    f: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<StorageError>,
{
    let mut remaining = policy.retries;
    let token = loop {
        if let Some(token) = backend.try_obtain(key, policy.ttl).await? {
            break token;
        }
        if remaining == 0 {
            return Err(StorageError::LeaseNotObtained {
                key: key.to_string(),
            }
            .into());
        }
        remaining -= 1;
        tokio::time::sleep(policy.sleep).await;
    };

    let result = f().await;

    match backend.cancel(key, &token).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!("Lease {} expired before it was released", key),
        Err(e) => tracing::warn!("Failed to release lease {}: {}", key, e),
    }

    result
}
