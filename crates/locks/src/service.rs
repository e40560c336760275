//! Lock service trait and RAII guard.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::LockError;

/// Opaque token identifying one acquisition of a lock.
///
/// Release requires the token, so a holder whose lease expired cannot
/// release the key out from under the next acquirer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    /// Creates a new random token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Boundary for shared mutual exclusion keyed by string.
///
/// Implementations may be backed by any key-value store supporting TTL
/// leases. Two timeouts apply: `wait` bounds how long an acquisition
/// attempt blocks, and `lease` bounds how long the lock is held before it
/// is considered abandoned and force-releasable.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Acquires the lock for `key`, blocking up to `wait`.
    ///
    /// Returns a token on success or [`LockError::AcquisitionTimeout`] once
    /// the wait is exhausted. An existing holder whose lease has expired is
    /// evicted rather than waited on.
    async fn acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<LockToken, LockError>;

    /// Releases the lock if `token` still identifies the current holder.
    fn release(&self, key: &str, token: LockToken) -> Result<(), LockError>;

    /// Unconditionally releases the lock (operational recovery).
    fn force_release(&self, key: &str);
}

/// RAII guard releasing its lock on drop.
///
/// Dropping the guard covers every exit path, including early returns and
/// panics during the critical section.
pub struct LockGuard {
    service: Arc<dyn LockService>,
    key: String,
    token: LockToken,
    released: bool,
}

impl LockGuard {
    /// Acquires `key` on `service` and wraps the token in a guard.
    pub async fn acquire(
        service: Arc<dyn LockService>,
        key: impl Into<String>,
        wait: Duration,
        lease: Duration,
    ) -> Result<Self, LockError> {
        let key = key.into();
        let token = service.acquire(&key, wait, lease).await?;
        Ok(Self {
            service,
            key,
            token,
            released: false,
        })
    }

    /// Returns the guarded key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the lock explicitly, consuming the guard.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.service.release(&self.key, self.token)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.service.release(&self.key, self.token) {
            // Lease may have expired and been re-acquired; nothing to undo.
            tracing::warn!(key = %self.key, error = %e, "lock release on drop failed");
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish()
    }
}

/// Acquires multiple keys in sorted, deduplicated order.
///
/// All concurrent multi-key acquirers agree on the same global order, so no
/// two of them can hold a key each while waiting on the other's. On any
/// acquisition failure, guards already obtained are dropped (released)
/// before the error is returned.
pub async fn acquire_ordered(
    service: Arc<dyn LockService>,
    keys: impl IntoIterator<Item = String>,
    wait: Duration,
    lease: Duration,
) -> Result<Vec<LockGuard>, LockError> {
    let mut sorted: Vec<String> = keys.into_iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut guards = Vec::with_capacity(sorted.len());
    for key in sorted {
        match LockGuard::acquire(Arc::clone(&service), key, wait, lease).await {
            Ok(guard) => guards.push(guard),
            Err(e) => {
                metrics::counter!("lock_batch_acquisition_failures_total").increment(1);
                // Dropping `guards` releases everything acquired so far.
                return Err(e);
            }
        }
    }
    Ok(guards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLockService;

    const WAIT: Duration = Duration::from_millis(50);
    const LEASE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let service: Arc<dyn LockService> = Arc::new(InMemoryLockService::new());

        {
            let _guard = LockGuard::acquire(Arc::clone(&service), "k", WAIT, LEASE)
                .await
                .unwrap();
            // Held: a second acquisition should time out.
            let second = service.acquire("k", WAIT, LEASE).await;
            assert!(matches!(
                second,
                Err(LockError::AcquisitionTimeout { .. })
            ));
        }

        // Guard dropped: acquisition succeeds again.
        let token = service.acquire("k", WAIT, LEASE).await.unwrap();
        service.release("k", token).unwrap();
    }

    #[tokio::test]
    async fn test_acquire_ordered_sorts_and_dedups() {
        let service: Arc<dyn LockService> = Arc::new(InMemoryLockService::new());
        let guards = acquire_ordered(
            Arc::clone(&service),
            vec!["b".to_string(), "a".to_string(), "b".to_string()],
            WAIT,
            LEASE,
        )
        .await
        .unwrap();

        let keys: Vec<&str> = guards.iter().map(|g| g.key()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_acquire_ordered_rolls_back_on_failure() {
        let service: Arc<dyn LockService> = Arc::new(InMemoryLockService::new());

        // Hold "b" so the batch ["a", "b"] fails partway through.
        let blocker = service.acquire("b", WAIT, LEASE).await.unwrap();

        let result = acquire_ordered(
            Arc::clone(&service),
            vec!["a".to_string(), "b".to_string()],
            WAIT,
            LEASE,
        )
        .await;
        assert!(result.is_err());

        // "a" must have been released by the failed batch.
        let token = service.acquire("a", WAIT, LEASE).await.unwrap();
        service.release("a", token).unwrap();
        service.release("b", blocker).unwrap();
    }
}
