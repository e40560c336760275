//! In-memory lock service with TTL leases.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::LockError;
use crate::service::{LockService, LockToken};

struct LockEntry {
    token: LockToken,
    expires_at: Instant,
}

/// In-memory [`LockService`] implementation.
///
/// Suitable for a single process and for tests. Leases are enforced lazily:
/// an expired holder is evicted by the next acquirer rather than by a
/// background reaper, mirroring how TTL keys behave in a shared store.
#[derive(Clone, Default)]
pub struct InMemoryLockService {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl InMemoryLockService {
    /// Polling interval while waiting for a contended lock.
    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    /// Creates a new empty lock service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of currently held (unexpired) locks.
    pub fn held_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .expect("lock table poisoned")
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    fn try_acquire(&self, key: &str, lease: Duration) -> Option<LockToken> {
        let mut entries = self.entries.lock().expect("lock table poisoned");
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.expires_at > now => None,
            _ => {
                // Vacant, or the previous lease expired: the lock is
                // considered abandoned and is taken over.
                let token = LockToken::new();
                entries.insert(
                    key.to_string(),
                    LockEntry {
                        token,
                        expires_at: now + lease,
                    },
                );
                Some(token)
            }
        }
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<LockToken, LockError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(token) = self.try_acquire(key, lease) {
                metrics::counter!("lock_acquisitions_total").increment(1);
                return Ok(token);
            }
            if Instant::now() >= deadline {
                metrics::counter!("lock_acquisition_timeouts_total").increment(1);
                tracing::warn!(key, ?wait, "lock acquisition timed out");
                return Err(LockError::AcquisitionTimeout {
                    key: key.to_string(),
                    wait,
                });
            }
            tokio::time::sleep(Self::POLL_INTERVAL).await;
        }
    }

    fn release(&self, key: &str, token: LockToken) -> Result<(), LockError> {
        let mut entries = self.entries.lock().expect("lock table poisoned");
        match entries.get(key) {
            Some(entry) if entry.token == token => {
                entries.remove(key);
                Ok(())
            }
            _ => Err(LockError::NotHeld {
                key: key.to_string(),
            }),
        }
    }

    fn force_release(&self, key: &str) {
        let mut entries = self.entries.lock().expect("lock table poisoned");
        if entries.remove(key).is_some() {
            tracing::warn!(key, "lock force-released");
        }
    }
}
