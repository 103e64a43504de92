use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use keystone_state::{DistributedLock, LockGuard, StateError};
use uuid::Uuid;

struct Held {
    owner: Uuid,
    expires_at: Instant,
}

/// In-memory [`DistributedLock`] backed by `dashmap`. Locks are scoped to
/// this process; correct only for single-process deployments, which is the
/// deployment `keystone-state-memory` targets.
#[derive(Default)]
pub struct MemoryLockManager {
    locks: Arc<DashMap<String, Held>>,
}

impl MemoryLockManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryLockManager {
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StateError> {
        let owner = Uuid::new_v4();
        let expires_at = Instant::now() + ttl;

        let acquired = match self.locks.get(name) {
            Some(held) if Instant::now() < held.expires_at => false,
            _ => true,
        };

        if acquired {
            self.locks.insert(name.to_string(), Held { owner, expires_at });
            Ok(Some(Box::new(MemoryLockGuard {
                locks: self.locks.clone(),
                name: name.to_string(),
                owner,
            })))
        } else {
            Ok(None)
        }
    }

    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Box<dyn LockGuard>, StateError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire(name, ttl).await? {
                return Ok(guard);
            }
            if Instant::now() >= deadline {
                return Err(StateError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub struct MemoryLockGuard {
    locks: Arc<DashMap<String, Held>>,
    name: String,
    owner: Uuid,
}

#[async_trait]
impl LockGuard for MemoryLockGuard {
    async fn extend(&self, duration: Duration) -> Result<(), StateError> {
        match self.locks.get_mut(&self.name) {
            Some(mut held) if held.owner == self.owner => {
                held.expires_at = Instant::now() + duration;
                Ok(())
            }
            _ => Err(StateError::LockNotHeld),
        }
    }

    async fn release(self: Box<Self>) -> Result<(), StateError> {
        self.locks
            .remove_if(&self.name, |_, held| held.owner == self.owner);
        Ok(())
    }

    async fn is_held(&self) -> Result<bool, StateError> {
        Ok(self
            .locks
            .get(&self.name)
            .is_some_and(|held| held.owner == self.owner && Instant::now() < held.expires_at))
    }
}
