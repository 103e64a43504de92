use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use keystone_state::{CasResult, KeyKind, StateError, StateKey, StateStore};

struct Entry {
    value: String,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory [`StateStore`] backed by `dashmap`, for single-process
/// deployments and tests. Expired entries are reaped lazily on access; there
/// is no background sweep, so a process that never touches a stale key will
/// hold it in memory until it does.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn deadline(ttl: Option<Duration>) -> Option<Instant> {
        ttl.map(|d| Instant::now() + d)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        let canonical = key.canonical();
        if let Some(existing) = self.entries.get(&canonical) {
            if !existing.is_expired() {
                return Ok(false);
            }
        }
        self.entries.insert(
            canonical,
            Entry {
                value: value.to_string(),
                version: 1,
                expires_at: Self::deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        let canonical = key.canonical();
        match self.entries.get(&canonical) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            Some(_) => {
                drop(self.entries.remove(&canonical));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        let canonical = key.canonical();
        let version = self
            .entries
            .get(&canonical)
            .map_or(1, |e| if e.is_expired() { 1 } else { e.version + 1 });
        self.entries.insert(
            canonical,
            Entry {
                value: value.to_string(),
                version,
                expires_at: Self::deadline(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        let canonical = key.canonical();
        match self.entries.remove(&canonical) {
            Some((_, entry)) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn increment(
        &self,
        key: &StateKey,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError> {
        let canonical = key.canonical();
        let mut entry = self.entries.entry(canonical).or_insert_with(|| Entry {
            value: "0".to_string(),
            version: 0,
            expires_at: Self::deadline(ttl),
        });

        if entry.is_expired() {
            entry.value = "0".to_string();
            entry.expires_at = Self::deadline(ttl);
        }

        let current: i64 = entry.value.parse().map_err(|_| {
            StateError::Serialization(format!("non-integer counter value: {}", entry.value))
        })?;
        let next = current + delta;
        entry.value = next.to_string();
        entry.version += 1;
        Ok(next)
    }

    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected_version: u64,
        new_value: &str,
        ttl: Option<Duration>,
    ) -> Result<CasResult, StateError> {
        let canonical = key.canonical();
        match self.entries.get_mut(&canonical) {
            Some(mut entry) if !entry.is_expired() => {
                if entry.version != expected_version {
                    return Ok(CasResult::Conflict {
                        current_value: Some(entry.value.clone()),
                        current_version: entry.version,
                    });
                }
                entry.value = new_value.to_string();
                entry.version += 1;
                entry.expires_at = Self::deadline(ttl);
                Ok(CasResult::Ok)
            }
            Some(_) | None => {
                if expected_version != 0 {
                    return Ok(CasResult::Conflict {
                        current_value: None,
                        current_version: 0,
                    });
                }
                self.entries.insert(
                    canonical,
                    Entry {
                        value: new_value.to_string(),
                        version: 1,
                        expires_at: Self::deadline(ttl),
                    },
                );
                Ok(CasResult::Ok)
            }
        }
    }

    async fn scan_keys(
        &self,
        tenant: &str,
        kind: KeyKind,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String)>, StateError> {
        let key_prefix = format!("{tenant}:{kind}:{}", prefix.unwrap_or(""));
        let mut results = Vec::new();
        for entry in &self.entries {
            if entry.key().starts_with(&key_prefix) && !entry.value().is_expired() {
                results.push((entry.key().clone(), entry.value().value.clone()));
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_state::testing::{run_lock_conformance_tests, run_store_conformance_tests};

    use crate::MemoryLockManager;

    #[tokio::test]
    async fn conforms_to_state_store_contract() {
        let store = MemoryStateStore::new();
        run_store_conformance_tests(&store).await.unwrap();
    }

    #[tokio::test]
    async fn conforms_to_distributed_lock_contract() {
        let lock = MemoryLockManager::new();
        run_lock_conformance_tests(&lock).await.unwrap();
    }

    #[tokio::test]
    async fn check_and_set_respects_expired_entries() {
        let store = MemoryStateStore::new();
        let key = StateKey::new("acme", KeyKind::Idempotency, "req-1");
        store
            .set(&key, "stale", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let created = store.check_and_set(&key, "fresh", None).await.unwrap();
        assert!(created);
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn scan_keys_filters_by_tenant_kind_and_prefix() {
        let store = MemoryStateStore::new();
        store
            .set(
                &StateKey::new("acme", KeyKind::RouteHealth, "openai:gpt-4o-mini"),
                "healthy",
                None,
            )
            .await
            .unwrap();
        store
            .set(
                &StateKey::new("acme", KeyKind::RouteHealth, "azure:gpt-4o-mini"),
                "degraded",
                None,
            )
            .await
            .unwrap();
        store
            .set(
                &StateKey::new("other-tenant", KeyKind::RouteHealth, "openai:gpt-4o-mini"),
                "healthy",
                None,
            )
            .await
            .unwrap();

        let results = store
            .scan_keys("acme", KeyKind::RouteHealth, Some("openai"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, "healthy");
    }
}
