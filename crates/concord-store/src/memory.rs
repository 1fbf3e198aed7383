//! In-memory store.
//!
//! A single mutex over the whole map makes every operation, including
//! multi-key `transact`, trivially atomic. TTLs are measured on the tokio
//! clock so tests can pause and advance time.

use crate::error::Result;
use crate::{decode_integer, encode_integer, Commit, KvStore, Versioned, Watch, WriteOp};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-local [`KvStore`].
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    next_version: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_version: AtomicU64::new(1),
        }
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether the store holds no live keys.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live keys starting with `prefix`, sorted. O(n); for tests and diagnostics.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

/// Drop `key` if its TTL has elapsed, then return the live entry.
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_versioned(&self, key: &str) -> Result<Versioned> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(match live(&mut entries, key, now) {
            Some(entry) => Versioned {
                value: Some(entry.value.clone()),
                version: entry.version,
            },
            None => Versioned::absent(),
        })
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        let entry = Entry {
            value,
            version: self.bump(),
            expires_at: ttl.map(|ttl| now + ttl),
        };
        entries.insert(key.to_string(), entry);
        Ok(true)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let entry = Entry {
            value,
            version: self.bump(),
            expires_at: None,
        };
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn atomic_increment(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let (current, expires_at) = match live(&mut entries, key, now) {
            Some(entry) => (decode_integer(key, Some(entry.value.as_slice()))?, entry.expires_at),
            None => (0, None),
        };
        let updated = current.saturating_add(delta);
        let entry = Entry {
            value: encode_integer(updated),
            version: self.bump(),
            expires_at,
        };
        entries.insert(key.to_string(), entry);
        Ok(updated)
    }

    async fn transact(&self, watches: &[Watch], writes: Vec<WriteOp>) -> Result<Commit> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        for watch in watches {
            let current = live(&mut entries, &watch.key, now).map_or(0, |e| e.version);
            if current != watch.version {
                tracing::trace!(key = %watch.key, expected = watch.version, current, "transact conflict");
                return Ok(Commit::Conflict);
            }
        }

        for write in writes {
            match write {
                WriteOp::Put { key, value } => {
                    let entry = Entry {
                        value,
                        version: self.bump(),
                        expires_at: None,
                    };
                    entries.insert(key, entry);
                }
                WriteOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(Commit::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_if_absent_only_once() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", b"a".to_vec(), None).await.unwrap());
        assert!(!store.set_if_absent("k", b"b".to_vec(), None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_entry() {
        let store = MemoryStore::new();
        store
            .set_if_absent("k", b"a".to_vec(), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.set_if_absent("k", b"b".to_vec(), None).await.unwrap());
    }

    #[tokio::test]
    async fn increment_from_absent() {
        let store = MemoryStore::new();
        assert_eq!(store.atomic_increment("n", 1).await.unwrap(), 1);
        assert_eq!(store.atomic_increment("n", 4).await.unwrap(), 5);
        assert_eq!(store.atomic_increment("n", -2).await.unwrap(), 3);
        assert_eq!(store.get("n").await.unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn increment_rejects_non_integer() {
        let store = MemoryStore::new();
        store.put("n", b"abc".to_vec()).await.unwrap();
        let err = store.atomic_increment("n", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotAnInteger { .. }));
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.atomic_increment("n", 1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("n").await.unwrap(), Some(b"50".to_vec()));
    }

    #[tokio::test]
    async fn versions_change_on_every_write() {
        let store = MemoryStore::new();
        assert_eq!(store.get_versioned("k").await.unwrap(), Versioned::absent());

        store.put("k", b"a".to_vec()).await.unwrap();
        let v1 = store.get_versioned("k").await.unwrap().version;
        store.delete("k").await.unwrap();
        store.put("k", b"a".to_vec()).await.unwrap();
        let v2 = store.get_versioned("k").await.unwrap().version;

        assert_ne!(v1, 0);
        assert_ne!(v1, v2, "recreated key must not reuse a version");
    }

    #[tokio::test]
    async fn transact_commits_when_watches_hold() {
        let store = MemoryStore::new();
        store.put("a", b"1".to_vec()).await.unwrap();
        let va = store.get_versioned("a").await.unwrap().version;

        let commit = store
            .transact(
                &[Watch::new("a", va), Watch::new("b", 0)],
                vec![WriteOp::put("a", b"2".to_vec()), WriteOp::put("b", b"x".to_vec())],
            )
            .await
            .unwrap();

        assert_eq!(commit, Commit::Committed);
        assert_eq!(store.get("a").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get("b").await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn transact_conflict_writes_nothing() {
        let store = MemoryStore::new();
        store.put("a", b"1".to_vec()).await.unwrap();
        let stale = store.get_versioned("a").await.unwrap().version;
        store.atomic_increment("a", 1).await.unwrap();

        let commit = store
            .transact(
                &[Watch::new("a", stale)],
                vec![WriteOp::put("a", b"9".to_vec()), WriteOp::put("b", b"x".to_vec())],
            )
            .await
            .unwrap();

        assert_eq!(commit, Commit::Conflict);
        assert_eq!(store.get("a").await.unwrap(), Some(b"2".to_vec()));
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prefix_listing() {
        let store = MemoryStore::new();
        store.put("x:2", b"".to_vec()).await.unwrap();
        store.put("x:1", b"".to_vec()).await.unwrap();
        store.put("y:1", b"".to_vec()).await.unwrap();
        assert_eq!(store.keys_with_prefix("x:").await, vec!["x:1", "x:2"]);
        assert_eq!(store.len().await, 3);
    }
}
