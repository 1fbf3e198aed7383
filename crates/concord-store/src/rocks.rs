//! Persistent store using RocksDB optimistic transactions.
//!
//! Each value is wrapped in an [`Envelope`] carrying its version and optional
//! expiry. Read-modify-write primitives run inside an optimistic transaction
//! that tracks the keys it read; RocksDB rejects the commit with `Busy` if
//! another writer touched one of them first. The database calls are
//! synchronous and run on tokio's blocking pool.

use crate::error::{Result, StoreError};
use crate::{decode_integer, encode_integer, Commit, KvStore, Versioned, Watch, WriteOp};
use async_trait::async_trait;
use rocksdb::{ErrorKind, OptimisticTransactionDB, Options, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Attempts for primitives that must not surface a commit conflict to the caller.
const MAX_TXN_ATTEMPTS: usize = 32;

/// On-disk wrapper around every value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    version: u64,
    expires_at_ms: Option<u64>,
    value: Vec<u8>,
}

impl Envelope {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn is_conflict(e: &rocksdb::Error) -> bool {
    matches!(e.kind(), ErrorKind::Busy | ErrorKind::TryAgain)
}

type Txn<'db> = Transaction<'db, OptimisticTransactionDB>;

/// Synchronous RocksDB access. Every call may block on disk I/O.
struct RocksInner {
    db: OptimisticTransactionDB,
    next_version: AtomicU64,
}

impl RocksInner {
    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn decode(key: &str, raw: &[u8]) -> Result<Envelope> {
        bincode::deserialize(raw).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
        bincode::serialize(envelope).map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn wrap(&self, value: Vec<u8>, expires_at_ms: Option<u64>) -> Result<Vec<u8>> {
        Self::encode(&Envelope {
            version: self.bump(),
            expires_at_ms,
            value,
        })
    }

    /// Read the live envelope at `key` inside `txn`, tracking it for conflicts.
    fn read_for_update(txn: &Txn<'_>, key: &str) -> Result<Option<Envelope>> {
        match txn.get_for_update(key.as_bytes(), true)? {
            Some(raw) => {
                let envelope = Self::decode(key, &raw)?;
                Ok((!envelope.is_expired(now_ms())).then_some(envelope))
            }
            None => Ok(None),
        }
    }

    /// Run `body` in a fresh transaction until it commits or a non-conflict error occurs.
    ///
    /// Returns `None` if every attempt lost to a concurrent writer.
    fn retrying<T>(&self, mut body: impl FnMut(&Txn<'_>) -> Result<T>) -> Result<Option<T>> {
        for _ in 0..MAX_TXN_ATTEMPTS {
            let txn = self.db.transaction();
            let out = body(&txn)?;
            match txn.commit() {
                Ok(()) => return Ok(Some(out)),
                Err(e) if is_conflict(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    fn get_versioned(&self, key: &str) -> Result<Versioned> {
        match self.db.get(key.as_bytes())? {
            Some(raw) => {
                let envelope = Self::decode(key, &raw)?;
                if envelope.is_expired(now_ms()) {
                    Ok(Versioned::absent())
                } else {
                    Ok(Versioned {
                        value: Some(envelope.value),
                        version: envelope.version,
                    })
                }
            }
            None => Ok(Versioned::absent()),
        }
    }

    fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        let expires_at_ms = ttl.map(|ttl| now_ms().saturating_add(ttl.as_millis() as u64));
        let created = self.retrying(|txn| {
            if Self::read_for_update(txn, key)?.is_some() {
                return Ok(false);
            }
            txn.put(key.as_bytes(), self.wrap(value.clone(), expires_at_ms)?)?;
            Ok(true)
        })?;
        // Losing every attempt means someone else kept creating it.
        Ok(created.unwrap_or(false))
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let raw = self.wrap(value, None)?;
        self.db.put(key.as_bytes(), raw)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.db.delete(key.as_bytes())?;
        Ok(())
    }

    fn atomic_increment(&self, key: &str, delta: i64) -> Result<i64> {
        let updated = self.retrying(|txn| {
            let (current, expires_at_ms) = match Self::read_for_update(txn, key)? {
                Some(envelope) => (
                    decode_integer(key, Some(envelope.value.as_slice()))?,
                    envelope.expires_at_ms,
                ),
                None => (0, None),
            };
            let updated = current.saturating_add(delta);
            txn.put(key.as_bytes(), self.wrap(encode_integer(updated), expires_at_ms)?)?;
            Ok(updated)
        })?;
        updated.ok_or_else(|| StoreError::Unavailable(format!("increment of {key} kept conflicting")))
    }

    fn transact(&self, watches: &[Watch], writes: Vec<WriteOp>) -> Result<Commit> {
        let txn = self.db.transaction();

        for watch in watches {
            let current = Self::read_for_update(&txn, &watch.key)?.map_or(0, |e| e.version);
            if current != watch.version {
                return Ok(Commit::Conflict);
            }
        }

        for write in writes {
            match write {
                WriteOp::Put { key, value } => {
                    txn.put(key.as_bytes(), self.wrap(value, None)?)?;
                }
                WriteOp::Delete { key } => {
                    txn.delete(key.as_bytes())?;
                }
            }
        }

        match txn.commit() {
            Ok(()) => Ok(Commit::Committed),
            Err(e) if is_conflict(&e) => Ok(Commit::Conflict),
            Err(e) => Err(e.into()),
        }
    }
}

/// RocksDB-backed [`KvStore`]. Cheap to clone; clones share one database.
///
/// Disk work runs on tokio's blocking pool, off the async worker threads.
#[derive(Clone)]
pub struct RocksStore {
    inner: Arc<RocksInner>,
}

impl RocksStore {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = OptimisticTransactionDB::open(&opts, path)?;

        // Seed from the wall clock so versions stay unique across restarts.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
            .max(1);

        Ok(Self {
            inner: Arc::new(RocksInner {
                db,
                next_version: AtomicU64::new(seed),
            }),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RocksInner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl KvStore for RocksStore {
    async fn get_versioned(&self, key: &str) -> Result<Versioned> {
        let key = key.to_string();
        self.blocking(move |db| db.get_versioned(&key)).await
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        let key = key.to_string();
        self.blocking(move |db| db.set_if_absent(&key, value, ttl)).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let key = key.to_string();
        self.blocking(move |db| db.put(&key, value)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.blocking(move |db| db.delete(&key)).await
    }

    async fn atomic_increment(&self, key: &str, delta: i64) -> Result<i64> {
        let key = key.to_string();
        self.blocking(move |db| db.atomic_increment(&key, delta)).await
    }

    async fn transact(&self, watches: &[Watch], writes: Vec<WriteOp>) -> Result<Commit> {
        let watches = watches.to_vec();
        self.blocking(move |db| db.transact(&watches, writes)).await
    }
}
