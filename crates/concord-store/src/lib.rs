//! Concord Store
//!
//! The shared key-value store is the only durable owner of votes, tallies,
//! settlements, locks and scores. It promises per-key atomicity and nothing
//! more, so every multi-key invariant above it is built from the primitives
//! declared by [`KvStore`]:
//!
//! - `get` / `get_versioned`: read a value (and its version)
//! - `set_if_absent`: conditional create, optionally with a TTL
//! - `atomic_increment`: integer add on a single key
//! - `transact`: watch a set of key versions, then apply a batch of writes
//!   only if none of them moved
//!
//! # Versions
//!
//! Version `0` means "absent". Every write assigns the key a fresh version
//! that is never handed out again, so delete-then-recreate is observable.
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local, for tests and single-node embedding
//! - [`RocksStore`]: RocksDB optimistic transactions
//!
//! # Locking
//!
//! [`DistributedLock`] layers a TTL mutex over `set_if_absent` and `transact`.

mod error;
mod lock;
mod memory;
mod rocks;

pub use error::{Result, StoreError};
pub use lock::{DistributedLock, LockLease, LockRecord, LockToken};
pub use memory::MemoryStore;
pub use rocks::RocksStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Version number of an absent key.
pub const ABSENT_VERSION: u64 = 0;

/// A value read together with its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Option<Vec<u8>>,
    pub version: u64,
}

impl Versioned {
    /// An absent key.
    pub const fn absent() -> Self {
        Self {
            value: None,
            version: ABSENT_VERSION,
        }
    }
}

/// Precondition for [`KvStore::transact`]: `key` must still be at `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub key: String,
    pub version: u64,
}

impl Watch {
    pub fn new(key: impl Into<String>, version: u64) -> Self {
        Self {
            key: key.into(),
            version,
        }
    }
}

/// A single write inside a [`KvStore::transact`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl WriteOp {
    pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
        WriteOp::Put {
            key: key.into(),
            value,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        WriteOp::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// Outcome of a [`KvStore::transact`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// All watches held; every write was applied atomically.
    Committed,
    /// A watched key moved; nothing was written.
    Conflict,
}

impl Commit {
    pub fn is_committed(&self) -> bool {
        matches!(self, Commit::Committed)
    }
}

/// The collaborator contract required by the settlement engine.
///
/// Implementations must make each method atomic with respect to the keys it
/// touches. Expired keys read as absent everywhere.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Read a value and its version.
    async fn get_versioned(&self, key: &str) -> Result<Versioned>;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_versioned(key).await?.value)
    }

    /// Create `key` only if it is absent. Returns whether this call created it.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<bool>;

    /// Unconditionally overwrite `key` (clearing any TTL).
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Add `delta` to the integer at `key` (absent counts as 0) and return the new value.
    async fn atomic_increment(&self, key: &str, delta: i64) -> Result<i64>;

    /// Apply `writes` atomically iff every watched key is still at its expected version.
    async fn transact(&self, watches: &[Watch], writes: Vec<WriteOp>) -> Result<Commit>;
}

/// JSON helpers over any [`KvStore`].
#[async_trait]
pub trait JsonStoreExt: KvStore {
    /// Read and decode a JSON value. Undecodable bytes yield [`StoreError::Corrupt`].
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => decode_json(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Encode `value` as JSON and create it only if `key` is absent.
    async fn set_json_if_absent<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<bool>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set_if_absent(key, bytes, ttl).await
    }
}

impl<S: KvStore + ?Sized> JsonStoreExt for S {}

/// Decode a JSON record, mapping failures to [`StoreError::Corrupt`].
pub fn decode_json<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an ASCII decimal integer record (absent = 0).
pub fn decode_integer(key: &str, bytes: Option<&[u8]>) -> Result<i64> {
    match bytes {
        None => Ok(0),
        Some(raw) => std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| StoreError::NotAnInteger {
                key: key.to_string(),
            }),
    }
}

/// Encode an integer record.
pub fn encode_integer(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}
