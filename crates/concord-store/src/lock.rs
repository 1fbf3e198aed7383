//! TTL mutex over a shared [`KvStore`].
//!
//! # Protocol
//!
//! - **acquire**: `set_if_absent(lock key, {token, expires_at}, ttl)`. Losing the
//!   race is a normal outcome and returns `None`.
//! - **release**: read the record with its version; delete it through `transact`
//!   watching that version, and only if the token matches. A holder whose lease
//!   expired and was retaken can never delete the new holder's record.
//! - **liveness**: the TTL is the only recovery path. There is no renewal; a
//!   crashed holder's record simply ages out.

use crate::error::Result;
use crate::{decode_json, KvStore, Watch, WriteOp};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default key prefix for lock records.
pub const DEFAULT_LOCK_PREFIX: &str = "lock:";

/// Opaque proof of one particular acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(String);

impl LockToken {
    /// 128 random bits, hex encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 chars are enough to tell holders apart in logs. Records
        // written elsewhere may hold any string, so never slice by byte.
        let short: String = self.0.chars().take(8).collect();
        f.write_str(&short)
    }
}

/// The persisted lock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder_token: LockToken,
    /// Informational; the store's TTL is what actually clears the record.
    pub expires_at: DateTime<Utc>,
}

/// A successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub resource: String,
    pub token: LockToken,
    pub expires_at: DateTime<Utc>,
}

/// Mutual exclusion over named resources, shared by uncoordinated callers.
pub struct DistributedLock<S> {
    store: Arc<S>,
    prefix: String,
}

impl<S> Clone for DistributedLock<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            prefix: self.prefix.clone(),
        }
    }
}

impl<S: KvStore> DistributedLock<S> {
    /// Create a lock namespace using [`DEFAULT_LOCK_PREFIX`].
    pub fn new(store: Arc<S>) -> Self {
        Self::with_prefix(store, DEFAULT_LOCK_PREFIX)
    }

    /// Create a lock namespace with a custom key prefix.
    pub fn with_prefix(store: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, resource: &str) -> String {
        format!("{}{}", self.prefix, resource)
    }

    /// Try to take the lock on `resource` for `ttl`.
    ///
    /// Returns `None` if someone else holds it.
    pub async fn acquire(&self, resource: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let token = LockToken::generate();
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(now);
        let record = LockRecord {
            holder_token: token.clone(),
            expires_at,
        };

        let bytes = serde_json::to_vec(&record)?;
        if self.store.set_if_absent(&self.key(resource), bytes, Some(ttl)).await? {
            debug!(resource, token = %token, "lock acquired");
            Ok(Some(LockLease {
                resource: resource.to_string(),
                token,
                expires_at,
            }))
        } else {
            debug!(resource, "lock held elsewhere");
            Ok(None)
        }
    }

    /// Release a lease obtained from [`acquire`](Self::acquire).
    pub async fn release(&self, lease: &LockLease) -> Result<bool> {
        self.release_token(&lease.resource, &lease.token).await
    }

    /// Delete the lock on `resource` iff it is still held by `token`.
    ///
    /// Returns whether this call removed it. `false` means the lease had
    /// already expired, possibly with a new holder in place.
    pub async fn release_token(&self, resource: &str, token: &LockToken) -> Result<bool> {
        let key = self.key(resource);
        let current = self.store.get_versioned(&key).await?;
        let Some(raw) = current.value else {
            debug!(resource, token = %token, "lock already gone at release");
            return Ok(false);
        };

        match decode_json::<LockRecord>(&key, &raw) {
            Ok(record) if &record.holder_token == token => {}
            Ok(record) => {
                debug!(resource, ours = %token, theirs = %record.holder_token, "lock now held by another caller");
                return Ok(false);
            }
            Err(e) => {
                warn!(resource, error = %e, "unreadable lock record left to expire");
                return Ok(false);
            }
        }

        let commit = self
            .store
            .transact(&[Watch::new(&key, current.version)], vec![WriteOp::delete(&key)])
            .await?;
        debug!(resource, token = %token, committed = commit.is_committed(), "lock release");
        Ok(commit.is_committed())
    }

    /// Current holder of `resource`, if any and readable.
    pub async fn holder(&self, resource: &str) -> Result<Option<LockRecord>> {
        let key = self.key(resource);
        Ok(match self.store.get(&key).await? {
            Some(raw) => decode_json(&key, &raw).ok(),
            None => None,
        })
    }
}
