//! # Write Lock
//!
//! The process-wide single-writer capability.
//!
//! Every mutating store operation takes a `&WriteGuard`. The store owns its
//! [`WriteLock`] and only accepts guards issued by that lock, so a mutation
//! that succeeds is a mutation that ran serialized. The guard is held across
//! the write transaction, the hash-chain recomputation and the upstream
//! propagation that follows.

use crate::GraphError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Owner of the write capability.
#[derive(Debug)]
pub struct WriteLock {
    id: u64,
    inner: Mutex<()>,
}

/// Proof that the caller holds one particular write lock.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock_id: u64,
    _held: MutexGuard<'a, ()>,
}

impl Default for WriteLock {
    fn default() -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(()),
        }
    }
}

impl WriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the write capability is free and take it.
    pub fn acquire(&self) -> Result<WriteGuard<'_>, GraphError> {
        let held = self
            .inner
            .lock()
            .map_err(|_| GraphError::Internal("write lock poisoned".to_string()))?;
        Ok(WriteGuard {
            lock_id: self.id,
            _held: held,
        })
    }

    /// Take the write capability if nobody holds it.
    pub fn try_acquire(&self) -> Option<WriteGuard<'_>> {
        self.inner.try_lock().ok().map(|held| WriteGuard {
            lock_id: self.id,
            _held: held,
        })
    }

    /// Reject a guard that this lock did not issue.
    pub fn check(&self, guard: &WriteGuard<'_>) -> Result<(), GraphError> {
        if guard.lock_id == self.id {
            Ok(())
        } else {
            Err(GraphError::Internal(
                "write guard was issued by a different lock".to_string(),
            ))
        }
    }
}
