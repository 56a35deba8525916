//! Named mutual exclusion for registration.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::LockError;

/// A lock addressed by name.
///
/// `acquire` hands back a [`LockGuard`]; the lock stays held until the guard
/// is released or dropped, so a cancelled holder never strands it.
#[async_trait]
pub trait NamedLock: Send + Sync {
    /// Waits until `name` is free and takes it.
    async fn acquire(&self, name: &str) -> Result<LockGuard, LockError>;
}

/// Backend half of a held lock.
///
/// Implementations must free the lock in their `Drop` as well as in
/// `unlock`.
#[async_trait]
pub trait HeldLock: Send {
    /// Frees the lock, reporting whether the backend confirmed it.
    async fn unlock(self: Box<Self>) -> Result<(), LockError>;
}

/// A held named lock.
#[must_use = "the lock is freed as soon as the guard is dropped"]
pub struct LockGuard {
    name: String,
    held: Box<dyn HeldLock>,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, held: impl HeldLock + 'static) -> Self {
        Self {
            name: name.into(),
            held: Box::new(held),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frees the lock now.
    pub async fn release(self) -> Result<(), LockError> {
        self.held.unlock().await
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

/// Lock scoped to this process. Only safe for single-instance deployments.
#[derive(Default)]
pub struct ProcessLock {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProcessLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct ProcessHeld(OwnedMutexGuard<()>);

#[async_trait]
impl HeldLock for ProcessHeld {
    async fn unlock(self: Box<Self>) -> Result<(), LockError> {
        drop(self.0);
        Ok(())
    }
}

#[async_trait]
impl NamedLock for ProcessLock {
    async fn acquire(&self, name: &str) -> Result<LockGuard, LockError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        Ok(LockGuard::new(name, ProcessHeld(guard)))
    }
}
