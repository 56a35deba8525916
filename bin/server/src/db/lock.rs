//! Cluster-wide named locks on Postgres advisory locks.
//!
//! Advisory locks belong to a session, so each held lock keeps its pooled
//! connection checked out until released. A connection whose unlock was not
//! confirmed never goes back to the pool: it is detached, and closing it ends
//! the session together with any lock it still holds.

use async_trait::async_trait;
use fleetdesk_oauth::{HeldLock, LockError, LockGuard, NamedLock};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::{debug, warn};

pub struct PgAdvisoryLock {
    pool: PgPool,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NamedLock for PgAdvisoryLock {
    async fn acquire(&self, name: &str) -> Result<LockGuard, LockError> {
        let acquire_failed = |e: sqlx::Error| LockError::AcquireFailed {
            name: name.to_string(),
            details: e.to_string(),
        };

        let conn = self.pool.acquire().await.map_err(acquire_failed)?;
        // Owned by the guard before the lock query runs, so a cancelled wait
        // discards the session instead of pooling a late-granted lock.
        let mut held = AdvisoryHeld {
            name: name.to_string(),
            conn: Some(conn),
        };
        if let Some(conn) = held.conn.as_mut() {
            sqlx::query("SELECT pg_advisory_lock(hashtext($1))")
                .bind(name)
                .execute(&mut **conn)
                .await
                .map_err(acquire_failed)?;
        }

        debug!(lock = name, "advisory lock acquired");
        Ok(LockGuard::new(name, held))
    }
}

struct AdvisoryHeld {
    name: String,
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl HeldLock for AdvisoryHeld {
    async fn unlock(self: Box<Self>) -> Result<(), LockError> {
        let mut this = self;
        let Some(mut conn) = this.conn.take() else {
            return Ok(());
        };

        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(&this.name)
            .fetch_one(&mut *conn)
            .await;

        if !connection_reusable(&unlocked) {
            drop(conn.detach());
        }

        match unlocked {
            Ok(true) => {
                debug!(lock = %this.name, "advisory lock released");
                Ok(())
            }
            Ok(false) => Err(LockError::ReleaseFailed {
                name: this.name.clone(),
                details: "advisory lock was not held by this session".to_string(),
            }),
            Err(e) => Err(LockError::ReleaseFailed {
                name: this.name.clone(),
                details: e.to_string(),
            }),
        }
    }
}

impl Drop for AdvisoryHeld {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(lock = %self.name, "closing advisory lock session without unlock");
            drop(conn.detach());
        }
    }
}

/// Only a confirmed unlock leaves the session free of the lock.
fn connection_reusable(unlocked: &Result<bool, sqlx::Error>) -> bool {
    matches!(unlocked, Ok(true))
}
