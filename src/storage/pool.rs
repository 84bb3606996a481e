// src/storage/pool.rs

// Bounded connection pool shared by concurrent callers.
use async_trait::async_trait;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tracing::{debug, trace};

use crate::error::{MonitorError, Result, StorageError};
use crate::storage::PoolStats;

/// Knows how to open a connection for the pool
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection>;
}

struct PoolInner<M: ManageConnection> {
    manager: M,
    idle: Mutex<Vec<M::Connection>>,
    permits: Arc<Semaphore>,
    in_use: AtomicUsize,
    closed: AtomicBool,
    max_size: usize,
    checkout_timeout: Duration,
}

impl<M: ManageConnection> PoolInner<M> {
    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<M::Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A fixed-capacity pool. At most `max_size` connections exist at once;
/// callers beyond that wait up to `checkout_timeout` for one to come back.
pub struct ConnectionPool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageConnection> fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M: ManageConnection> ConnectionPool<M> {
    /// Creates an empty pool; connections are opened lazily on checkout.
    pub fn new(manager: M, max_size: usize, checkout_timeout: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                manager,
                idle: Mutex::new(Vec::with_capacity(max_size)),
                permits: Arc::new(Semaphore::new(max_size)),
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                max_size,
                checkout_timeout,
            }),
        }
    }

    /// Checks out a connection, reusing an idle one when possible.
    pub async fn get(&self) -> Result<PooledConnection<M>> {
        let acquire = Arc::clone(&self.inner.permits).acquire_owned();
        let permit = match time::timeout(self.inner.checkout_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is only closed by close()
            Ok(Err(_)) => return Err(MonitorError::Storage(StorageError::PoolClosed)),
            Err(_) => {
                return Err(MonitorError::Storage(StorageError::Timeout(format!(
                    "no pooled connection became available within {:?}",
                    self.inner.checkout_timeout
                ))))
            }
        };

        if self.is_closed() {
            return Err(MonitorError::Storage(StorageError::PoolClosed));
        }

        let reused = self.inner.idle().pop();
        let conn = match reused {
            Some(conn) => {
                trace!("Reusing idle pooled connection");
                conn
            }
            None => {
                debug!("Opening new pooled connection");
                // On failure the permit is dropped here and the slot frees up
                self.inner.manager.connect().await?
            }
        };

        self.inner.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            broken: false,
            _permit: permit,
        })
    }

    /// Drops idle connections and fails every later checkout. Connections
    /// still checked out are discarded when they are returned.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();
        let dropped = {
            let mut idle = self.inner.idle();
            let count = idle.len();
            idle.clear();
            count
        };
        debug!(dropped_idle = dropped, "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PoolStats {
        PoolStats {
            available: self.inner.idle().len(),
            in_use: self.inner.in_use.load(Ordering::SeqCst),
            max_connections: self.inner.max_size,
        }
    }
}

/// A checked-out connection. Returned to the pool on drop.
pub struct PooledConnection<M: ManageConnection> {
    conn: Option<M::Connection>,
    pool: Arc<PoolInner<M>>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl<M: ManageConnection> PooledConnection<M> {
    /// Discard this connection instead of returning it to the pool
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<M: ManageConnection> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .field("released", &self.conn.is_none())
            .finish()
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        // Only taken in drop
        self.conn.as_ref().expect("pooled connection already released")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pooled connection already released")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
        if let Some(conn) = self.conn.take() {
            if self.broken || self.pool.closed.load(Ordering::SeqCst) {
                trace!("Discarding pooled connection");
                return;
            }
            self.pool.idle().push(conn);
        }
    }
}
