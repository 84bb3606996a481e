// src/client/mod.rs
//! Resilient key-value client.
//!
//! [`KvClient`] wraps a pooled [`StoreDriver`] and keeps the rest of the
//! service running while Redis is down or restarting:
//!
//! 1. **Throttled health checks**: connectivity is probed with PING at most
//!    once per `health_check_interval`; in between, the cached flag answers.
//! 2. **Reconnect**: after three failed probes in a row the pool is thrown
//!    away and rebuilt from the original configuration.
//! 3. **Safe sentinels**: data operations never return errors. Reads fall
//!    back to a default, writes report `false`/`None`/`0`.
//!
//! ```plaintext
//! caller ──► KvClient ──► is_connected()? ──no──► sentinel
//!                             │yes
//!                             ▼
//!                        StoreDriver ──► ConnectionPool ──► Redis
//! ```

mod health;

#[cfg(test)]
mod tests;

pub use health::{HealthSnapshot, MAX_CONSECUTIVE_FAILURES};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::KvClientConfig;
use crate::error::{MonitorError, Result, StorageError};
use crate::storage::{
    DriverConnector, PoolStats, RedisConnector, ScoreRange, SetOptions, StoreDriver,
};
use health::HealthState;

/// Key-value client with a connection pool, throttled health checks and
/// failure-triggered reconnection. Share it behind an `Arc`.
#[derive(Debug)]
pub struct KvClient {
    config: KvClientConfig,
    connector: Arc<dyn DriverConnector>,
    driver: RwLock<Option<Arc<dyn StoreDriver>>>,
    health: Mutex<HealthState>,
    closed: AtomicBool,
}

impl KvClient {
    /// Creates the client and tries to open the pool once.
    ///
    /// An unreachable store is not an error: the client starts disconnected
    /// and recovers through later health checks. Only invalid configuration
    /// fails.
    pub async fn connect(
        config: KvClientConfig,
        connector: Arc<dyn DriverConnector>,
    ) -> Result<Self> {
        config.validate()?;

        let client = Self {
            config,
            connector,
            driver: RwLock::new(None),
            health: Mutex::new(HealthState::default()),
            closed: AtomicBool::new(false),
        };

        {
            let mut health = client.health.lock().await;
            client.establish(&mut health).await;
        }

        Ok(client)
    }

    /// Convenience constructor for a real Redis server
    pub async fn connect_redis(config: KvClientConfig) -> Result<Self> {
        Self::connect(config, Arc::new(RedisConnector)).await
    }

    pub fn config(&self) -> &KvClientConfig {
        &self.config
    }

    /// Throttled connectivity check.
    ///
    /// Within `health_check_interval` of the previous probe this returns the
    /// cached flag without touching the store. Otherwise it sends PING, and
    /// after [`MAX_CONSECUTIVE_FAILURES`] failed probes it rebuilds the pool.
    pub async fn is_connected(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        let mut health = self.health.lock().await;
        if self.is_closed() {
            return false;
        }

        let now = Instant::now();
        if !health.probe_due(now, self.config.health_check_interval) {
            return health.connected;
        }
        health.last_check = Some(now);

        let probe = match self.current_driver() {
            Some(driver) => driver.ping().await,
            None => Err(MonitorError::Storage(StorageError::NotConnected)),
        };

        match probe {
            Ok(()) => {
                if !health.connected {
                    info!(target_addr = %self.config.target(), "Store connection is healthy");
                }
                health.record_success();
            }
            Err(e) => {
                let reconnect = health.record_failure();
                warn!(
                    error = %e,
                    failures = health.consecutive_failures,
                    "Store health check failed"
                );
                if reconnect {
                    self.reconnect(&mut health).await;
                }
            }
        }

        health.connected
    }

    /// Alias for [`KvClient::is_connected`]
    pub async fn ping(&self) -> bool {
        self.is_connected().await
    }

    /// Stored value, or `None` when the key is absent or the store is
    /// unavailable.
    pub async fn get(&self, key: &str) -> Option<String> {
        let driver = self.driver_if_connected("GET", key).await?;
        match driver.get(key).await {
            Ok(value) => value,
            Err(e) => {
                self.absorb("GET", key, e).await;
                None
            }
        }
    }

    /// Stored value, or `default` when the key is absent or the store is
    /// unavailable.
    pub async fn get_or(&self, key: &str, default: impl Into<String>) -> String {
        match self.get(key).await {
            Some(value) => value,
            None => default.into(),
        }
    }

    /// Returns whether the write was applied. Never writes while disconnected.
    pub async fn set(&self, key: &str, value: &str, options: SetOptions) -> bool {
        let Some(driver) = self.driver_if_connected("SET", key).await else {
            return false;
        };
        match driver.set(key, value, options).await {
            Ok(applied) => applied,
            Err(e) => {
                self.absorb("SET", key, e).await;
                false
            }
        }
    }

    /// Post-increment value, or `None` when the store is unavailable.
    pub async fn incr(&self, key: &str, amount: i64) -> Option<i64> {
        let driver = self.driver_if_connected("INCR", key).await?;
        match driver.incr(key, amount).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.absorb("INCR", key, e).await;
                None
            }
        }
    }

    /// Number of keys removed; 0 when the store is unavailable.
    pub async fn delete(&self, keys: &[&str]) -> u64 {
        let joined = keys.join(",");
        let Some(driver) = self.driver_if_connected("DEL", &joined).await else {
            return 0;
        };
        match driver.del(keys).await {
            Ok(removed) => removed,
            Err(e) => {
                self.absorb("DEL", &joined, e).await;
                0
            }
        }
    }

    // Sorted-set operations. These surface errors so callers can pick their
    // own failure policy; connectivity errors still update the health state.

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64> {
        let driver = self.require_driver()?;
        let result = driver.zadd(key, member, score).await;
        self.observe(result).await
    }

    pub async fn zremrangebyscore(&self, key: &str, range: ScoreRange) -> Result<u64> {
        let driver = self.require_driver()?;
        let result = driver.zremrangebyscore(key, range).await;
        self.observe(result).await
    }

    pub async fn zcard(&self, key: &str) -> Result<u64> {
        let driver = self.require_driver()?;
        let result = driver.zcard(key).await;
        self.observe(result).await
    }

    pub async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        let driver = self.require_driver()?;
        let result = driver.zrange_withscores(key, start, stop).await;
        self.observe(result).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let driver = self.require_driver()?;
        let result = driver.expire(key, ttl).await;
        self.observe(result).await
    }

    /// Pool usage; all zeros when no pool exists.
    pub fn pool_stats(&self) -> PoolStats {
        self.current_driver()
            .map(|driver| driver.pool_stats())
            .unwrap_or_default()
    }

    /// Current connectivity bookkeeping, without probing
    pub async fn health_snapshot(&self) -> HealthSnapshot {
        self.health.lock().await.snapshot(Instant::now())
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.health.lock().await.consecutive_failures
    }

    /// Disconnects the pool. Every later operation reports disconnected.
    /// Safe to call more than once.
    pub async fn close(&self) {
        let mut health = self.health.lock().await;
        let was_closed = self.closed.swap(true, Ordering::SeqCst);

        match self.take_driver() {
            Some(driver) => {
                driver.disconnect().await;
                info!(target_addr = %self.config.target(), "Store connection pool closed");
            }
            None if was_closed => debug!("Store client already closed"),
            None => {}
        }

        health.connected = false;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Opens a new pool through the connector and verifies it with PING.
    /// Failures leave the client without a driver.
    async fn establish(&self, health: &mut MutexGuard<'_, HealthState>) -> bool {
        let attempt = async {
            let driver = self.connector.connect(&self.config).await?;
            if let Err(e) = driver.ping().await {
                driver.disconnect().await;
                return Err(e);
            }
            Ok(driver)
        };

        match attempt.await {
            Ok(driver) => {
                if self.is_closed() {
                    driver.disconnect().await;
                    return false;
                }
                *self.driver.write().unwrap_or_else(PoisonError::into_inner) = Some(driver);
                health.record_success();
                info!(
                    target_addr = %self.config.target(),
                    max_connections = self.config.max_connections,
                    "Store connection pool initialized"
                );
                true
            }
            Err(e) => {
                error!(
                    target_addr = %self.config.target(),
                    error = %e,
                    "Failed to initialize store connection pool"
                );
                health.connected = false;
                if health.last_check.is_none() && health.consecutive_failures == 0 {
                    // Initial connect counts toward the reconnect threshold
                    health.consecutive_failures = 1;
                }
                false
            }
        }
    }

    async fn reconnect(&self, health: &mut MutexGuard<'_, HealthState>) {
        info!(
            failures = health.consecutive_failures,
            "Attempting to reconnect to store"
        );

        if let Some(old) = self.take_driver() {
            old.disconnect().await;
        }

        if !self.establish(health).await {
            error!("Reconnection attempt failed");
        }
    }

    async fn driver_if_connected(
        &self,
        operation: &'static str,
        key: &str,
    ) -> Option<Arc<dyn StoreDriver>> {
        if !self.is_connected().await {
            debug!(operation, key, "Store not connected, skipping");
            return None;
        }
        self.current_driver()
    }

    fn require_driver(&self) -> Result<Arc<dyn StoreDriver>> {
        self.current_driver()
            .ok_or(MonitorError::Storage(StorageError::NotConnected))
    }

    fn current_driver(&self) -> Option<Arc<dyn StoreDriver>> {
        self.driver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_driver(&self) -> Option<Arc<dyn StoreDriver>> {
        self.driver
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connectivity() {
                self.mark_disconnected(e).await;
            }
        }
        result
    }

    async fn absorb(&self, operation: &'static str, key: &str, err: MonitorError) {
        if err.is_connectivity() {
            error!(operation, key, error = %err, "Store connection error");
            self.mark_disconnected(&err).await;
        } else {
            error!(operation, key, error = %err, "Store response error");
        }
    }

    async fn mark_disconnected(&self, err: &MonitorError) {
        let mut health = self.health.lock().await;
        health.connected = false;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        debug!(
            error = %err,
            failures = health.consecutive_failures,
            "Marked store as disconnected"
        );
    }
}
