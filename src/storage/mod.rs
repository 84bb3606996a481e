// src/storage/mod.rs

pub mod pool;
pub mod redis;

#[cfg(test)]
mod tests;

pub use self::pool::{ConnectionPool, ManageConnection, PooledConnection};
pub use self::redis::{RedisConnectionManager, RedisConnector, RedisDriver};

use super::config::KvClientConfig;
use super::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of connection pool usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Idle connections ready for checkout
    pub available: usize,
    /// Connections currently checked out
    pub in_use: usize,
    /// Configured upper bound
    pub max_connections: usize,
}

/// Expiration attached to a SET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// EX, in seconds
    Seconds(u64),
    /// PX, in milliseconds
    Millis(u64),
}

/// Options for [`StoreDriver::set`], mirroring SET's EX/PX/NX/XX flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub expiry: Option<Expiry>,
    /// NX: only write when the key does not exist
    pub only_if_absent: bool,
    /// XX: only write when the key already exists
    pub only_if_present: bool,
}

impl SetOptions {
    pub fn expire_in(ttl: Duration) -> Self {
        let expiry = if ttl.subsec_millis() == 0 {
            Expiry::Seconds(ttl.as_secs())
        } else {
            Expiry::Millis(ttl.as_millis() as u64)
        };
        Self {
            expiry: Some(expiry),
            ..Self::default()
        }
    }

    pub fn only_if_absent(mut self) -> Self {
        self.only_if_absent = true;
        self
    }

    pub fn only_if_present(mut self) -> Self {
        self.only_if_present = true;
        self
    }
}

/// Score interval for sorted-set range commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: Bound<f64>,
    pub max: Bound<f64>,
}

impl ScoreRange {
    /// Every score strictly below `max`
    pub fn below(max: f64) -> Self {
        Self {
            min: Bound::Unbounded,
            max: Bound::Excluded(max),
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        let above_min = match self.min {
            Bound::Included(min) => score >= min,
            Bound::Excluded(min) => score > min,
            Bound::Unbounded => true,
        };
        let below_max = match self.max {
            Bound::Included(max) => score <= max,
            Bound::Excluded(max) => score < max,
            Bound::Unbounded => true,
        };
        above_min && below_max
    }

    /// Renders the bounds the way ZRANGEBYSCORE and friends expect them,
    /// e.g. `("-inf", "(1700000000.5")`.
    pub fn to_redis_args(&self) -> (String, String) {
        (
            render_bound(self.min, "-inf"),
            render_bound(self.max, "+inf"),
        )
    }
}

fn render_bound(bound: Bound<f64>, unbounded: &str) -> String {
    match bound {
        Bound::Included(score) => score.to_string(),
        Bound::Excluded(score) => format!("({}", score),
        Bound::Unbounded => unbounded.to_string(),
    }
}

/// Wire-level access to the backing store.
///
/// Every method reports failures as errors; deciding what a failure means for
/// the caller is the job of [`crate::client::KvClient`].
#[async_trait]
pub trait StoreDriver: Send + Sync + Debug {
    // PING; succeeds only on a PONG reply
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    // Returns whether the write was applied (NX/XX may skip it)
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool>;

    async fn incr(&self, key: &str, amount: i64) -> Result<i64>;

    async fn del(&self, keys: &[&str]) -> Result<u64>;

    // Adds or re-scores a member; returns how many members were new
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64>;

    async fn zremrangebyscore(&self, key: &str, range: ScoreRange) -> Result<u64>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    // Members by rank, lowest score first
    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    fn pool_stats(&self) -> PoolStats;

    // Drops idle connections and refuses new checkouts
    async fn disconnect(&self);
}

/// Builds a fresh driver (and its pool) from configuration
#[async_trait]
pub trait DriverConnector: Send + Sync + Debug {
    async fn connect(&self, config: &KvClientConfig) -> Result<Arc<dyn StoreDriver>>;
}
