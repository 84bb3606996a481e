// src/storage/redis.rs

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, ConnectionAddr, ConnectionInfo, FromRedisValue, RedisConnectionInfo};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{debug, info};

use crate::config::KvClientConfig;
use crate::error::{MonitorError, Result, StorageError};
use crate::storage::pool::{ConnectionPool, ManageConnection};
use crate::storage::{DriverConnector, Expiry, PoolStats, ScoreRange, SetOptions, StoreDriver};
use crate::storage_op;

/// Opens Redis connections for the pool
pub struct RedisConnectionManager {
    client: Client,
    connect_timeout: Duration,
    target: String,
}

impl RedisConnectionManager {
    pub fn new(config: &KvClientConfig) -> Result<Self> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: RedisConnectionInfo {
                db: config.database_index,
                password: config.credential.clone(),
                ..Default::default()
            },
        };

        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(info)
            .map_err(|e| MonitorError::Storage(StorageError::Connection(e.to_string())))?;

        Ok(Self {
            client,
            connect_timeout: config.connect_timeout,
            target: config.target(),
        })
    }
}

#[async_trait]
impl ManageConnection for RedisConnectionManager {
    type Connection = MultiplexedConnection;

    async fn connect(&self) -> Result<MultiplexedConnection> {
        let connection_future = self.client.get_multiplexed_async_connection();

        match time::timeout(self.connect_timeout, connection_future).await {
            Ok(result) => result.map_err(MonitorError::from),
            Err(_) => Err(MonitorError::Storage(StorageError::Timeout(format!(
                "Connection to Redis at {} timed out after {:?}",
                self.target, self.connect_timeout
            )))),
        }
    }
}

/// Pooled Redis driver with per-command deadlines
pub struct RedisDriver {
    pool: ConnectionPool<RedisConnectionManager>,
    socket_timeout: Duration,
    retry_on_timeout: bool,
    target: String,
}

// Manually implement Debug
impl fmt::Debug for RedisDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDriver")
            .field("target", &self.target)
            .field("pool", &self.pool)
            .finish()
    }
}

impl RedisDriver {
    /// Creates the driver and its (still empty) pool
    pub fn new(config: &KvClientConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config)?;
        let pool = ConnectionPool::new(manager, config.max_connections, config.socket_timeout);

        Ok(Self {
            pool,
            socket_timeout: config.socket_timeout,
            retry_on_timeout: config.retry_on_timeout,
            target: config.target(),
        })
    }

    async fn query<T>(&self, operation: &'static str, key: &str, cmd: &Cmd) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        let started = Instant::now();
        let mut result = self.query_once(cmd).await;

        if self.retry_on_timeout && matches!(&result, Err(e) if e.is_timeout()) {
            debug!(operation, key, "Redis command timed out, retrying once");
            result = self.query_once(cmd).await;
        }

        storage_op!(operation, key, result, started.elapsed().as_millis() as u64);
        result
    }

    async fn query_once<T>(&self, cmd: &Cmd) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        let mut conn = self.pool.get().await?;

        match time::timeout(self.socket_timeout, cmd.query_async(&mut *conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let err = MonitorError::from(e);
                if err.is_connectivity() {
                    conn.mark_broken();
                }
                Err(err)
            }
            Err(_) => {
                // A late reply would desynchronise this connection
                conn.mark_broken();
                Err(MonitorError::Storage(StorageError::Timeout(format!(
                    "Redis command timed out after {:?}",
                    self.socket_timeout
                ))))
            }
        }
    }
}

#[async_trait]
impl StoreDriver for RedisDriver {
    async fn ping(&self) -> Result<()> {
        let reply: String = self.query("PING", "", &redis::cmd("PING")).await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(MonitorError::Storage(StorageError::Command(format!(
                "Unexpected response from Redis PING: {}",
                reply
            ))))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query("GET", key, &cmd).await
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);

        match options.expiry {
            Some(Expiry::Seconds(secs)) => {
                cmd.arg("EX").arg(secs);
            }
            Some(Expiry::Millis(millis)) => {
                cmd.arg("PX").arg(millis);
            }
            None => {}
        }
        if options.only_if_absent {
            cmd.arg("NX");
        }
        if options.only_if_present {
            cmd.arg("XX");
        }

        // OK when written, nil when NX/XX skipped the write
        let reply: redis::Value = self.query("SET", key, &cmd).await?;
        Ok(!matches!(reply, redis::Value::Nil))
    }

    async fn incr(&self, key: &str, amount: i64) -> Result<i64> {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(key).arg(amount);
        self.query("INCRBY", key, &cmd).await
    }

    async fn del(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        self.query("DEL", &keys.join(","), &cmd).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64> {
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key).arg(score).arg(member);
        self.query("ZADD", key, &cmd).await
    }

    async fn zremrangebyscore(&self, key: &str, range: ScoreRange) -> Result<u64> {
        let (min, max) = range.to_redis_args();
        let mut cmd = redis::cmd("ZREMRANGEBYSCORE");
        cmd.arg(key).arg(min).arg(max);
        self.query("ZREMRANGEBYSCORE", key, &cmd).await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut cmd = redis::cmd("ZCARD");
        cmd.arg(key);
        self.query("ZCARD", key, &cmd).await
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        let mut cmd = redis::cmd("ZRANGE");
        cmd.arg(key).arg(start).arg(stop).arg("WITHSCORES");
        self.query("ZRANGE", key, &cmd).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        // EXPIRE has whole-second resolution; never round a live key down to 0
        let secs = ttl.as_secs().max(1);
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(secs);
        self.query("EXPIRE", key, &cmd).await
    }

    fn pool_stats(&self) -> PoolStats {
        self.pool.state()
    }

    async fn disconnect(&self) {
        self.pool.close();
        info!(target_addr = %self.target, "Redis connection pool disconnected");
    }
}

/// Production connector: builds a [`RedisDriver`] per (re)connect
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

#[async_trait]
impl DriverConnector for RedisConnector {
    async fn connect(&self, config: &KvClientConfig) -> Result<Arc<dyn StoreDriver>> {
        let driver = RedisDriver::new(config)?;
        Ok(Arc::new(driver))
    }
}
