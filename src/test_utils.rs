// src/test_utils.rs

use super::config::KvClientConfig;
use super::error::{MonitorError, Result, StorageError};
use super::storage::{DriverConnector, PoolStats, ScoreRange, SetOptions, StoreDriver};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the mock should fail data commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    None,
    /// Looks like a dropped socket
    Connection,
    /// Looks like a WRONGTYPE style reply
    Protocol,
}

#[derive(Debug, Default)]
struct MockData {
    strings: HashMap<String, String>,
    sorted_sets: HashMap<String, Vec<(String, f64)>>,
    ttls: HashMap<String, Duration>,
}

impl MockData {
    fn exists(&self, key: &str) -> bool {
        self.strings.contains_key(key) || self.sorted_sets.contains_key(key)
    }
}

/// Mock implementation of the StoreDriver trait for testing
#[derive(Debug)]
pub struct MockDriver {
    data: Mutex<MockData>,
    ping_fails: AtomicBool,
    failure_mode: Mutex<FailureMode>,
    pings: AtomicUsize,
    commands: AtomicUsize,
    disconnects: AtomicUsize,
    max_connections: usize,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(MockData::default()),
            ping_fails: AtomicBool::new(false),
            failure_mode: Mutex::new(FailureMode::None),
            pings: AtomicUsize::new(0),
            commands: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            max_connections: 10,
        }
    }

    pub fn set_ping_failure(&self, fail: bool) {
        self.ping_fails.store(fail, Ordering::SeqCst);
    }

    pub fn set_failure_mode(&self, mode: FailureMode) {
        *self.failure_mode.lock().unwrap() = mode;
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Data commands that reached the mock (PING excluded)
    pub fn command_count(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn raw_get(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().strings.get(key).cloned()
    }

    pub fn members(&self, key: &str) -> Vec<(String, f64)> {
        self.data
            .lock()
            .unwrap()
            .sorted_sets
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.data.lock().unwrap().ttls.get(key).copied()
    }

    /// Seeds a sorted set directly, bypassing the client
    pub fn insert_member(&self, key: &str, member: &str, score: f64) {
        let mut data = self.data.lock().unwrap();
        let set = data.sorted_sets.entry(key.to_string()).or_default();
        set.push((member.to_string(), score));
        set.sort_by(|a, b| a.1.total_cmp(&b.1));
    }

    fn begin_command(&self) -> Result<()> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        match *self.failure_mode.lock().unwrap() {
            FailureMode::None => Ok(()),
            FailureMode::Connection => Err(MonitorError::Storage(StorageError::Connection(
                "Mock connection reset".to_string(),
            ))),
            FailureMode::Protocol => Err(MonitorError::Storage(StorageError::Command(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            ))),
        }
    }
}

#[async_trait]
impl StoreDriver for MockDriver {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.ping_fails.load(Ordering::SeqCst) {
            return Err(MonitorError::Storage(StorageError::Connection(
                "Mock Redis failure".to_string(),
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.begin_command()?;
        Ok(self.data.lock().unwrap().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool> {
        self.begin_command()?;
        let mut data = self.data.lock().unwrap();
        let exists = data.exists(key);
        if (options.only_if_absent && exists) || (options.only_if_present && !exists) {
            return Ok(false);
        }
        data.strings.insert(key.to_string(), value.to_string());
        match options.expiry {
            Some(crate::storage::Expiry::Seconds(secs)) => {
                data.ttls.insert(key.to_string(), Duration::from_secs(secs));
            }
            Some(crate::storage::Expiry::Millis(millis)) => {
                data.ttls.insert(key.to_string(), Duration::from_millis(millis));
            }
            None => {
                data.ttls.remove(key);
            }
        }
        Ok(true)
    }

    async fn incr(&self, key: &str, amount: i64) -> Result<i64> {
        self.begin_command()?;
        let mut data = self.data.lock().unwrap();
        let current = match data.strings.get(key) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                MonitorError::Storage(StorageError::Command(
                    "ERR value is not an integer or out of range".to_string(),
                ))
            })?,
            None => 0,
        };
        let next = current + amount;
        data.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn del(&self, keys: &[&str]) -> Result<u64> {
        self.begin_command()?;
        let mut data = self.data.lock().unwrap();
        let mut removed = 0;
        for key in keys {
            let had_string = data.strings.remove(*key).is_some();
            let had_set = data.sorted_sets.remove(*key).is_some();
            data.ttls.remove(*key);
            if had_string || had_set {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64> {
        self.begin_command()?;
        let mut data = self.data.lock().unwrap();
        let set = data.sorted_sets.entry(key.to_string()).or_default();
        let added = match set.iter_mut().find(|(existing, _)| existing == member) {
            Some(entry) => {
                entry.1 = score;
                0
            }
            None => {
                set.push((member.to_string(), score));
                1
            }
        };
        set.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(added)
    }

    async fn zremrangebyscore(&self, key: &str, range: ScoreRange) -> Result<u64> {
        self.begin_command()?;
        let mut data = self.data.lock().unwrap();
        let Some(set) = data.sorted_sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(_, score)| !range.contains(*score));
        let removed = (before - set.len()) as u64;
        if set.is_empty() {
            data.sorted_sets.remove(key);
            data.ttls.remove(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.begin_command()?;
        let data = self.data.lock().unwrap();
        Ok(data.sorted_sets.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        self.begin_command()?;
        let data = self.data.lock().unwrap();
        let Some(set) = data.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let len = set.len() as isize;
        let resolve = |index: isize| if index < 0 { len + index } else { index };
        let (start, stop) = (resolve(start).max(0), resolve(stop).min(len - 1));
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(set[start as usize..=stop as usize].to_vec())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.begin_command()?;
        let mut data = self.data.lock().unwrap();
        if !data.exists(key) {
            return Ok(false);
        }
        data.ttls.insert(key.to_string(), ttl);
        Ok(true)
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            available: 1,
            in_use: 0,
            max_connections: self.max_connections,
        }
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector that always hands out the same [`MockDriver`], so data written
/// before a reconnect is still there afterwards, like a real server.
#[derive(Debug)]
pub struct MockConnector {
    driver: Arc<MockDriver>,
    attempts: AtomicUsize,
    fail_connect: AtomicBool,
}

impl MockConnector {
    pub fn new(driver: Arc<MockDriver>) -> Self {
        Self {
            driver,
            attempts: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
        }
    }

    pub fn set_connect_failure(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Initial connect plus every reconnect
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverConnector for MockConnector {
    async fn connect(&self, _config: &KvClientConfig) -> Result<Arc<dyn StoreDriver>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(MonitorError::Storage(StorageError::Connection(
                "Mock connect refused".to_string(),
            )));
        }
        Ok(Arc::clone(&self.driver) as Arc<dyn StoreDriver>)
    }
}

/// Config with a long probe interval, so only the first check pings
pub fn test_client_config() -> KvClientConfig {
    KvClientConfig {
        health_check_interval: Duration::from_secs(30),
        socket_timeout: Duration::from_millis(200),
        connect_timeout: Duration::from_millis(200),
        ..KvClientConfig::default()
    }
}

/// Builds a connected client over a fresh mock; returns all three handles
pub async fn create_test_client() -> (
    Arc<crate::client::KvClient>,
    Arc<MockDriver>,
    Arc<MockConnector>,
) {
    create_test_client_with(test_client_config()).await
}

pub async fn create_test_client_with(
    config: KvClientConfig,
) -> (
    Arc<crate::client::KvClient>,
    Arc<MockDriver>,
    Arc<MockConnector>,
) {
    let driver = Arc::new(MockDriver::new());
    let connector = Arc::new(MockConnector::new(Arc::clone(&driver)));
    let client = crate::client::KvClient::connect(
        config,
        Arc::clone(&connector) as Arc<dyn DriverConnector>,
    )
    .await
    .expect("test config is valid");
    (Arc::new(client), driver, connector)
}
