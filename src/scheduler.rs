// src/scheduler.rs
//! Background worker loop.
//!
//! Every `task_interval` the scheduler picks a task type, simulates the work,
//! and records the result in the store:
//!
//! - `worker:tasks:{type}`: per-type counter (INCR)
//! - `worker:last_task`: type of the most recent task
//! - `worker:last_task_time`: its completion time, Unix seconds
//!
//! Store writes are best effort. The in-process [`ActivityClock`] is updated
//! even when the store is down, so readiness reflects the loop itself.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::algorithms::sliding_window::now_secs;
use crate::client::KvClient;
use crate::config::SchedulerConfig;
use crate::storage::SetOptions;

pub const TASK_TYPES: [&str; 4] = [
    "data_processing",
    "cleanup",
    "health_check",
    "metrics_collection",
];

pub const LAST_TASK_KEY: &str = "worker:last_task";
pub const LAST_TASK_TIME_KEY: &str = "worker:last_task_time";

pub fn task_counter_key(task_type: &str) -> String {
    format!("worker:tasks:{}", task_type)
}

/// Time of the worker's most recent activity
#[derive(Debug)]
pub struct ActivityClock {
    last: Mutex<Instant>,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClock {
    /// Starts at "now", so a fresh worker is ready until its first window lapses
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    pub fn record(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        let last = *self.last.lock().unwrap_or_else(PoisonError::into_inner);
        Instant::now().saturating_duration_since(last)
    }
}

/// Result of one processed task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub task_type: &'static str,
    pub processing_time: Duration,
    /// Whether the counters reached the store
    pub persisted: bool,
}

#[derive(Debug)]
pub struct TaskScheduler {
    client: Arc<KvClient>,
    clock: Arc<ActivityClock>,
    config: SchedulerConfig,
    cancel_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl TaskScheduler {
    pub fn new(client: Arc<KvClient>, config: SchedulerConfig) -> Self {
        Self {
            client,
            clock: Arc::new(ActivityClock::new()),
            config,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn clock(&self) -> Arc<ActivityClock> {
        Arc::clone(&self.clock)
    }

    pub fn client(&self) -> &Arc<KvClient> {
        &self.client
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Processes one task immediately
    pub async fn run_once(&self) -> TaskRecord {
        process_task(&self.client, &self.clock, self.config.max_processing).await
    }

    /// Spawns the interval loop. The first task runs one interval after start.
    pub fn start(&self) -> task::JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let clock = Arc::clone(&self.clock);
        let cancel_flag = Arc::clone(&self.cancel_flag);
        let running = Arc::clone(&self.running);
        let interval = self.config.task_interval;
        let max_processing = self.config.max_processing;

        cancel_flag.store(false, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);
        info!(
            interval_secs = interval.as_secs_f64(),
            "Scheduler started"
        );

        task::spawn(async move {
            let mut interval_timer = time::interval_at(Instant::now() + interval, interval);

            loop {
                if cancel_flag.load(Ordering::SeqCst) {
                    break;
                }

                interval_timer.tick().await;

                if cancel_flag.load(Ordering::SeqCst) {
                    break;
                }

                process_task(&client, &clock, max_processing).await;
            }

            running.store(false, Ordering::SeqCst);
            debug!("Scheduler task stopped");
        })
    }

    /// Stops the loop before its next task
    pub fn stop(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Per-type task counters; missing or unreadable counters count as 0
    pub async fn task_stats(&self) -> BTreeMap<String, u64> {
        let mut stats = BTreeMap::new();
        for task_type in TASK_TYPES {
            let count = self
                .client
                .get(&task_counter_key(task_type))
                .await
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(0);
            stats.insert(task_type.to_string(), count);
        }
        stats
    }
}

async fn process_task(
    client: &KvClient,
    clock: &ActivityClock,
    max_processing: Duration,
) -> TaskRecord {
    let task_type = TASK_TYPES[rand::random_range(0..TASK_TYPES.len())];
    let processing_time = max_processing.mul_f64(rand::random::<f64>());

    info!(task_type, "Processing task");
    if !processing_time.is_zero() {
        time::sleep(processing_time).await;
    }

    let persisted = persist_task(client, task_type).await;
    clock.record();

    info!(
        task_type,
        processing_secs = processing_time.as_secs_f64(),
        persisted,
        "Task completed"
    );

    TaskRecord {
        task_type,
        processing_time,
        persisted,
    }
}

async fn persist_task(client: &KvClient, task_type: &str) -> bool {
    if !client.is_connected().await {
        warn!(task_type, "Store unavailable, task result not recorded");
        return false;
    }

    if client.incr(&task_counter_key(task_type), 1).await.is_none() {
        error!(task_type, "Failed to update task counter");
        return false;
    }

    let timestamp = now_secs().to_string();
    client.set(LAST_TASK_KEY, task_type, SetOptions::default()).await
        && client
            .set(LAST_TASK_TIME_KEY, &timestamp, SetOptions::default())
            .await
}
