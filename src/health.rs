// src/health.rs
//! Liveness, readiness and status reports for the gateway and the worker.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::algorithms::sliding_window::now_secs;
use crate::algorithms::RateLimiter;
use crate::client::KvClient;
use crate::middleware::{
    Handler, MiddlewareChain, RateLimitInterceptor, RequestContext, Response, TraceIdInterceptor,
};
use crate::scheduler::{ActivityClock, TaskScheduler};
use crate::storage::PoolStats;

pub const TOTAL_REQUESTS_KEY: &str = "api:total_requests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Alive,
    Ready,
    NotReady,
    Running,
}

#[derive(Debug, Clone, Serialize)]
pub struct Liveness {
    pub status: ProbeStatus,
    pub service: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub status: ProbeStatus,
    pub service: String,
    pub store_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_task_seconds_ago: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: f64,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.status == ProbeStatus::Ready
    }

    /// 200 when ready, 503 otherwise
    pub fn http_status(&self) -> u16 {
        if self.is_ready() {
            200
        } else {
            503
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub status: ProbeStatus,
    pub service: String,
    pub store_connected: bool,
    pub total_requests: i64,
    pub pool: PoolStats,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub status: ProbeStatus,
    pub service: String,
    pub store_connected: bool,
    pub last_task_seconds_ago: f64,
    pub task_stats: BTreeMap<String, u64>,
    pub timestamp: f64,
}

pub fn liveness(service: &str) -> Liveness {
    Liveness {
        status: ProbeStatus::Alive,
        service: service.to_string(),
        timestamp: now_secs(),
    }
}

/// Ready while the store is reachable. With `store_required == false` the
/// gateway also reports ready without a store, for local development.
pub async fn gateway_readiness(client: &KvClient, service: &str, store_required: bool) -> Readiness {
    let store_connected = client.is_connected().await;
    let ready = store_connected || !store_required;
    if !ready {
        warn!(service, "Gateway not ready: store unavailable");
    }

    Readiness {
        status: if ready {
            ProbeStatus::Ready
        } else {
            ProbeStatus::NotReady
        },
        service: service.to_string(),
        store_connected,
        last_task_seconds_ago: None,
        message: (!ready).then(|| "Store unavailable".to_string()),
        timestamp: now_secs(),
    }
}

/// Ready while the last processed task is younger than `ready_window`
pub async fn worker_readiness(
    client: &KvClient,
    clock: &ActivityClock,
    service: &str,
    ready_window: Duration,
) -> Readiness {
    let store_connected = client.is_connected().await;
    let since_last = clock.elapsed();
    let ready = since_last < ready_window;

    Readiness {
        status: if ready {
            ProbeStatus::Ready
        } else {
            ProbeStatus::NotReady
        },
        service: service.to_string(),
        store_connected,
        last_task_seconds_ago: Some(round_secs(since_last)),
        message: (!ready).then(|| "No recent task processing".to_string()),
        timestamp: now_secs(),
    }
}

/// Counts this call in `api:total_requests` and reports the running total,
/// or 0 when the store is unavailable.
pub async fn gateway_status(client: &KvClient, service: &str) -> GatewayStatus {
    let store_connected = client.is_connected().await;
    let total_requests = if store_connected {
        client.incr(TOTAL_REQUESTS_KEY, 1).await.unwrap_or_else(|| {
            error!("Failed to increment request counter");
            0
        })
    } else {
        0
    };

    GatewayStatus {
        status: ProbeStatus::Running,
        service: service.to_string(),
        store_connected,
        total_requests,
        pool: client.pool_stats(),
        timestamp: now_secs(),
    }
}

pub async fn worker_status(scheduler: &TaskScheduler, service: &str) -> WorkerStatus {
    let store_connected = scheduler.client().is_connected().await;
    let task_stats = if store_connected {
        scheduler.task_stats().await
    } else {
        BTreeMap::new()
    };

    WorkerStatus {
        status: ProbeStatus::Running,
        service: service.to_string(),
        store_connected,
        last_task_seconds_ago: round_secs(scheduler.clock().elapsed()),
        task_stats,
        timestamp: now_secs(),
    }
}

/// Serves the gateway endpoints: `/health`, `/ready` and `/api/status`
#[derive(Debug)]
pub struct GatewayHandler {
    client: Arc<KvClient>,
    service: String,
    store_required: bool,
}

impl GatewayHandler {
    pub fn new(client: Arc<KvClient>, service: impl Into<String>, store_required: bool) -> Self {
        Self {
            client,
            service: service.into(),
            store_required,
        }
    }
}

#[async_trait]
impl Handler for GatewayHandler {
    async fn handle(&self, request: &mut RequestContext) -> Response {
        match request.path.as_str() {
            "/health" => json_response(200, &liveness(&self.service)),
            "/ready" => {
                let readiness =
                    gateway_readiness(&self.client, &self.service, self.store_required).await;
                json_response(readiness.http_status(), &readiness)
            }
            "/api/status" => json_response(200, &gateway_status(&self.client, &self.service).await),
            path => {
                debug!(path, "No gateway route");
                Response::json(404, json!({ "error": "Not Found", "path": path }))
            }
        }
    }
}

/// Trace ids outermost, then the rate limit keyed by client identifier,
/// then the gateway routes.
pub fn gateway_chain(
    client: Arc<KvClient>,
    limiter: Arc<RateLimiter>,
    service: &str,
    store_required: bool,
) -> MiddlewareChain {
    let limit = limiter.config().default_limit;
    let window = limiter.config().default_window_secs;

    MiddlewareChain::new(Arc::new(GatewayHandler::new(client, service, store_required)))
        .with(Arc::new(TraceIdInterceptor))
        .with(Arc::new(RateLimitInterceptor::new(limiter, limit, window)))
}

fn json_response<T: Serialize>(status: u16, report: &T) -> Response {
    match serde_json::to_value(report) {
        Ok(body) => Response::json(status, body),
        Err(e) => {
            error!(error = %e, "Failed to serialize report");
            Response::json(500, json!({ "error": "Internal Server Error" }))
        }
    }
}

fn round_secs(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 100.0).round() / 100.0
}
