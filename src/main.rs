use dotenv::dotenv;
use health_monitor::health::{gateway_chain, worker_readiness, worker_status};
use health_monitor::middleware::RequestContext;
use health_monitor::scheduler::TaskScheduler;
use health_monitor::{init_logging, KvClient, RateLimiter, ServiceConfig};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        service = %config.service_name,
        environment = %config.environment,
        store = %config.store.target(),
        "Health monitor starting up"
    );
    debug!(?config, "Configuration loaded");

    let client = Arc::new(KvClient::connect_redis(config.store.clone()).await?);
    if !client.is_connected().await {
        warn!("Store unavailable at startup, continuing in degraded mode");
    }

    let limiter = Arc::new(RateLimiter::new(
        Arc::clone(&client),
        config.rate_limit.clone(),
    ));
    let scheduler = TaskScheduler::new(Arc::clone(&client), config.scheduler.clone());
    let worker = scheduler.start();

    let store_required = config.environment != "development";
    let gateway = gateway_chain(
        Arc::clone(&client),
        Arc::clone(&limiter),
        &config.service_name,
        store_required,
    );

    // Startup self-check through the same chain external probes go through
    let readiness = gateway
        .handle(RequestContext::new("GET", "/ready").with_peer_addr("127.0.0.1"))
        .await;
    info!(
        status = readiness.status,
        body = %readiness.body,
        trace_id = readiness.header("X-Trace-ID").unwrap_or_default(),
        rate_limit = limiter.config().default_limit,
        rate_window_secs = limiter.config().default_window_secs,
        "Gateway readiness"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    scheduler.stop();
    worker.abort();

    let worker_ready = worker_readiness(
        &client,
        &scheduler.clock(),
        &config.service_name,
        config.scheduler.ready_window,
    )
    .await;
    let status = worker_status(&scheduler, &config.service_name).await;
    info!(
        worker_ready = worker_ready.is_ready(),
        tasks = ?status.task_stats,
        "Final worker status"
    );

    client.close().await;
    info!("Health monitor stopped");
    Ok(())
}
