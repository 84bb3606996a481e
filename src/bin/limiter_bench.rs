// src/bin/limiter_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::Barrier;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use health_monitor::{KvClient, KvClientConfig, RateLimiter, RateLimiterConfig};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "limiter_bench",
    about = "Measures sliding window accuracy under contention on a single key"
)]
struct Opt {
    /// Redis host
    #[structopt(long, default_value = "localhost")]
    host: String,

    /// Redis port
    #[structopt(long, default_value = "6379")]
    port: u16,

    /// Key every worker competes for
    #[structopt(short, long, default_value = "bench_key")]
    key: String,

    /// Limit per window
    #[structopt(short, long, default_value = "100")]
    limit: u64,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Number of concurrent workers
    #[structopt(short = "c", long, default_value = "20")]
    concurrency: usize,

    /// Requests per worker
    #[structopt(short = "r", long, default_value = "50")]
    requests_per_worker: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Connection pool size
    #[structopt(long, default_value = "50")]
    max_connections: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,
}

#[derive(Debug, Default)]
struct IterationResult {
    allowed: u64,
    denied: u64,
    failed_open: u64,
    elapsed: Duration,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "limiter_bench={},health_monitor={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let config = KvClientConfig {
        max_connections: opt.max_connections,
        ..KvClientConfig::new(opt.host.clone(), opt.port)
    };
    let client = Arc::new(KvClient::connect_redis(config).await?);
    if !client.is_connected().await {
        warn!("Store unavailable, every request will fail open");
    }

    let limiter = Arc::new(RateLimiter::new(
        Arc::clone(&client),
        RateLimiterConfig {
            key_prefix: "rate_limit_bench".to_string(),
            ..RateLimiterConfig::default()
        },
    ));
    let store_key = format!("{}:{}", limiter.config().key_prefix, opt.key);

    let mut results = Vec::with_capacity(opt.iterations);
    for iteration in 0..opt.iterations {
        if stop.load(Ordering::SeqCst) {
            warn!("Interrupted, skipping remaining iterations");
            break;
        }

        // Each iteration starts from an empty window
        client.delete(&[store_key.as_str()]).await;

        info!(iteration = iteration + 1, "Running iteration");
        let result = run_iteration(&opt, &limiter, &stop).await?;
        results.push(result);
    }

    print_report(&opt, &results, &client);
    client.delete(&[store_key.as_str()]).await;
    client.close().await;
    Ok(())
}

async fn run_iteration(
    opt: &Opt,
    limiter: &Arc<RateLimiter>,
    stop: &Arc<AtomicBool>,
) -> Result<IterationResult, Box<dyn std::error::Error>> {
    let total = (opt.concurrency * opt.requests_per_worker) as u64;
    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let allowed = Arc::new(AtomicU64::new(0));
    let denied = Arc::new(AtomicU64::new(0));
    let failed_open = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(opt.concurrency));

    let start = Instant::now();
    let mut handles = Vec::with_capacity(opt.concurrency);
    for _ in 0..opt.concurrency {
        let limiter = Arc::clone(limiter);
        let barrier = Arc::clone(&barrier);
        let stop = Arc::clone(stop);
        let progress = progress.clone();
        let (allowed, denied, failed_open) = (
            Arc::clone(&allowed),
            Arc::clone(&denied),
            Arc::clone(&failed_open),
        );
        let key = opt.key.clone();
        let (limit, window, requests) = (opt.limit, opt.window_seconds, opt.requests_per_worker);

        handles.push(tokio::spawn(async move {
            // Release every worker at once to maximise contention
            barrier.wait().await;

            for _ in 0..requests {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let status = limiter.check_rate_limit(&key, Some(limit), Some(window)).await;
                if status.error.is_some() {
                    failed_open.fetch_add(1, Ordering::Relaxed);
                }
                if status.allowed {
                    allowed.fetch_add(1, Ordering::Relaxed);
                } else {
                    denied.fetch_add(1, Ordering::Relaxed);
                }
                progress.inc(1);
            }
        }));
    }

    for result in futures::future::join_all(handles).await {
        result?;
    }
    progress.finish_with_message("done");

    Ok(IterationResult {
        allowed: allowed.load(Ordering::SeqCst),
        denied: denied.load(Ordering::SeqCst),
        failed_open: failed_open.load(Ordering::SeqCst),
        elapsed: start.elapsed(),
    })
}

fn print_report(opt: &Opt, results: &[IterationResult], client: &KvClient) {
    println!("\nContention Benchmark Results:");
    println!("-----------------------------");
    println!(
        "Key: {} | limit {} per {}s | {} workers x {} requests",
        opt.key, opt.limit, opt.window_seconds, opt.concurrency, opt.requests_per_worker
    );

    for (i, result) in results.iter().enumerate() {
        let total = result.allowed + result.denied;
        let overshoot = result.allowed.saturating_sub(opt.limit);
        let throughput = total as f64 / result.elapsed.as_secs_f64().max(f64::EPSILON);
        println!(
            "Iteration {}: allowed {}, denied {}, over limit {}, failed open {}, {:.0} req/s ({:?})",
            i + 1,
            result.allowed,
            result.denied,
            overshoot,
            result.failed_open,
            throughput,
            result.elapsed
        );
    }

    let stats = client.pool_stats();
    println!(
        "Pool: {} idle, {} in use, {} max",
        stats.available, stats.in_use, stats.max_connections
    );
}
