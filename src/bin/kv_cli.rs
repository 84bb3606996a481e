// src/bin/kv_cli.rs

#[macro_use]
extern crate prettytable;

use prettytable::Table;
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use health_monitor::health::gateway_status;
use health_monitor::storage::{Expiry, SetOptions};
use health_monitor::{KvClient, KvClientConfig, RateLimiter, RateLimiterConfig};

#[derive(Debug, StructOpt)]
#[structopt(name = "kv_cli", about = "One-shot commands against the health monitor store")]
struct Opt {
    /// Redis host
    #[structopt(long, default_value = "localhost")]
    host: String,

    /// Redis port
    #[structopt(long, default_value = "6379")]
    port: u16,

    /// Redis password
    #[structopt(long)]
    password: Option<String>,

    /// Redis database index
    #[structopt(long, default_value = "0")]
    db: i64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Read a key
    Get {
        key: String,
        /// Printed when the key is missing or the store is down
        #[structopt(long, default_value = "(nil)")]
        default: String,
    },
    /// Write a key
    Set {
        key: String,
        value: String,
        /// Expiry in seconds
        #[structopt(long)]
        ex: Option<u64>,
        /// Expiry in milliseconds
        #[structopt(long, conflicts_with = "ex")]
        px: Option<u64>,
        /// Only set if the key does not exist
        #[structopt(long)]
        nx: bool,
        /// Only set if the key exists
        #[structopt(long, conflicts_with = "nx")]
        xx: bool,
    },
    /// Increment a counter
    Incr {
        key: String,
        #[structopt(long, default_value = "1")]
        by: i64,
    },
    /// Delete keys
    Del { keys: Vec<String> },
    /// Check connectivity
    Ping,
    /// Show pool usage and health bookkeeping
    Stats,
    /// Show the gateway status report
    Status {
        #[structopt(long, default_value = "api-gateway")]
        service: String,
    },
    /// Simulate requests against the rate limiter
    Limit {
        /// Rate limit key, usually a client address
        #[structopt(default_value = "127.0.0.1")]
        key: String,
        #[structopt(short, long, default_value = "10")]
        limit: u64,
        /// Window duration in seconds
        #[structopt(short, long, default_value = "60")]
        window_seconds: u64,
        /// Number of requests to send
        #[structopt(short = "n", long, default_value = "15")]
        num_requests: usize,
        /// Time between requests in milliseconds
        #[structopt(short = "t", long, default_value = "0")]
        request_interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "kv_cli={},health_monitor={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = KvClientConfig {
        credential: opt.password.clone().filter(|p| !p.is_empty()),
        database_index: opt.db,
        ..KvClientConfig::new(opt.host.clone(), opt.port)
    };
    let client = Arc::new(KvClient::connect_redis(config).await?);

    let result = run_command(&opt.command, &client).await;
    client.close().await;
    result
}

async fn run_command(
    command: &Command,
    client: &Arc<KvClient>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Get { key, default } => {
            println!("{}", client.get_or(key, default.as_str()).await);
        }
        Command::Set {
            key,
            value,
            ex,
            px,
            nx,
            xx,
        } => {
            let options = SetOptions {
                expiry: ex.map(Expiry::Seconds).or(px.map(Expiry::Millis)),
                only_if_absent: *nx,
                only_if_present: *xx,
            };
            let applied = client.set(key, value, options).await;
            println!("{}", if applied { "OK" } else { "(not set)" });
        }
        Command::Incr { key, by } => match client.incr(key, *by).await {
            Some(value) => println!("{}", value),
            None => println!("(unavailable)"),
        },
        Command::Del { keys } => {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            println!("{}", client.delete(&keys).await);
        }
        Command::Ping => {
            let connected = client.ping().await;
            println!("{}", if connected { "PONG" } else { "DISCONNECTED" });
        }
        Command::Stats => {
            let stats = client.pool_stats();
            let health = client.health_snapshot().await;

            let mut table = Table::new();
            table.set_titles(row!["Metric", "Value"]);
            table.add_row(row!["target", client.config().target()]);
            table.add_row(row!["connected", health.connected]);
            table.add_row(row!["consecutive failures", health.consecutive_failures]);
            table.add_row(row!["available connections", stats.available]);
            table.add_row(row!["in use", stats.in_use]);
            table.add_row(row!["max connections", stats.max_connections]);
            table.printstd();
        }
        Command::Status { service } => {
            let status = gateway_status(client, service).await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Limit {
            key,
            limit,
            window_seconds,
            num_requests,
            request_interval_ms,
        } => {
            simulate_requests(
                client,
                key,
                *limit,
                *window_seconds,
                *num_requests,
                Duration::from_millis(*request_interval_ms),
            )
            .await;
        }
    }

    Ok(())
}

// Send a sequence of requests for one key and tabulate each decision
async fn simulate_requests(
    client: &Arc<KvClient>,
    key: &str,
    limit: u64,
    window_seconds: u64,
    num_requests: usize,
    interval: Duration,
) {
    let limiter = RateLimiter::new(Arc::clone(client), RateLimiterConfig::default());
    info!(key, limit, window_seconds, num_requests, "Starting rate limit simulation");

    let mut table = Table::new();
    table.set_titles(row!["#", "Decision", "Remaining", "Reset", "Note"]);

    let mut allowed_count = 0;
    let start_time = Instant::now();

    for i in 0..num_requests {
        let request_time = Instant::now();
        let status = limiter
            .check_rate_limit(key, Some(limit), Some(window_seconds))
            .await;

        if status.allowed {
            allowed_count += 1;
        } else {
            warn!(request = i + 1, "Request denied");
        }

        let decision = if status.allowed { "ALLOWED" } else { "DENIED" };
        let note = status.error.clone().unwrap_or_default();
        let n = i + 1;
        table.add_row(row![n, decision, status.remaining, status.reset, note]);

        let elapsed = request_time.elapsed();
        if elapsed < interval {
            time::sleep(interval - elapsed).await;
        }
    }

    table.printstd();
    println!("\nSimulation Results:");
    println!("-------------------");
    println!("Total requests: {}", num_requests);
    println!("Allowed: {}", allowed_count);
    println!("Denied: {}", num_requests - allowed_count);
    println!("Time elapsed: {:?}", start_time.elapsed());
}
