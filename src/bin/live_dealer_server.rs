use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use live_dealer::server::{run_server, ServerConfig};
use live_dealer::EngineConfig;

const DEFAULT_BIND: &str = "127.0.0.1:4000";

#[derive(Debug, Parser)]
#[command(name = "live_dealer_server")]
#[command(about = "Run the live-dealer round engine and its operator API", long_about = None)]
struct Args {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "SERVER_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// SeaORM-compatible Postgres URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Redis URL for caches, locks, job queues and pub/sub
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Namespace prepended to every Redis key
    #[arg(long, env = "REDIS_PREFIX", default_value = "live")]
    redis_prefix: String,

    /// Pub/sub channel for table events
    #[arg(long, env = "BROADCAST_CHANNEL", default_value = "live:events")]
    broadcast_channel: String,

    /// Log table events instead of publishing them
    #[arg(long, env = "BROADCAST_LOG_ONLY", default_value_t = false)]
    log_broadcast: bool,

    /// Base URL of the upstream wallet API
    #[arg(long, env = "WALLET_API_URL")]
    wallet_api_url: String,

    /// Upstream wallet request timeout in milliseconds
    #[arg(long, env = "WALLET_TIMEOUT_MS", default_value_t = 5_000)]
    wallet_timeout_ms: u64,

    /// Betting window for tables without their own countdown, in seconds
    #[arg(long, env = "DEFAULT_COUNTDOWN_SECS", default_value_t = 15)]
    default_countdown_secs: u64,

    /// Settlement worker concurrency
    #[arg(long, env = "WORKER_CONCURRENCY", default_value_t = 16)]
    worker_concurrency: usize,

    /// Delivery attempts per settlement job
    #[arg(long, env = "JOB_ATTEMPTS", default_value_t = 5)]
    job_attempts: u32,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "SERVER_LOG_JSON", default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = Args::parse();
    init_tracing(args.json)?;
    run_server(build_config(args)).await
}

fn load_dotenv() {
    let manifest_env = env!("CARGO_MANIFEST_DIR");
    let manifest_env_path = PathBuf::from(manifest_env).join(".env");
    dotenv::from_filename(manifest_env_path).ok();
    dotenv::dotenv().ok();
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

fn build_config(args: Args) -> ServerConfig {
    let engine = EngineConfig {
        default_countdown: Duration::from_secs(args.default_countdown_secs),
        worker_concurrency: args.worker_concurrency,
        job_attempts: args.job_attempts,
        ..EngineConfig::default()
    };
    ServerConfig {
        bind: args.bind,
        database_url: args.database_url,
        redis_url: args.redis_url,
        redis_prefix: args.redis_prefix,
        broadcast_channel: (!args.log_broadcast).then_some(args.broadcast_channel),
        wallet_api_url: args.wallet_api_url,
        wallet_timeout: Duration::from_millis(args.wallet_timeout_ms),
        engine,
    }
}
