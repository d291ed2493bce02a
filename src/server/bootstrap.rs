use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::{BroadcastGateway, LogBroadcast, RedisBroadcast};
use crate::cache::{KeyValueStore, RedisStore};
use crate::config::EngineConfig;
use crate::db::connect_to;
use crate::jobs::{
    JobQueue, JobWorker, RoundTimerHandler, SettlementProcessor, WorkerConfig, ROUND_TIMER_QUEUE,
    SETTLEMENT_QUEUE,
};
use crate::ledger::{LedgerStorage, SeaOrmLedgerStorage};
use crate::round::RoundController;
use crate::wallet::{ReqwestWalletApi, WalletApi};

use super::routes::{LiveDealerServer, ServerContext};

const LOG_TARGET: &str = "server::bootstrap";

pub struct ServerConfig {
    pub bind: SocketAddr,
    pub database_url: String,
    pub redis_url: String,
    pub redis_prefix: String,
    /// Pub/sub channel for table events; `None` only logs them.
    pub broadcast_channel: Option<String>,
    pub wallet_api_url: String,
    pub wallet_timeout: Duration,
    pub engine: EngineConfig,
}

/// Wire the stores, start the job workers and the outbox relay, and serve the
/// operator API until ctrl-c.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let db = connect_to(&config.database_url).await?;
    let ledger: Arc<dyn LedgerStorage> = Arc::new(SeaOrmLedgerStorage::new(db));

    let redis = Arc::new(
        RedisStore::new(&config.redis_url, config.redis_prefix.clone())
            .context("invalid REDIS_URL")?,
    );
    let store: Arc<dyn KeyValueStore> = redis.clone();
    let broadcast: Arc<dyn BroadcastGateway> = match &config.broadcast_channel {
        Some(channel) => Arc::new(RedisBroadcast::new(redis, channel.clone())),
        None => {
            warn!(target: LOG_TARGET, "no broadcast channel configured; events are only logged");
            Arc::new(LogBroadcast)
        }
    };
    let wallet: Arc<dyn WalletApi> = Arc::new(
        ReqwestWalletApi::new(&config.wallet_api_url, config.wallet_timeout)
            .context("failed to build wallet client")?,
    );

    let settlements = Arc::new(JobQueue::new(Arc::clone(&store), SETTLEMENT_QUEUE));
    let timers = Arc::new(JobQueue::new(Arc::clone(&store), ROUND_TIMER_QUEUE));

    let controller = Arc::new(RoundController::new(
        Arc::clone(&ledger),
        Arc::clone(&store),
        Arc::clone(&settlements),
        Arc::clone(&timers),
        Arc::clone(&broadcast),
        config.engine.clone(),
    ));
    let processor = Arc::new(SettlementProcessor::new(
        ledger,
        store,
        wallet,
        broadcast,
        config.engine.applied_marker_ttl,
    ));

    let shutdown = CancellationToken::new();
    let worker_config = WorkerConfig::from(&config.engine);
    let workers = vec![
        Arc::new(JobWorker::new(
            Arc::clone(&settlements),
            processor,
            worker_config,
        ))
        .spawn(shutdown.clone()),
        Arc::new(JobWorker::new(
            Arc::clone(&timers),
            Arc::new(RoundTimerHandler::new(Arc::clone(&controller))),
            worker_config,
        ))
        .spawn(shutdown.clone()),
        // Also picks up jobs staged before a restart.
        controller
            .outbox()
            .spawn(config.engine.relay_interval, shutdown.clone()),
    ];

    let server = LiveDealerServer::new(ServerContext {
        controller,
        queues: vec![settlements, timers],
    });
    let make_service = server.into_router().into_make_service();

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let local_addr = listener.local_addr()?;
    info!(
        target: LOG_TARGET,
        %local_addr,
        wallet = %config.wallet_api_url,
        "live dealer server listening"
    );

    let served = axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error");

    shutdown.cancel();
    for worker in workers {
        if let Err(err) = worker.await {
            warn!(target: LOG_TARGET, error = %err, "background task ended abnormally");
        }
    }
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target: LOG_TARGET,
            error = %err,
            "failed to install ctrl-c handler"
        );
    }
    info!(target: LOG_TARGET, "shutdown signal received");
}
