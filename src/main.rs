use std::sync::Arc;

use live_tracking::api;
use live_tracking::broker::RedisBroker;
use live_tracking::cache::RedisCache;
use live_tracking::config::{Config, LogFormat};
use live_tracking::error::AppError;
use live_tracking::persistence::MemoryPersistence;
use live_tracking::state::{AppState, Backends};
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

const RECONNECT_EXPONENT_BASE: u64 = 2;
const RECONNECT_FACTOR_MS: u64 = 100;
const RECONNECT_RETRIES: usize = 6;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let backends = match connect_redis(&config).await {
        Some((client, conn)) => Backends {
            shared_cache: Some(Arc::new(RedisCache::new(conn.clone()))),
            broker: Some(Arc::new(RedisBroker::new(client, conn))),
            sink: Arc::new(MemoryPersistence::new()),
        },
        None => Backends::in_memory(),
    };

    let shared_state = Arc::new(AppState::new(&config, backends));
    let shutdown = CancellationToken::new();
    let workers = shared_state.spawn_workers(shutdown.clone()).await;

    let app = api::rest::router(shared_state.clone()).layer(CorsLayer::permissive());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        distributed = shared_state.bridge.is_distributed(),
        "http server started"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")));

    shutdown.cancel();
    for worker in workers {
        if let Err(err) = worker.await {
            tracing::warn!(error = %err, "background worker ended abnormally");
        }
    }
    tracing::info!("shutdown complete");

    served
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::new(config.log_level.clone());

    match config.log_format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

/// `None` when Redis is not configured or not reachable in time; the server
/// then runs single-process.
async fn connect_redis(config: &Config) -> Option<(redis::Client, ConnectionManager)> {
    let url = config.redis_url.as_deref()?;

    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "invalid REDIS_URL; running single-process");
            return None;
        }
    };

    let connect = async {
        let mut conn = ConnectionManager::new_with_backoff_and_timeouts(
            client.clone(),
            RECONNECT_EXPONENT_BASE,
            RECONNECT_FACTOR_MS,
            RECONNECT_RETRIES,
            config.redis_response_timeout(),
            config.redis_connect_timeout(),
        )
        .await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok::<_, redis::RedisError>(conn)
    };

    match tokio::time::timeout(config.redis_connect_timeout(), connect).await {
        Ok(Ok(conn)) => {
            tracing::info!("connected to redis");
            Some((client, conn))
        }
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "redis unavailable; running single-process");
            None
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = config.redis_connect_timeout_secs,
                "redis connect timed out; running single-process"
            );
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
