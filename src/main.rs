mod aggregation;
mod bus;
mod config;
mod db;
mod debounce;
mod error;
mod expiry;
mod middleware;
mod notification;
mod routes;
mod state;
#[cfg(test)]
mod testing;
mod websocket;
mod worker;

use aggregation::{AggregationWorker, RedisInAppDispatcher};
use anyhow::Context;
use bus::{
    EventBus, RedisStreamBus, RedisStreamConsumer, AGGREGATOR_QUEUE, COORDINATOR_QUEUE, FLUSH_TOPIC,
    RAW_TOPIC,
};
use config::{Config, Role};
use db::{create_pool, run_migrations};
use debounce::{DebounceCoordinator, RedisDebounceStore};
use expiry::{start_reconciliation, ExpiryListener, Outbox, Reconciler, RetryPolicy};
use notification::{NotificationRepository, NotificationStore};
use routes::create_router;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker::{PoolOptions, WorkerPool};

const READ_BLOCK: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,notification_digest=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(roles = ?config.roles, worker = %config.worker_id, "Starting notification digest service");

    tracing::info!("Connecting to database...");
    let db = create_pool(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    tracing::info!("Running migrations...");
    run_migrations(&db).await?;

    let redis_client = redis::Client::open(config.redis_url.as_str()).context("invalid REDIS_URL")?;

    let store: Arc<dyn NotificationStore> = Arc::new(NotificationRepository::new(db.clone()));
    let bus: Arc<dyn EventBus> = Arc::new(RedisStreamBus::connect(&redis_client, &config.stream_prefix).await?);
    let debounce = Arc::new(
        RedisDebounceStore::connect(redis_client.clone(), config.configure_keyspace_events).await?,
    );

    let mut tasks = JoinSet::new();

    if config.has_role(Role::Coordinator) {
        let consumer = RedisStreamConsumer::connect(
            &redis_client,
            &config.stream_prefix,
            RAW_TOPIC,
            COORDINATOR_QUEUE,
            &config.worker_id,
        )
        .await?;
        let coordinator = DebounceCoordinator::new(store.clone(), debounce.clone(), config.windows.clone());
        let pool = WorkerPool::new(
            Arc::new(consumer),
            Arc::new(coordinator),
            pool_options(&config, COORDINATOR_QUEUE),
        );
        tasks.spawn(pool.run());
    }

    if config.has_role(Role::Aggregator) {
        let consumer = RedisStreamConsumer::connect(
            &redis_client,
            &config.stream_prefix,
            FLUSH_TOPIC,
            AGGREGATOR_QUEUE,
            &config.worker_id,
        )
        .await?;
        let in_app = RedisInAppDispatcher::connect(&redis_client, &config.stream_prefix).await?;
        let aggregator = AggregationWorker::new(store.clone(), Arc::new(in_app), bus.clone());
        let pool = WorkerPool::new(
            Arc::new(consumer),
            Arc::new(aggregator),
            pool_options(&config, AGGREGATOR_QUEUE),
        );
        tasks.spawn(pool.run());
    }

    if config.has_role(Role::Listener) {
        tracing::warn!("Expiry listener enabled; exactly one instance must run this role");

        let outbox = Outbox::open(config.outbox_dir.clone()).await?;
        let listener = Arc::new(ExpiryListener::new(
            debounce.clone(),
            bus.clone(),
            outbox,
            RetryPolicy::default(),
        ));
        let reconciler = Reconciler::new(
            store.clone(),
            debounce.clone(),
            bus.clone(),
            config.windows.clone(),
            config.reconcile_grace,
        )
        .with_listener(listener.clone());

        start_reconciliation(Arc::new(reconciler), &config.reconcile_cron).await?;
        tasks.spawn(listener.run());
    }

    if config.has_role(Role::Api) {
        let ws_connections = websocket::ConnectionManager::new();
        tasks.spawn(websocket::run_in_app_relay(
            redis_client.clone(),
            config.stream_prefix.clone(),
            ws_connections.clone(),
        ));

        let state = AppState {
            notification_store: store.clone(),
            ws_connections,
        };
        let app = create_router(state);

        let addr = format!("{}:{}", config.host, config.port);
        tracing::info!("Server starting on http://{}", addr);
        tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tasks.spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP server error: {:?}", e);
            }
        });
    }

    if tasks.is_empty() {
        anyhow::bail!("no roles enabled");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
        Some(finished) = tasks.join_next() => {
            if let Err(e) = finished {
                tracing::error!("Role task failed: {:?}", e);
            }
            tracing::error!("A role task exited unexpectedly, shutting down");
        }
    }

    tasks.shutdown().await;
    Ok(())
}

fn pool_options(config: &Config, name: &str) -> PoolOptions {
    PoolOptions {
        name: name.to_string(),
        concurrency: config.worker_concurrency,
        deadline: config.handler_deadline,
        block: READ_BLOCK,
    }
}
