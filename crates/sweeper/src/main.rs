//! Scheduled worker entry point.
//!
//! Runs the three background loops of the saga engine: the compensation
//! sweep, the outbox publisher and the retention job, plus a periodic
//! status-gauge refresh. Multiple replicas may run side by side; the
//! distributed locks make sure each cycle executes on one of them.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use orchestrator::services::{
    HttpEventSink, HttpLedgerClient, HttpObjectStore, PgResourceStore, PgTenantDirectory,
};
use orchestrator::{
    CompensationSweep, OrchestratorConfig, OutboxPublisher, PostgresLockProvider, RetentionJob,
    metrics::refresh_status_gauges,
};
use saga_store::PostgresSagaStore;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn interval_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Expose Prometheus metrics
    let metrics_addr: SocketAddr = env_or("METRICS_ADDR", "0.0.0.0:9000")
        .parse()
        .expect("invalid METRICS_ADDR");
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("failed to install Prometheus recorder");

    // 3. Connect and migrate
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to database");

    let store = PostgresSagaStore::new(pool.clone());
    store.run_migrations().await.expect("migrations failed");

    // 4. Wire the engine
    let config = OrchestratorConfig::from_env();
    let locks = PostgresLockProvider::new(pool.clone());

    let object_store = HttpObjectStore::new(env_or("OBJECT_STORE_URL", "http://localhost:9010"))
        .expect("failed to build object store client");
    let ledger = HttpLedgerClient::new(env_or("LEDGER_URL", "http://localhost:9020"))
        .expect("failed to build ledger client");
    let sink = HttpEventSink::new(env_or("BROKER_INGEST_URL", "http://localhost:9030/events"))
        .expect("failed to build event sink");

    let sweep = CompensationSweep::new(
        store.clone(),
        object_store,
        ledger,
        PgResourceStore::new(pool.clone()),
        PgTenantDirectory::new(pool),
        locks.clone(),
        config.clone(),
    );
    let publisher = OutboxPublisher::new(store.clone(), sink, config.clone());
    let retention = RetentionJob::new(store.clone(), locks, config);

    // 5. Start the loops
    let sweep_every = interval_secs("SWEEP_INTERVAL_SECS", 60);
    let publish_every = interval_secs("PUBLISH_INTERVAL_SECS", 5);
    let retention_every = interval_secs("RETENTION_INTERVAL_SECS", 3600);
    let gauges_every = interval_secs("GAUGE_REFRESH_SECS", 30);
    tracing::info!(
        ?sweep_every,
        ?publish_every,
        ?retention_every,
        "sweeper starting"
    );

    let sweep_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweep_every);
        loop {
            tick.tick().await;
            if let Err(error) = sweep.run().await {
                tracing::error!(%error, "compensation sweep cycle failed");
            }
        }
    });

    let publish_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(publish_every);
        loop {
            tick.tick().await;
            if let Err(error) = publisher.publish_pending().await {
                tracing::error!(%error, "outbox publisher cycle failed");
            }
        }
    });

    let retention_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(retention_every);
        loop {
            tick.tick().await;
            if let Err(error) = retention.run().await {
                tracing::error!(%error, "retention cycle failed");
            }
        }
    });

    let gauge_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(gauges_every);
        loop {
            tick.tick().await;
            if let Err(error) = refresh_status_gauges(&store).await {
                tracing::error!(%error, "gauge refresh failed");
            }
        }
    });

    shutdown_signal().await;

    sweep_task.abort();
    publish_task.abort();
    retention_task.abort();
    gauge_task.abort();
    tracing::info!("sweeper shut down gracefully");
}
