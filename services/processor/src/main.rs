use anyhow::{Context, Result};
use axum::{routing::get, Router};
use backend::{
    config::FanoutMode,
    fanout::{FanoutHub, Publisher, RedisPublisher},
    services::{LedgerServices, Stores},
};
use processor::{
    config::Config, retry_strategy::RetryStrategy, CashbackExpiry, CircuitBreaker, PeriodicJob,
    Reconciler, RetrySweeper, Scheduler,
};
use shared::{FANOUT_PUBLISH_BUFFER, WS_OUTBOUND_BUFFER};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging with JSON formatting (configurable via env)
    let use_json = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .eq_ignore_ascii_case("json");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "processor=info,backend=info".into());

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        service = "processor",
        version = env!("CARGO_PKG_VERSION"),
        log_format = if use_json { "json" } else { "text" },
        "Starting processor service"
    );

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        sweep_interval_seconds = config.processor.sweep_interval_seconds,
        sweep_batch_size = config.processor.sweep_batch_size,
        fanout = ?config.fanout,
        "Configuration loaded"
    );

    // The backend owns migrations; wait for Postgres instead of failing fast
    let startup = RetryStrategy::default();
    let pool = startup
        .connect("postgres", || {
            PgPoolOptions::new()
                .max_connections(config.database.pool_size)
                .connect(&config.database.url)
        })
        .await
        .context("Failed to connect to Postgres")?;
    tracing::info!("Postgres connected");

    // Events raised by retried operations reach sockets only through the bridge
    let publisher: Arc<dyn Publisher> = match config.fanout {
        FanoutMode::Redis => {
            let client = redis::Client::open(config.redis.url.clone())?;
            let conn = startup
                .connect("redis", || client.get_connection_manager())
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!("Redis connected");
            Arc::new(RedisPublisher::spawn(conn, FANOUT_PUBLISH_BUFFER))
        }
        FanoutMode::Local => {
            tracing::warn!("FANOUT_MODE=local, events raised by the processor are not delivered");
            Arc::new(FanoutHub::new(WS_OUTBOUND_BUFFER))
        }
    };

    let services = LedgerServices::build(
        Stores::postgres(pool),
        publisher,
        config.ledger.accrual_settings(),
        config.retry.policy(),
    );

    // Shared by every job; they all hit the same store
    let breaker = CircuitBreaker::new(
        "ledger_store",
        config.processor.breaker_failure_threshold,
        config.processor.breaker_reset(),
    );

    let sweeper: Arc<dyn PeriodicJob> = Arc::new(RetrySweeper::new(
        services.retry.clone(),
        config.processor.sweep_batch_size,
    ));
    let expiry: Arc<dyn PeriodicJob> = Arc::new(CashbackExpiry::new(services.accrual.clone()));
    let reconciler: Arc<dyn PeriodicJob> = Arc::new(Reconciler::new(
        services.stores.ledger.clone(),
        services.retry.clone(),
        config.processor.reconcile_batch_size,
    ));
    let jobs: Vec<(Arc<dyn PeriodicJob>, Duration)> = vec![
        (sweeper, config.processor.sweep_interval()),
        (expiry, config.processor.expiry_interval()),
        (reconciler, config.processor.reconcile_interval()),
    ];

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();
    for (job, every) in jobs {
        let scheduler = Scheduler::new(job, every, breaker.clone());
        handles.push(tokio::spawn(scheduler.run(shutdown.clone())));
    }

    // Start metrics server
    let metrics_port = config.metrics_port;
    let metrics_handle = tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_port).await {
            tracing::error!(error = %e, "Metrics server stopped");
        }
    });

    tracing::info!(jobs = handles.len(), "Processor running");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // In-flight passes finish; leased rows are released by their lease expiry otherwise
    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Job task failed");
        }
    }
    metrics_handle.abort();

    tracing::info!("Processor stopped");

    Ok(())
}

async fn start_metrics_server(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    let app = Router::new().route("/metrics", get(|| async move { handle.render() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Processor metrics listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
