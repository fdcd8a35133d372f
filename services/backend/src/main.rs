use anyhow::Context;
use axum::{routing::get, Router};
use backend::{
    build_router,
    config::{Config, FanoutMode},
    fanout::{run_redis_bridge, FanoutHub, Publisher, RedisPublisher, RedisSessionAuthenticator},
    services::{LedgerServices, Stores},
    state::AppState,
};
use shared::{FANOUT_PUBLISH_BUFFER, WS_OUTBOUND_BUFFER};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BRIDGE_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with JSON formatting (configurable via env)
    let use_json = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| "text".to_string())
        .eq_ignore_ascii_case("json");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "backend=info,tower_http=info".into());

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
        service = "backend",
        version = env!("CARGO_PKG_VERSION"),
        log_format = if use_json { "json" } else { "text" },
        "Starting backend service"
    );

    // Load configuration
    let config = Config::load()?;
    tracing::info!(fanout = ?config.fanout, operator = %config.ledger.operator, "Configuration loaded");

    // Initialize Postgres
    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to Postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Postgres connected, migrations applied");

    // Initialize Redis connection
    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis_conn = redis_client.get_connection_manager().await?;
    tracing::info!("Redis connected");

    let hub = Arc::new(FanoutHub::new(WS_OUTBOUND_BUFFER));
    let publisher: Arc<dyn Publisher> = match config.fanout {
        FanoutMode::Local => hub.clone(),
        FanoutMode::Redis => {
            tokio::spawn(bridge_loop(redis_client.clone(), hub.clone()));
            Arc::new(RedisPublisher::spawn(redis_conn.clone(), FANOUT_PUBLISH_BUFFER))
        }
    };

    let services = LedgerServices::build(
        Stores::postgres(pool.clone()),
        publisher,
        config.accrual_settings(),
        config.retry.policy(),
    );
    let sessions = Arc::new(RedisSessionAuthenticator::new(redis_conn.clone()));

    // Initialize application state
    let app_state = AppState::new(config.clone(), services, hub, sessions)
        .with_database(pool)
        .with_redis(redis_conn);

    let app = build_router(app_state);

    // Start metrics server
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_port).await {
            tracing::error!(error = %e, "Metrics server stopped");
        }
    });

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("Backend API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Backend stopped");
    Ok(())
}

/// Keeps the Redis subscription alive for the lifetime of the process
async fn bridge_loop(client: redis::Client, hub: Arc<FanoutHub>) {
    loop {
        if let Err(e) = run_redis_bridge(client.clone(), hub.clone()).await {
            tracing::error!(error = %e, "Fan-out bridge failed");
        }
        tokio::time::sleep(BRIDGE_RECONNECT_DELAY).await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    let app = Router::new().route("/metrics", get(|| async move { handle.render() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
