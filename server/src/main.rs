//! Storefront reservation server.
//!
//! Wires the cart service to Redis, `PostgreSQL` and Elasticsearch and keeps
//! the expiry reconciler running until shutdown.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use storefront_postgres::PostgresStockStore;
use storefront_redis::RedisLedger;
use storefront_runtime::metrics::MetricsServer;
use storefront_runtime::retry::retry_with_backoff;
use storefront_runtime::{CartService, InventoryService};
use storefront_search::ElasticsearchIndex;
use storefront_server::{Application, Config, shutdown_signal};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,storefront=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting storefront reservation server");

    let config = Config::from_env();
    info!(
        redis_url = %config.redis.url,
        postgres_url = %config.postgres.url,
        search_url = %config.search.url,
        scarcity_threshold = config.reservation.scarcity_threshold,
        cart_ttl_secs = config.reservation.cart_ttl,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr());
    metrics.start().context("Failed to start metrics exporter")?;
    info!(address = %metrics.addr(), "Metrics exporter listening");

    let retry = config.startup_retry();

    info!("Connecting to Redis reservation ledger...");
    let redis_config = config.redis_ledger();
    let ledger = retry_with_backoff(&retry, "connect_redis", || RedisLedger::connect(&redis_config))
        .await
        .context("Failed to connect to Redis")?;

    info!("Connecting to PostgreSQL stock store...");
    let stock = retry_with_backoff(&retry, "connect_postgres", || {
        PostgresStockStore::connect_with_timeout(
            &config.postgres.url,
            config.postgres.max_connections,
            Duration::from_secs(config.postgres.connect_timeout),
        )
    })
    .await
    .context("Failed to connect to PostgreSQL")?;

    if config.postgres.run_migrations {
        stock.migrate().await.context("Failed to run stock store migrations")?;
        info!("Stock store migrations applied");
    }

    let search = ElasticsearchIndex::new(config.elasticsearch()).context("Failed to build search client")?;

    let inventory = InventoryService::new(Arc::new(ledger), config.reservation());
    let carts = CartService::new(inventory, Arc::new(stock), Arc::new(search));

    let app = Application::new(carts, config.reconciler(), config.shutdown_timeout());
    app.run(shutdown_signal()).await;

    Ok(())
}
