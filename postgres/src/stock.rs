//! Stock counts backed by the `products` and `stocks` tables.

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use storefront_core::error::StockStoreError;
use storefront_core::providers::StockStore;
use storefront_core::types::{ProductId, StockSummary};

/// Default time to wait for a pooled connection.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const REMAINING_QUANTITY_SQL: &str = r"
    SELECT p.use_status,
           COUNT(s.id) FILTER (WHERE s.status = 'AVAILABLE') AS available
    FROM products p
    LEFT JOIN stocks s ON s.product_id = p.id
    WHERE p.id = $1
    GROUP BY p.id, p.use_status
";

/// `PostgreSQL`-based [`StockStore`].
///
/// Read-only: sales decrement stock elsewhere.
#[derive(Clone, Debug)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a fresh pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StockStoreError::Query`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StockStoreError> {
        Self::connect_with_timeout(database_url, max_connections, DEFAULT_ACQUIRE_TIMEOUT).await
    }

    /// Connect with an explicit connection acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StockStoreError::Query`] if the connection fails.
    pub async fn connect_with_timeout(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StockStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StockStoreError::Query(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected PostgreSQL stock store");
        Ok(Self::from_pool(pool))
    }

    /// Create the `products` and `stocks` tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`StockStoreError::Query`] if migration fails.
    pub async fn migrate(&self) -> Result<(), StockStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StockStoreError::Query(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl StockStore for PostgresStockStore {
    async fn remaining_quantity(&self, product_id: ProductId) -> Result<Option<StockSummary>, StockStoreError> {
        let id = i64::try_from(product_id.0)
            .map_err(|_| StockStoreError::Query(format!("Product id {product_id} out of range")))?;

        let row = sqlx::query(REMAINING_QUANTITY_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StockStoreError::Query(format!("Failed to count stock: {e}")))?;

        let Some(row) = row else {
            tracing::debug!(product_id = %product_id, "Product not found");
            return Ok(None);
        };

        let enabled: bool = row
            .try_get("use_status")
            .map_err(|e| StockStoreError::Query(format!("Failed to decode use_status: {e}")))?;
        if !enabled {
            tracing::debug!(product_id = %product_id, "Product disabled");
            return Ok(None);
        }

        let available: i64 = row
            .try_get("available")
            .map_err(|e| StockStoreError::Query(format!("Failed to decode stock count: {e}")))?;

        Ok(Some(StockSummary {
            product_id,
            available_quantity: u32::try_from(available).unwrap_or(u32::MAX),
        }))
    }
}
