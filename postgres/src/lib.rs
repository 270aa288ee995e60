//! `PostgreSQL` stock store for the storefront reservation core.
//!
//! Stock is tracked per unit: every sellable item is a row in `stocks` with
//! status `AVAILABLE` or `SOLD`. [`PostgresStockStore`] answers the
//! [`StockStore`](storefront_core::providers::StockStore) question "how many
//! units are left" by counting the available rows of an enabled product.
//!
//! # Example
//!
//! ```no_run
//! use storefront_postgres::PostgresStockStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStockStore::connect("postgres://localhost/storefront", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod stock;

pub use stock::PostgresStockStore;
