//! # Storefront Redis
//!
//! Redis implementation of [`ReservationLedger`](storefront_core::providers::ReservationLedger).
//!
//! # Key Layout
//!
//! - `product:{product_id}:inventory` (Hash) → slot index → `""` or user id
//! - `cart:{user_id}:{product_id}` (String) → quantity, with TTL
//!
//! Slot claims and releases run as Lua scripts so they are atomic on the
//! server. Cart line expiry is observed through keyspace notifications on
//! `__keyevent@{db}__:expired`, which requires `notify-keyspace-events` to
//! include `Ex` (see [`RedisLedgerConfig::enable_keyspace_events`]).
//!
//! # Example
//!
//! ```no_run
//! use storefront_redis::{RedisLedger, RedisLedgerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = RedisLedger::connect(&RedisLedgerConfig::new("redis://127.0.0.1:6379")).await?;
//! # Ok(())
//! # }
//! ```

mod ledger;

pub use ledger::{RedisLedger, RedisLedgerConfig};
