//! Storefront server wiring.
//!
//! The binary (`storefront`) loads [`config::Config`], connects the Redis
//! ledger, the `PostgreSQL` stock store and the Elasticsearch index, then runs
//! an [`lifecycle::Application`] until Ctrl+C or SIGTERM.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod lifecycle;

pub use config::Config;
pub use lifecycle::{Application, ShutdownOutcome, shutdown_signal};
