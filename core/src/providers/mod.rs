//! Collaborator interfaces.
//!
//! The reservation core talks to three external services, each behind a
//! trait so the engine and orchestrator can be driven by in-memory backends
//! in tests and by Redis, `PostgreSQL` and Elasticsearch in production.
//!
//! ```text
//! ┌──────────────────┐      ┌────────────────────┐
//! │ Cart Orchestrator│─────▶│ Reservation Engine │
//! └───┬──────────┬───┘      └─────────┬──────────┘
//!     │          │                    │
//!     ▼          ▼                    ▼
//! ┌────────┐ ┌──────────┐      ┌─────────────────────┐
//! │ Stock  │ │ Search   │      │ Reservation Ledger  │
//! │ Store  │ │ Index    │      │ (pools, cart lines, │
//! └────────┘ └──────────┘      │  expiry events)     │
//!                              └─────────────────────┘
//! ```

pub mod ledger;
pub mod search;
pub mod stock;

pub use ledger::{ClearOutcome, ExpiryStream, ReservationLedger};
pub use search::SearchIndex;
pub use stock::StockStore;
