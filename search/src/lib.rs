//! Elasticsearch implementation of the storefront
//! [`SearchIndex`](storefront_core::providers::SearchIndex).
//!
//! Cart views show product name, prices and brand. Those come from the
//! product search index, read one document at a time with
//! `GET {url}/{index}/_doc/{product_id}`.
//!
//! # Example
//!
//! ```no_run
//! use storefront_core::ProductId;
//! use storefront_core::providers::SearchIndex;
//! use storefront_search::{ElasticsearchConfig, ElasticsearchIndex};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let index = ElasticsearchIndex::new(ElasticsearchConfig::new("http://localhost:9200", "products"))?;
//! let document = index.get_document(ProductId(1)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;

pub use client::{ElasticsearchConfig, ElasticsearchIndex};
