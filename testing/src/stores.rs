//! In-memory stock store and search index.

use storefront_core::error::{SearchIndexError, StockStoreError};
use storefront_core::providers::{SearchIndex, StockStore};
use storefront_core::types::{ProductDocument, ProductId, StockSummary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// In-memory stock counts.
///
/// Products never registered with [`set_stock`](Self::set_stock) read as
/// unknown. Reads are counted so tests can assert the durable store was (or
/// was not) consulted.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    stock: Arc<RwLock<HashMap<ProductId, u32>>>,
    unavailable: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl InMemoryStockStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or overwrite) the remaining quantity of a product.
    pub fn set_stock(&self, product_id: ProductId, quantity: u32) {
        self.stock
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product_id, quantity);
    }

    /// Forget a product, as if it were disabled.
    pub fn remove(&self, product_id: ProductId) {
        self.stock
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&product_id);
    }

    /// Make every subsequent query fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `remaining_quantity` calls served so far.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl StockStore for InMemoryStockStore {
    async fn remaining_quantity(&self, product_id: ProductId) -> Result<Option<StockSummary>, StockStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StockStoreError::Query("connection refused".to_string()));
        }
        let stock = self.stock.read().unwrap_or_else(PoisonError::into_inner);
        Ok(stock.get(&product_id).map(|&available_quantity| StockSummary {
            product_id,
            available_quantity,
        }))
    }
}

/// In-memory product documents.
#[derive(Debug, Clone, Default)]
pub struct InMemorySearchIndex {
    documents: Arc<RwLock<HashMap<ProductId, ProductDocument>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySearchIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a document for a product.
    pub fn insert(&self, product_id: ProductId, document: ProductDocument) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product_id, document);
    }

    /// Make every subsequent lookup fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl SearchIndex for InMemorySearchIndex {
    async fn get_document(&self, product_id: ProductId) -> Result<Option<ProductDocument>, SearchIndexError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SearchIndexError::Status {
                status: 503,
                message: "index unavailable".to_string(),
            });
        }
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(&product_id).cloned())
    }
}
