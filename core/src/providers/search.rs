//! Search index trait (read path only).

use crate::error::SearchIndexError;
use crate::types::{ProductDocument, ProductId};
use std::future::Future;

/// Product documents used to enrich cart listings.
pub trait SearchIndex: Send + Sync {
    /// Fetch the indexed document for a product.
    ///
    /// # Returns
    ///
    /// `None` if the product is not indexed.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response cannot be decoded.
    fn get_document(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<ProductDocument>, SearchIndexError>> + Send;
}
