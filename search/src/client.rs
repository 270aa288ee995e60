//! Elasticsearch document client.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use storefront_core::error::SearchIndexError;
use storefront_core::providers::SearchIndex;
use storefront_core::types::{ProductDocument, ProductId};

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for [`ElasticsearchIndex`].
#[derive(Clone, PartialEq, Eq)]
pub struct ElasticsearchConfig {
    /// Base URL, e.g. `http://localhost:9200`
    pub url: String,
    /// Index holding product documents
    pub index: String,
    /// Basic auth username
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for ElasticsearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchConfig")
            .field("url", &self.url)
            .field("index", &self.index)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ElasticsearchConfig {
    /// Unauthenticated settings for `index` at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index: index.into(),
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Authenticate with HTTP basic auth.
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// `GET _doc` response envelope.
#[derive(Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<ProductDocument>,
}

/// Product lookups against an Elasticsearch index.
#[derive(Clone, Debug)]
pub struct ElasticsearchIndex {
    client: Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchIndex {
    /// Build a client for the configured index.
    ///
    /// # Errors
    ///
    /// Returns [`SearchIndexError::Request`] if the HTTP client cannot be built.
    pub fn new(config: ElasticsearchConfig) -> Result<Self, SearchIndexError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SearchIndexError::Request(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Settings this client was built with.
    #[must_use]
    pub const fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    fn document_url(&self, product_id: ProductId) -> String {
        format!(
            "{}/{}/_doc/{product_id}",
            self.config.url.trim_end_matches('/'),
            self.config.index
        )
    }
}

impl SearchIndex for ElasticsearchIndex {
    async fn get_document(&self, product_id: ProductId) -> Result<Option<ProductDocument>, SearchIndexError> {
        let mut request = self.client.get(self.document_url(product_id));
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SearchIndexError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body = response
                    .json::<GetResponse>()
                    .await
                    .map_err(|e| SearchIndexError::Parse(e.to_string()))?;
                if body.found {
                    Ok(body.source)
                } else {
                    Ok(None)
                }
            }
            StatusCode::NOT_FOUND => {
                tracing::debug!(product_id = %product_id, index = %self.config.index, "Product document not found");
                Ok(None)
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(SearchIndexError::Status {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn document_url_tolerates_trailing_slash() {
        let index = ElasticsearchIndex::new(ElasticsearchConfig::new("http://es:9200/", "products")).unwrap();
        assert_eq!(index.document_url(ProductId(12)), "http://es:9200/products/_doc/12");
    }

    #[test]
    fn debug_redacts_password() {
        let config = ElasticsearchConfig::new("http://es:9200", "products").with_basic_auth("elastic", "s3cret");
        let debug = format!("{config:?}");
        assert!(debug.contains("elastic"));
        assert!(!debug.contains("s3cret"));
    }
}
