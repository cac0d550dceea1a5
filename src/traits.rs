//! Seams between the pipeline and its collaborators

use async_trait::async_trait;
use url::Url;

use crate::error::ScrapeError;
use crate::models::{ProductId, ProductResult};

/// Fetches a page body over HTTP
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET `url` and return the body text
    ///
    /// # Errors
    /// * [`ScrapeError::Transport`] for network failures
    /// * [`ScrapeError::HttpStatus`] for non-2xx responses
    async fn fetch(&self, url: &Url) -> Result<String, ScrapeError>;
}

/// Durable store of raw product payloads keyed by (identifier, source)
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Return the subset of `ids` already recorded under `source`
    ///
    /// Implementations answer with a single query, however many ids are asked for.
    async fn existing_ids(&self, ids: &[String], source: &str) -> Result<Vec<String>, ScrapeError>;

    /// Record a raw payload; returns rows affected
    ///
    /// A row already present for (id, source) yields `Ok(0)`, not an error.
    async fn insert(&self, id: &ProductId, source: &str, raw: &str) -> Result<u64, ScrapeError>;
}

/// Consumer of completed product fetches
#[async_trait]
pub trait ProductSink: Send + Sync {
    /// Take ownership of one result; `Ok(true)` when it was newly stored
    async fn accept(&self, result: ProductResult) -> Result<bool, ScrapeError>;
}
