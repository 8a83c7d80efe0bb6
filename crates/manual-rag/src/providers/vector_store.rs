//! Similarity index trait: page-level records searchable by embedding distance

use async_trait::async_trait;

use crate::error::Result;
use crate::types::PassageRecord;

/// Trait for the semantic nearest-neighbour store
///
/// Implementations:
/// - `LocalSimilarityIndex`: in-process cosine search, persisted as JSON
///
/// Reads may run concurrently with each other and with `insert`; a record
/// inserted while a query is in flight need not be visible to that query.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Up to `k` records nearest to `text`, ordered by ascending distance.
    ///
    /// An empty index yields an empty list. Errors mean the index (or the
    /// embedding model behind it) could not be reached.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<PassageRecord>>;

    /// Insert records; returns how many were stored
    async fn insert(&self, records: Vec<PassageRecord>) -> Result<usize>;

    /// Get total number of records stored
    async fn len(&self) -> Result<usize>;

    /// Check if index is empty
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Get provider name for logging
    fn name(&self) -> &str;
}
