//! Local similarity index: cosine search over page embeddings, persisted as JSON

use async_trait::async_trait;
use futures_util::{future, stream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::PassageRecord;

use super::embedding::EmbeddingProvider;
use super::vector_store::SimilarityIndex;

const SNAPSHOT_VERSION: u32 = 1;

/// Pages embedded concurrently during insert
const EMBED_CONCURRENCY: usize = 4;

/// A record together with the embedding of its content
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedPassage {
    record: PassageRecord,
    embedding: Vec<f32>,
}

/// On-disk layout of the index
#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    version: u32,
    passages: Vec<IndexedPassage>,
}

/// In-process similarity index.
///
/// Queries take the read lock; `insert` embeds outside any lock and then takes
/// the write lock once per batch.
pub struct LocalSimilarityIndex {
    /// Embedding model shared with query-time embedding
    embedder: Arc<dyn EmbeddingProvider>,
    /// Indexed passages in insertion order
    passages: RwLock<Vec<IndexedPassage>>,
    /// Where the index is persisted (None = memory only)
    storage_path: Option<PathBuf>,
    /// Serializes insert + persist so snapshots are written in order
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalSimilarityIndex {
    /// Create an index that is never persisted
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            passages: RwLock::new(Vec::new()),
            storage_path: None,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open (or create) an index persisted at `path`
    pub fn open(path: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let passages = if path.exists() {
            let raw = std::fs::read(&path)?;
            let snapshot: IndexSnapshot = serde_json::from_slice(&raw)?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(Error::Config(format!(
                    "Index at {} has version {}, expected {}",
                    path.display(),
                    snapshot.version,
                    SNAPSHOT_VERSION
                )));
            }
            tracing::info!(
                "Loaded {} passages from {}",
                snapshot.passages.len(),
                path.display()
            );
            snapshot.passages
        } else {
            tracing::info!("Creating new index at {}", path.display());
            Vec::new()
        };

        Ok(Self {
            embedder,
            passages: RwLock::new(passages),
            storage_path: Some(path),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Embed records a few pages at a time; a page either gets an embedding or is skipped
    async fn embed_records(&self, records: Vec<PassageRecord>) -> (Vec<IndexedPassage>, usize) {
        let total = records.len();
        let (valid, invalid): (Vec<_>, Vec<_>) =
            records.into_iter().partition(PassageRecord::is_valid);

        for record in &invalid {
            tracing::warn!(
                "Skipping invalid record (source: '{}', page {})",
                record.source_id,
                record.page_number
            );
        }

        let embedded: Vec<IndexedPassage> = stream::iter(valid)
            .map(|record| self.embed_one(record))
            .buffered(EMBED_CONCURRENCY)
            .filter_map(future::ready)
            .collect()
            .await;

        let failed = total - embedded.len();
        (embedded, failed)
    }

    async fn embed_one(&self, record: PassageRecord) -> Option<IndexedPassage> {
        match self.embedder.embed(&record.content).await {
            Ok(embedding) if !embedding.is_empty() => Some(IndexedPassage { record, embedding }),
            Ok(_) => {
                tracing::warn!(
                    "Empty embedding for {} page {}, skipping",
                    record.source_id,
                    record.page_number
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to embed {} page {}: {}",
                    record.source_id,
                    record.page_number,
                    e
                );
                None
            }
        }
    }

    /// Write the current passages plus `pending` to disk without publishing `pending`
    async fn persist(&self, path: PathBuf, pending: &[IndexedPassage]) -> Result<()> {
        let mut passages = self.passages.read().clone();
        passages.extend_from_slice(pending);
        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION,
            passages,
        };

        tokio::task::spawn_blocking(move || write_snapshot(&path, &snapshot))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }
}

/// Write to a temp file in the target directory, then rename over the old snapshot
fn write_snapshot(path: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, snapshot)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Compute cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl SimilarityIndex for LocalSimilarityIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<PassageRecord>> {
        if k == 0 || self.passages.read().is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(text)
            .await
            .map_err(|e| Error::retrieval(format!("Query embedding failed: {}", e)))?;

        let passages = self.passages.read();
        let mut scored: Vec<(f32, &IndexedPassage)> = passages
            .iter()
            .filter(|p| p.embedding.len() == query_embedding.len())
            .map(|p| (cosine_similarity(&query_embedding, &p.embedding), p))
            .collect();

        if scored.len() < passages.len() {
            tracing::debug!(
                "Ignored {} passages with mismatched embedding dimensions",
                passages.len() - scored.len()
            );
        }

        // Stable: equal similarity keeps insertion order
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, p)| p.record.clone())
            .collect())
    }

    async fn insert(&self, records: Vec<PassageRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;

        let (embedded, failed) = self.embed_records(records).await;
        if embedded.is_empty() {
            return Err(Error::Ingestion(format!(
                "None of {} pages could be embedded",
                failed
            )));
        }

        // Queries only see the batch once it is on disk
        if let Some(path) = self.storage_path.clone() {
            self.persist(path, &embedded).await?;
        }

        let inserted = embedded.len();
        self.passages.write().extend(embedded);

        tracing::info!("Indexed {} pages ({} skipped)", inserted, failed);
        Ok(inserted)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.passages.read().len())
    }

    fn name(&self) -> &str {
        "local-cosine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Bag-of-keywords embedder: one dimension per keyword
    struct KeywordEmbedder {
        fail: AtomicBool,
    }

    const KEYWORDS: &[&str] = &["pump", "valve", "filter", "torque"];

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::embedding("embedder offline"));
            }
            let lower = text.to_lowercase();
            Ok(KEYWORDS
                .iter()
                .map(|k| lower.matches(k).count() as f32)
                .collect())
        }

        fn dimensions(&self) -> usize {
            KEYWORDS.len()
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "keyword"
        }
    }

    fn embedder() -> Arc<KeywordEmbedder> {
        Arc::new(KeywordEmbedder {
            fail: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let index = LocalSimilarityIndex::in_memory(embedder());
        index
            .insert(vec![
                PassageRecord::new("m.pdf", 1, "valve assembly"),
                PassageRecord::new("m.pdf", 2, "pump pump priming"),
                PassageRecord::new("m.pdf", 3, "filter change"),
            ])
            .await
            .unwrap();

        let results = index.query("pump", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].page_number, 2);
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let index = LocalSimilarityIndex::in_memory(embedder());
        assert!(index.query("pump", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_embedder_is_retrieval_error() {
        let embedder = embedder();
        let index = LocalSimilarityIndex::in_memory(embedder.clone());
        index
            .insert(vec![PassageRecord::new("m.pdf", 1, "pump")])
            .await
            .unwrap();

        embedder.fail.store(true, Ordering::SeqCst);
        let err = index.query("pump", 3).await.unwrap_err();
        assert!(matches!(err, Error::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_invalid_pages_are_skipped_not_inserted() {
        let index = LocalSimilarityIndex::in_memory(embedder());
        let inserted = index
            .insert(vec![
                PassageRecord::new("m.pdf", 1, "pump"),
                PassageRecord::new("m.pdf", 0, "valve"),
                PassageRecord::new("m.pdf", 2, "   "),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(index.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        {
            let index = LocalSimilarityIndex::open(&path, embedder()).unwrap();
            index
                .insert(vec![
                    PassageRecord::new("m.pdf", 4, "torque table"),
                    PassageRecord::new("m.pdf", 5, "filter housing"),
                ])
                .await
                .unwrap();
        }

        let reopened = LocalSimilarityIndex::open(&path, embedder()).unwrap();
        assert_eq!(reopened.len().await.unwrap(), 2);
        let results = reopened.query("torque", 1).await.unwrap();
        assert_eq!(results[0].page_number, 4);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_index_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        let index = LocalSimilarityIndex::open(sub.join("index.json"), embedder()).unwrap();
        index
            .insert(vec![PassageRecord::new("m.pdf", 1, "pump")])
            .await
            .unwrap();

        std::fs::remove_dir_all(&sub).unwrap();

        let err = index
            .insert(vec![PassageRecord::new("m.pdf", 2, "valve")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(index.len().await.unwrap(), 1);
        assert_eq!(index.query("valve", 5).await.unwrap().len(), 1);
        assert_eq!(index.query("valve", 5).await.unwrap()[0].page_number, 1);
    }
}
