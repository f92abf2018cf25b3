//! Semantic (nearest-neighbor) indexes over prose blocks and merged tables.
//!
//! Backends only store vectors and answer raw k-NN lookups. Embedding,
//! truncation, over-fetch and filtering are shared here, so every backend
//! honors the same contract.

pub mod lance;
pub mod sqlite;

pub use lance::LanceVectorIndex;
pub use sqlite::SqliteVectorIndex;

use crate::config::VectorConfig;
use crate::embedding::Embedder;
use crate::error::{DbError, EmbeddingError, Result};
use crate::index::{
    IndexItem, SearchFilters, SearchResult, extract_snippet, query_terms, sort_by_score,
};
use crate::models::{ContentBlock, PageContext, PageDocument};
use crate::tables::TableEntry;

use async_trait::async_trait;
use std::sync::Arc;

/// One stored item with the similarity of its vector to the query.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub item: IndexItem,
    /// Higher is more similar.
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn embedder(&self) -> &Arc<dyn Embedder>;

    fn config(&self) -> &VectorConfig;

    /// Store or replace items with their precomputed embeddings.
    async fn upsert(&self, entries: Vec<(IndexItem, Vec<f32>)>) -> Result<usize>;

    /// The `k` stored vectors most similar to `query`, best first.
    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Remove every vector of `reg_id`. Succeeds when nothing matches.
    async fn delete_regulation(&self, reg_id: &str) -> Result<()>;

    /// Release the connection. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Backend housekeeping after a bulk write, such as training an ANN
    /// index. Nothing by default.
    async fn optimize(&self) -> Result<()> {
        Ok(())
    }

    /// Embed and store one item. Blank items are skipped and return `false`.
    async fn index_one(&self, item: &IndexItem) -> Result<bool> {
        if item.is_blank() {
            return Ok(false);
        }
        let text = item.embedding_text(self.config().max_embed_chars);
        let embedding = self.embedder().embed_documents(vec![text]).await?;
        let vector = embedding.into_iter().next().ok_or(EmbeddingError::EmptyResult)?;
        Ok(self.upsert(vec![(item.clone(), vector)]).await? == 1)
    }

    /// Embed all non-blank items in one embedder call, then store them.
    async fn index_batch(&self, items: &[IndexItem]) -> Result<usize> {
        let items: Vec<&IndexItem> = items.iter().filter(|item| !item.is_blank()).collect();
        if items.is_empty() {
            return Ok(0);
        }

        let max_chars = self.config().max_embed_chars;
        let texts = items.iter().map(|item| item.embedding_text(max_chars)).collect();
        let vectors = self.embedder().embed_documents(texts).await?;
        if vectors.len() != items.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} vectors, got {}",
                items.len(),
                vectors.len()
            ))
            .into());
        }

        let entries = items.into_iter().cloned().zip(vectors).collect();
        self.upsert(entries).await
    }

    /// Embed `query`, over-fetch neighbors, filter them here, then truncate.
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder().embed_query(query).await?;
        let k = limit.saturating_mul(self.config().overfetch_factor);
        let neighbors = self.nearest(&embedding, k).await?;
        let candidates = neighbors.len();

        let terms = query_terms(query);
        let mut results: Vec<SearchResult> = neighbors
            .into_iter()
            .filter(|neighbor| filters.matches(&neighbor.item))
            .map(|neighbor| {
                let snippet = extract_snippet(neighbor.item.content(), &terms);
                neighbor.item.into_result(neighbor.score, snippet)
            })
            .collect();
        sort_by_score(&mut results);
        results.truncate(limit);

        tracing::debug!(
            backend = self.backend_name(),
            candidates,
            returned = results.len(),
            "vector search"
        );
        Ok(results)
    }

    async fn index_block(&self, block: &ContentBlock, page: &PageContext) -> Result<bool> {
        self.index_one(&IndexItem::from_block(block, page)).await
    }

    async fn index_table(&self, entry: &TableEntry, reg_id: &str) -> Result<bool> {
        self.index_one(&IndexItem::from_table(entry, reg_id)).await
    }

    async fn index_page(&self, page: &PageDocument) -> Result<usize> {
        self.index_batch(&IndexItem::prose_items(page)).await
    }
}

/// Reject a vector whose length is not `expected`.
pub fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(DbError::DimensionMismatch {
            expected,
            actual: vector.len(),
        }
        .into());
    }
    Ok(())
}

/// Cosine similarity; 0 when either vector has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) < -0.99);
    }

    #[test]
    fn dimension_check_reports_both_sizes() {
        let error = check_dimension(4, &[0.0; 3]).expect_err("mismatch");
        assert!(matches!(
            error,
            crate::error::Error::Db(DbError::DimensionMismatch { expected: 4, actual: 3 })
        ));
    }
}
