//! Ingestion pipeline: build the table registry, then write lexical rows,
//! vectors, and the registry for one regulation.

use crate::config::VectorConfig;
use crate::error::Result;
use crate::index::IndexItem;
use crate::lexical::LexicalIndex;
use crate::models::PageDocument;
use crate::tables::store::validate_reg_id;
use crate::tables::{RegistryStore, TableRegistryBuilder};
use crate::vector::VectorIndex;

use serde::Serialize;
use std::sync::Arc;

/// Statistics from an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub pages: usize,
    /// Prose blocks written to the lexical index.
    pub blocks_indexed: usize,
    pub tables: usize,
    pub cross_page_tables: usize,
    /// Blocks and tables written to the vector index.
    pub vectors_indexed: usize,
}

/// Writes regulations into all three stores and removes them again.
///
/// Ingestion replaces a regulation wholesale. Callers must not ingest the
/// same reg_id concurrently.
#[derive(Clone)]
pub struct RegulationIndexer {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    registries: Arc<RegistryStore>,
    config: VectorConfig,
}

impl RegulationIndexer {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        registries: Arc<RegistryStore>,
        config: VectorConfig,
    ) -> Self {
        Self {
            lexical,
            vector,
            registries,
            config,
        }
    }

    /// Index every page of `reg_id`, replacing anything stored before.
    ///
    /// The registry is saved last, so a regulation whose registry is visible
    /// has finished indexing.
    pub async fn ingest(&self, reg_id: &str, pages: &[PageDocument]) -> Result<IngestStats> {
        validate_reg_id(reg_id)?;
        let registry = TableRegistryBuilder::new(reg_id).build(pages)?;

        // Hide the previous registry first so a failed run never leaves it
        // next to partially rewritten index rows.
        self.registries.delete(reg_id)?;
        self.lexical.delete_regulation(reg_id).await?;
        self.vector.delete_regulation(reg_id).await?;

        let mut sorted: Vec<&PageDocument> = pages.iter().collect();
        sorted.sort_by_key(|page| page.page_num);

        let prose: Vec<IndexItem> = sorted
            .iter()
            .flat_map(|page| IndexItem::prose_items(page))
            .collect();
        let tables: Vec<IndexItem> = registry
            .tables
            .values()
            .map(|entry| IndexItem::from_table(entry, reg_id))
            .collect();

        let blocks_indexed = self.lexical.index_batch(&prose).await?;
        self.lexical.index_batch(&tables).await?;
        self.lexical.optimize().await?;

        let mut vectors_indexed = 0;
        let all: Vec<IndexItem> = prose.into_iter().chain(tables).collect();
        for chunk in all.chunks(self.config.batch_size.max(1)) {
            vectors_indexed += self.vector.index_batch(chunk).await?;
            tracing::debug!(reg_id, vectors_indexed, total = all.len(), "embedding batch stored");
        }

        // Searches fall back to exhaustive scans without an ANN index.
        if let Err(error) = self.vector.optimize().await {
            tracing::warn!(%error, reg_id, "vector index optimization failed");
        }

        self.registries.save(&registry)?;

        let stats = IngestStats {
            pages: pages.len(),
            blocks_indexed,
            tables: registry.total_tables,
            cross_page_tables: registry.cross_page_tables,
            vectors_indexed,
        };
        tracing::info!(
            reg_id,
            pages = stats.pages,
            blocks_indexed = stats.blocks_indexed,
            tables = stats.tables,
            cross_page_tables = stats.cross_page_tables,
            vectors_indexed = stats.vectors_indexed,
            "regulation ingested"
        );
        Ok(stats)
    }

    /// Remove `reg_id` from the lexical index, the vector index and the
    /// registry store. A regulation that was never ingested is a no-op.
    pub async fn delete_regulation(&self, reg_id: &str) -> Result<()> {
        validate_reg_id(reg_id)?;
        self.lexical.delete_regulation(reg_id).await?;
        self.vector.delete_regulation(reg_id).await?;
        self.registries.delete(reg_id)?;
        tracing::info!(reg_id, "regulation deleted");
        Ok(())
    }
}
