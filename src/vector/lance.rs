//! LanceDB vector table with cosine distance.

use crate::config::VectorConfig;
use crate::embedding::Embedder;
use crate::error::{DbError, Result};
use crate::index::lance::{self as lance_util, in_predicate, sql_literal, string_values};
use crate::index::{Handle, IndexItem};
use crate::vector::{Neighbor, VectorIndex, check_dimension};

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, ArrayRef, FixedSizeListArray, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::path::PathBuf;
use std::sync::Arc;

const TABLE_NAME: &str = "block_vectors";

/// Minimum rows before an ANN index is worth training. Smaller tables are
/// searched exhaustively.
const MIN_ROWS_FOR_ANN: usize = 256;

/// [`VectorIndex`] over a LanceDB table. Cosine distance is converted to a
/// similarity as `1 - distance`.
pub struct LanceVectorIndex {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    config: VectorConfig,
    handle: Handle<lancedb::Table>,
}

impl LanceVectorIndex {
    pub fn new(dir: impl Into<PathBuf>, embedder: Arc<dyn Embedder>, config: VectorConfig) -> Self {
        Self {
            dir: dir.into(),
            embedder,
            config,
            handle: Handle::new("lance vector"),
        }
    }

    async fn table(&self) -> Result<lancedb::Table> {
        let dir = self.dir.clone();
        let schema = self.schema();
        self.handle
            .get_or_open(|| async move {
                let connection = lance_util::connect(&dir).await?;
                lance_util::open_or_create_table(&connection, TABLE_NAME, &schema).await
            })
            .await
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.table().await?.count_rows(None).await?)
    }

    /// Train a cosine IVF-PQ index on the embedding column once the table is
    /// large enough. "Already exists" style errors are ignored.
    pub async fn create_index(&self) -> Result<()> {
        let table = self.table().await?;
        if table.count_rows(None).await? < MIN_ROWS_FOR_ANN {
            tracing::trace!("too few vectors for an ANN index, using exhaustive search");
            return Ok(());
        }

        match table
            .create_index(
                &["embedding"],
                lancedb::index::Index::IvfPq(
                    lancedb::index::vector::IvfPqIndexBuilder::default()
                        .distance_type(lancedb::DistanceType::Cosine),
                ),
            )
            .execute()
            .await
        {
            Ok(()) => {
                tracing::debug!("vector index created on embedding column");
                Ok(())
            }
            Err(error) => {
                let message = error.to_string();
                if message.contains("already") {
                    tracing::trace!("vector index already exists");
                    Ok(())
                } else {
                    Err(DbError::LanceDb(format!("failed to create vector index: {message}")).into())
                }
            }
        }
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("reg_id", DataType::Utf8, false),
            Field::new("record", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.config.embedding_dim as i32,
                ),
                false,
            ),
        ])
    }

    fn to_batch(&self, entries: &[(IndexItem, Vec<f32>)]) -> Result<RecordBatch> {
        let mut records = Vec::with_capacity(entries.len());
        for (item, _) in entries {
            records.push(serde_json::to_string(item)?);
        }

        let embeddings = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            entries
                .iter()
                .map(|(_, vector)| Some(vector.iter().map(|v| Some(*v)).collect::<Vec<_>>())),
            self.config.embedding_dim as i32,
        );

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(entries.iter().map(|(item, _)| item.item_id()))),
            Arc::new(StringArray::from_iter_values(entries.iter().map(|(item, _)| item.reg_id()))),
            Arc::new(StringArray::from(records)),
            Arc::new(embeddings),
        ];
        Ok(RecordBatch::try_new(Arc::new(self.schema()), columns)?)
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    fn backend_name(&self) -> &'static str {
        "lance"
    }

    fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    fn config(&self) -> &VectorConfig {
        &self.config
    }

    async fn upsert(&self, entries: Vec<(IndexItem, Vec<f32>)>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        for (_, vector) in &entries {
            check_dimension(self.config.embedding_dim, vector)?;
        }
        let table = self.table().await?;

        // Replace any existing rows for these ids so re-indexing stays idempotent.
        let ids: Vec<String> = entries.iter().map(|(item, _)| item.item_id()).collect();
        if let Some(predicate) = in_predicate("id", ids.iter().map(String::as_str)) {
            table.delete(&predicate).await?;
        }

        lance_util::add_batch(&table, self.to_batch(&entries)?).await?;
        tracing::debug!(stored = entries.len(), "vectors written");
        Ok(entries.len())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        check_dimension(self.config.embedding_dim, query)?;
        let table = self.table().await?;
        if k == 0 || table.count_rows(None).await? == 0 {
            return Ok(Vec::new());
        }

        let batches: Vec<RecordBatch> = table
            .query()
            .nearest_to(query)
            .map_err(|e| DbError::LanceDb(e.to_string()))?
            .distance_type(lancedb::DistanceType::Cosine)
            .select(lancedb::query::Select::columns(&["record"]))
            .limit(k)
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        let mut neighbors = Vec::new();
        for batch in &batches {
            let Some(distance_column) = batch.column_by_name("_distance") else {
                continue;
            };
            let distances: &arrow_array::PrimitiveArray<Float32Type> =
                distance_column.as_primitive();
            for (index, record) in string_values(batch, "record") {
                if distances.is_valid(index) {
                    neighbors.push(Neighbor {
                        item: serde_json::from_str(&record)?,
                        score: 1.0 - distances.value(index),
                    });
                }
            }
        }
        neighbors.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(neighbors)
    }

    async fn delete_regulation(&self, reg_id: &str) -> Result<()> {
        let table = self.table().await?;
        table
            .delete(&format!("reg_id = {}", sql_literal(reg_id)))
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;
        tracing::debug!(reg_id, "vectors deleted");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.handle.close().await;
        Ok(())
    }

    async fn optimize(&self) -> Result<()> {
        self.create_index().await
    }
}
