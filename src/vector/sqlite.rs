//! SQLite vector store: embeddings as little-endian f32 blobs, searched by a
//! brute-force cosine scan in process.

use crate::config::VectorConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::{Handle, IndexItem};
use crate::vector::{Neighbor, VectorIndex, check_dimension, cosine_similarity};

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

const CREATE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS block_vectors (
        item_id TEXT PRIMARY KEY,
        reg_id TEXT NOT NULL,
        dimensions INTEGER NOT NULL,
        embedding BLOB NOT NULL,
        record TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_block_vectors_reg_id ON block_vectors(reg_id)",
];

/// [`VectorIndex`] for deployments without LanceDB. Suitable for a few
/// hundred thousand vectors; every search reads all of them.
pub struct SqliteVectorIndex {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    config: VectorConfig,
    handle: Handle<SqlitePool>,
}

impl SqliteVectorIndex {
    pub fn new(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>, config: VectorConfig) -> Self {
        Self {
            path: path.into(),
            embedder,
            config,
            handle: Handle::new("sqlite vector"),
        }
    }

    async fn pool(&self) -> Result<SqlitePool> {
        let path = self.path.clone();
        self.handle
            .get_or_open(|| async move {
                let pool = crate::index::sqlite::connect(&path).await?;
                for statement in CREATE_SCHEMA {
                    sqlx::query(statement).execute(&pool).await?;
                }
                Ok(pool)
            })
            .await
    }

    pub async fn count(&self) -> Result<usize> {
        let pool = self.pool().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM block_vectors")
            .fetch_one(&pool)
            .await?;
        Ok(count as usize)
    }
}

fn f32_vec_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    fn config(&self) -> &VectorConfig {
        &self.config
    }

    async fn upsert(&self, entries: Vec<(IndexItem, Vec<f32>)>) -> Result<usize> {
        for (_, vector) in &entries {
            check_dimension(self.config.embedding_dim, vector)?;
        }
        let pool = self.pool().await?;

        let mut tx = pool.begin().await?;
        for (item, vector) in &entries {
            sqlx::query(
                "INSERT OR REPLACE INTO block_vectors (item_id, reg_id, dimensions, embedding, record) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(item.item_id())
            .bind(item.reg_id())
            .bind(vector.len() as i64)
            .bind(f32_vec_to_bytes(vector))
            .bind(serde_json::to_string(item)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(stored = entries.len(), "vectors written");
        Ok(entries.len())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        check_dimension(self.config.embedding_dim, query)?;
        if k == 0 || query.iter().all(|value| *value == 0.0) {
            return Ok(Vec::new());
        }
        let pool = self.pool().await?;

        let rows: Vec<(String, i64, Vec<u8>)> =
            sqlx::query_as("SELECT item_id, dimensions, embedding FROM block_vectors")
                .fetch_all(&pool)
                .await?;

        let mut scored: Vec<(String, f32)> = rows
            .into_iter()
            .filter(|(_, dimensions, _)| *dimensions as usize == query.len())
            .map(|(item_id, _, blob)| {
                let similarity = cosine_similarity(query, &bytes_to_f32_vec(&blob));
                (item_id, similarity)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut neighbors = Vec::with_capacity(scored.len());
        for (item_id, score) in scored {
            let record: Option<(String,)> =
                sqlx::query_as("SELECT record FROM block_vectors WHERE item_id = ?")
                    .bind(&item_id)
                    .fetch_optional(&pool)
                    .await?;
            if let Some((record,)) = record {
                neighbors.push(Neighbor {
                    item: serde_json::from_str(&record)?,
                    score,
                });
            }
        }
        Ok(neighbors)
    }

    async fn delete_regulation(&self, reg_id: &str) -> Result<()> {
        let pool = self.pool().await?;
        let deleted = sqlx::query("DELETE FROM block_vectors WHERE reg_id = ?")
            .bind(reg_id)
            .execute(&pool)
            .await?
            .rows_affected();
        tracing::debug!(reg_id, deleted, "vectors deleted");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(pool) = self.handle.close().await {
            pool.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::index::{SearchFilters, TableRecord};
    use crate::index::ResultSource;
    use crate::models::{BlockType, ContentBlock, PageDocument, TableMeta};
    use crate::tables::TableRegistryBuilder;

    fn config() -> VectorConfig {
        VectorConfig {
            embedding_dim: 128,
            max_embed_chars: 40,
            ..VectorConfig::default()
        }
    }

    fn index(dir: &std::path::Path) -> SqliteVectorIndex {
        SqliteVectorIndex::new(
            dir.join("vectors.sqlite"),
            Arc::new(HashingEmbedder::new(128)),
            config(),
        )
    }

    fn table(reg_id: &str, table_id: &str, caption: &str, content: &str) -> IndexItem {
        IndexItem::Table(TableRecord {
            reg_id: reg_id.to_string(),
            table_id: table_id.to_string(),
            caption: Some(caption.to_string()),
            chapter_path: vec!["5 总平面布局".to_string()],
            section_number: Some("5".to_string()),
            page_start: 20,
            page_end: 21,
            is_cross_page: true,
            col_headers: vec!["建筑类别".to_string(), "间距".to_string()],
            row_count: 1,
            content: content.to_string(),
        })
    }

    #[test]
    fn blobs_round_trip_little_endian() {
        let vector = vec![1.5f32, -0.25, 0.0];
        let bytes = f32_vec_to_bytes(&vector);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &1.5f32.to_le_bytes());
        assert_eq!(bytes_to_f32_vec(&bytes), vector);
    }

    #[tokio::test]
    async fn tables_are_found_by_caption_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        let index = index(temp.path());
        let items = vec![
            table("gb1", "t1", "表5.2.2 民用建筑之间的防火间距", "| 高层 | 13 |"),
            table("gb1", "t2", "表5.3.1 防火分区最大允许面积", "| 一级 | 1500 |"),
        ];
        assert_eq!(index.index_batch(&items).await.expect("index"), 2);

        let results = index
            .search("表5.2.2 民用建筑之间的防火间距", &SearchFilters::default().tables_only(), 2)
            .await
            .expect("search");
        assert_eq!(results[0].table_id(), Some("t1"));
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn delete_and_replace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let index = index(temp.path());
        let first = table("gb1", "t1", "表1", "| a | 1 |");
        index.index_one(&first).await.expect("index");
        index.index_one(&first).await.expect("reindex");
        index.index_one(&table("gb2", "t1", "表1", "| a | 1 |")).await.expect("index");
        assert_eq!(index.count().await.expect("count"), 2);

        index.delete_regulation("gb1").await.expect("delete");
        let results = index
            .search("表1", &SearchFilters::for_regulation("gb1"), 5)
            .await
            .expect("search");
        assert!(results.is_empty());
        assert_eq!(index.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn zero_query_vector_returns_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let index = index(temp.path());
        index.index_one(&table("gb1", "t1", "表1", "| a | 1 |")).await.expect("index");
        let neighbors = index.nearest(&[0.0; 128], 5).await.expect("nearest");
        assert!(neighbors.is_empty());
    }

    fn fragment(block_id: &str, table_id: &str, caption: Option<&str>, row: &str) -> ContentBlock {
        ContentBlock {
            block_id: block_id.to_string(),
            block_type: BlockType::Table,
            content_markdown: format!("| 名称 | 距离 |\n| --- | --- |\n| {row} |"),
            chapter_path: vec!["6 安全疏散".to_string()],
            chapter_node_id: None,
            table_meta: Some(TableMeta {
                table_id: table_id.to_string(),
                caption: caption.map(str::to_string),
                col_count: 2,
                col_headers: vec!["名称".to_string(), "距离".to_string()],
            }),
        }
    }

    fn prose(block_id: &str, content: &str) -> ContentBlock {
        ContentBlock {
            block_id: block_id.to_string(),
            block_type: BlockType::Text,
            content_markdown: content.to_string(),
            chapter_path: vec!["6 安全疏散".to_string()],
            chapter_node_id: None,
            table_meta: None,
        }
    }

    /// Page 10 holds prose, a blank block and the captioned head of a table
    /// that continues on page 11.
    fn split_table_pages() -> Vec<PageDocument> {
        let page = |page_num, content_blocks| PageDocument {
            reg_id: "gb1".to_string(),
            page_num,
            content_blocks,
            chapter_path: vec!["6 安全疏散".to_string()],
            continues_from_prev: false,
            continues_to_next: false,
        };
        vec![
            page(
                10,
                vec![
                    prose("b0", "疏散距离应符合表6-2的规定"),
                    prose("b1", "   "),
                    fragment("b2", "t-10", Some("表6-2 安全疏散距离"), "住宅 | 40"),
                ],
            ),
            page(11, vec![fragment("b0", "t-11", None, "公寓 | 30")]),
        ]
    }

    #[tokio::test]
    async fn embeds_blocks_pages_and_merged_tables() {
        let temp = tempfile::tempdir().expect("tempdir");
        let index = index(temp.path());
        let pages = split_table_pages();
        let context = pages[0].context();

        assert!(index.index_block(&pages[0].content_blocks[0], &context).await.expect("block"));
        assert!(!index.index_block(&pages[0].content_blocks[1], &context).await.expect("blank"));
        assert_eq!(index.index_page(&pages[0]).await.expect("page"), 1);

        let registry = TableRegistryBuilder::new("gb1").build(&pages).expect("registry");
        let entry = registry.get("t-10").expect("merged table");
        assert!(index.index_table(entry, "gb1").await.expect("table"));
        assert_eq!(index.count().await.expect("count"), 2);

        let prose_hits = index
            .search("疏散距离应符合表6-2的规定", &SearchFilters::default().with_block_types([BlockType::Text]), 5)
            .await
            .expect("search");
        assert_eq!(prose_hits.len(), 1);
        assert_eq!(prose_hits[0].block_id(), Some("b0"));
        assert_eq!(prose_hits[0].page_num(), 10);

        let table_hits = index
            .search("表6-2 安全疏散距离", &SearchFilters::default().tables_only(), 5)
            .await
            .expect("search");
        assert_eq!(table_hits.len(), 1);
        match &table_hits[0].source {
            ResultSource::Table { table_id, page_start, page_end, is_cross_page, row_count, .. } => {
                assert_eq!(table_id, "t-10");
                assert_eq!((*page_start, *page_end), (10, 11));
                assert!(*is_cross_page);
                assert_eq!(*row_count, 2);
            }
            other => panic!("expected a table hit, got {other:?}"),
        }
    }
}
