//! Wiring: one embedder, configured backends, and the handles built on them.

use crate::config::{EmbedderKind, EngineConfig, LexicalBackend, VectorBackend};
use crate::embedding::{Embedder, FastEmbedder, HashingEmbedder};
use crate::error::{Error, Result};
use crate::indexer::RegulationIndexer;
use crate::lexical::{LanceLexicalIndex, LexicalIndex, SqliteLexicalIndex};
use crate::search::{HybridSearch, TableSearch};
use crate::tables::RegistryStore;
use crate::vector::{LanceVectorIndex, SqliteVectorIndex, VectorIndex};

use std::sync::Arc;

/// The assembled engine. Index connections open lazily on first use.
pub struct Engine {
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    registries: Arc<RegistryStore>,
}

impl Engine {
    /// Build the configured embedder and backends.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let embedder: Arc<dyn Embedder> = match config.embedder {
            EmbedderKind::Fastembed => Arc::new(FastEmbedder::new(
                &config.embedding_model,
                &config.model_cache_dir(),
                &config.vector,
            )?),
            EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(config.vector.embedding_dim)),
        };
        Self::with_embedder(config, embedder)
    }

    /// Build the configured backends around an existing embedder.
    pub fn with_embedder(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != config.vector.embedding_dim {
            return Err(Error::Config(format!(
                "embedder {} produces {} dimensions, configured embedding_dim is {}",
                embedder.model_name(),
                embedder.dimension(),
                config.vector.embedding_dim
            )));
        }
        std::fs::create_dir_all(&config.data_dir)?;

        let lexical: Arc<dyn LexicalIndex> = match config.lexical_backend {
            LexicalBackend::Sqlite => Arc::new(SqliteLexicalIndex::new(config.lexical_sqlite_path())),
            LexicalBackend::Lance => Arc::new(LanceLexicalIndex::new(config.lance_dir())),
        };
        let vector: Arc<dyn VectorIndex> = match config.vector_backend {
            VectorBackend::Lance => Arc::new(LanceVectorIndex::new(
                config.lance_dir(),
                embedder.clone(),
                config.vector.clone(),
            )),
            VectorBackend::Sqlite => Arc::new(SqliteVectorIndex::new(
                config.vector_sqlite_path(),
                embedder.clone(),
                config.vector.clone(),
            )),
        };
        let registries = Arc::new(RegistryStore::open(config.registry_dir())?);

        tracing::info!(
            data_dir = %config.data_dir.display(),
            lexical = lexical.backend_name(),
            vector = vector.backend_name(),
            embedder = embedder.model_name(),
            "engine opened"
        );

        Ok(Self {
            config,
            embedder,
            lexical,
            vector,
            registries,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn lexical(&self) -> &Arc<dyn LexicalIndex> {
        &self.lexical
    }

    pub fn vector(&self) -> &Arc<dyn VectorIndex> {
        &self.vector
    }

    pub fn registries(&self) -> &Arc<RegistryStore> {
        &self.registries
    }

    pub fn indexer(&self) -> RegulationIndexer {
        RegulationIndexer::new(
            self.lexical.clone(),
            self.vector.clone(),
            self.registries.clone(),
            self.config.vector.clone(),
        )
    }

    pub fn search(&self) -> HybridSearch {
        HybridSearch::new(self.lexical.clone(), self.vector.clone())
    }

    pub fn tables(&self) -> TableSearch {
        TableSearch::new(
            self.lexical.clone(),
            self.vector.clone(),
            self.registries.clone(),
        )
    }

    /// Close both indexes. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.lexical.close().await?;
        self.vector.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableError;
    use crate::index::SearchFilters;
    use crate::models::{BlockType, ContentBlock, PageDocument, TableMeta};
    use crate::search::{MatchType, SearchMode};

    use indoc::indoc;

    const REG: &str = "gb50016";

    fn block(block_id: &str, block_type: BlockType, content: &str) -> ContentBlock {
        ContentBlock {
            block_id: block_id.to_string(),
            block_type,
            content_markdown: content.to_string(),
            chapter_path: Vec::new(),
            chapter_node_id: None,
            table_meta: None,
        }
    }

    fn table_block(block_id: &str, table_id: &str, caption: Option<&str>, content: &str) -> ContentBlock {
        ContentBlock {
            table_meta: Some(TableMeta {
                table_id: table_id.to_string(),
                caption: caption.map(str::to_string),
                col_count: 3,
                col_headers: vec!["建筑类别".to_string(), "单层".to_string(), "多层".to_string()],
            }),
            ..block(block_id, BlockType::Table, content)
        }
    }

    fn page(page_num: u32, content_blocks: Vec<ContentBlock>) -> PageDocument {
        PageDocument {
            reg_id: REG.to_string(),
            page_num,
            content_blocks,
            chapter_path: vec!["6 安全疏散".to_string(), "6.2 疏散距离".to_string()],
            continues_from_prev: page_num > 10,
            continues_to_next: page_num < 12,
        }
    }

    /// Pages 10-12 carry one three-column table captioned on page 10 only.
    fn pages() -> Vec<PageDocument> {
        vec![
            page(12, vec![
                table_block("b0", "p12-t0", None, indoc! {"
                    | 建筑类别 | 单层 | 多层 |
                    | --- | --- | --- |
                    | 托儿所 | 25 | 20 |
                "}),
                block("b1", BlockType::Text, "医疗建筑的安全出口不应少于2个"),
            ]),
            page(10, vec![
                block("b0", BlockType::Heading, "6.2 疏散距离"),
                block("b1", BlockType::Text, "直通疏散走道的房间疏散门至最近安全出口的直线距离不应大于表6-2的规定"),
                table_block("b2", "t6-2", Some("表6-2 安全疏散距离"), indoc! {"
                    | 建筑类别 | 单层 | 多层 |
                    | --- | --- | --- |
                    | 住宅 | 40 | 35 |
                    | 公寓 | 30 | 25 |
                "}),
            ]),
            page(11, vec![
                table_block("b0", "p11-t0", None, indoc! {"
                    | 建筑类别 | 单层 | 多层 |
                    | --- | --- | --- |
                    | 宿舍 | 20 | 15 |
                    | 旅馆 | 20 | 15 |
                "}),
                block("b1", BlockType::List, "楼梯间应能天然采光和自然通风"),
            ]),
        ]
    }

    fn engine(dir: &std::path::Path, lexical: LexicalBackend, vector: VectorBackend) -> Engine {
        let config = EngineConfig {
            lexical_backend: lexical,
            vector_backend: vector,
            ..EngineConfig::offline(dir)
        };
        Engine::open(config).expect("open engine")
    }

    async fn ingest_and_query(lexical: LexicalBackend, vector: VectorBackend) {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = engine(temp.path(), lexical, vector);

        let stats = engine.indexer().ingest(REG, &pages()).await.expect("ingest");
        assert_eq!(stats.pages, 3);
        assert_eq!(stats.blocks_indexed, 4);
        assert_eq!(stats.tables, 1);
        assert_eq!(stats.cross_page_tables, 1);
        assert_eq!(stats.vectors_indexed, 5);

        let tables = engine.tables().search_tables("表6-2", Some(REG), None, 5).await;
        assert_eq!(tables[0].table_id, "t6-2");
        assert!(matches!(tables[0].match_type, MatchType::Caption | MatchType::Both));
        assert_eq!((tables[0].page_start, tables[0].page_end), (10, 12));
        assert!(tables[0].is_cross_page);
        assert_eq!(tables[0].row_count, 5);

        let (owner, entry) = engine
            .tables()
            .get_table_by_id("t6-2")
            .expect("lookup")
            .expect("table exists");
        assert_eq!(owner, REG);
        assert_eq!(entry.segments.len(), 3);

        let semantic = engine
            .tables()
            .search_tables_semantic("安全疏散距离 住宅 公寓", Some(REG), None, 3)
            .await;
        assert_eq!(semantic[0].table_id, "t6-2");

        let own_text = "楼梯间应能天然采光和自然通风";
        let hits = engine
            .search()
            .search(own_text, &SearchFilters::for_regulation(REG), SearchMode::Vector, 3)
            .await;
        assert_eq!(hits[0].page_num(), 11);
        assert_eq!(hits[0].block_id(), Some("b1"));

        let scoped = engine
            .search()
            .search(
                "安全出口",
                &SearchFilters::for_regulation(REG).with_block_types([BlockType::Text]),
                SearchMode::Lexical,
                10,
            )
            .await;
        assert_eq!(scoped.len(), 2);
        assert!(scoped.windows(2).all(|pair| pair[0].score >= pair[1].score));

        engine.indexer().delete_regulation(REG).await.expect("delete");
        for mode in [SearchMode::Lexical, SearchMode::Vector] {
            let after = engine
                .search()
                .search("安全出口", &SearchFilters::for_regulation(REG), mode, 10)
                .await;
            assert!(after.is_empty(), "{mode:?} still returns rows after delete");
        }
        assert!(engine.tables().get_table_by_id("t6-2").expect("lookup").is_none());

        engine.close().await.expect("close");
        engine.close().await.expect("close twice");
    }

    #[tokio::test]
    async fn sqlite_backends_end_to_end() {
        ingest_and_query(LexicalBackend::Sqlite, VectorBackend::Sqlite).await;
    }

    #[tokio::test]
    async fn lance_backends_end_to_end() {
        ingest_and_query(LexicalBackend::Lance, VectorBackend::Lance).await;
    }

    #[tokio::test]
    async fn reingest_replaces_previous_rows() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = engine(temp.path(), LexicalBackend::Sqlite, VectorBackend::Sqlite);
        engine.indexer().ingest(REG, &pages()).await.expect("ingest");

        let mut revised = pages();
        revised.retain(|page| page.page_num == 10);
        let stats = engine.indexer().ingest(REG, &revised).await.expect("reingest");
        assert_eq!(stats.cross_page_tables, 0);

        let stale = engine
            .search()
            .search("医疗建筑", &SearchFilters::for_regulation(REG), SearchMode::Lexical, 5)
            .await;
        assert!(stale.is_empty());
        let entry = engine
            .tables()
            .get_table(REG, "t6-2")
            .expect("lookup")
            .expect("table exists");
        assert_eq!(entry.page_end, 10);
    }

    #[tokio::test]
    async fn foreign_pages_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = engine(temp.path(), LexicalBackend::Sqlite, VectorBackend::Sqlite);
        let mut pages = pages();
        pages[1].reg_id = "other".to_string();

        let error = engine.indexer().ingest(REG, &pages).await.expect_err("mismatch");
        assert!(matches!(error, Error::Table(TableError::RegIdMismatch { .. })));
    }

    #[test]
    fn mismatched_embedder_dimension_is_a_config_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = Engine::with_embedder(
            EngineConfig::offline(temp.path()),
            Arc::new(HashingEmbedder::new(16)),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
