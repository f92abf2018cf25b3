//! LanceDB full-text lexical index.

use crate::error::{DbError, Result};
use crate::index::lance::{
    self as lance_util, contains_predicate, in_predicate, sql_literal, string_values,
};
use crate::index::{Handle, IndexItem, SearchFilters, SearchResult, extract_snippet, query_terms};
use crate::index::{serialize_chapter_path, sort_by_score};
use crate::lexical::{LexicalIndex, segment_cjk};

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const DOCS_TABLE: &str = "lexical_docs";
const META_TABLE: &str = "lexical_meta";
const SCHEMA_VERSION: &str = "1";
const VERSION_KEY: &str = "schema_version";

/// [`LexicalIndex`] over a LanceDB table with an inverted (FTS) index on a
/// CJK-segmented copy of content and caption. Every filter is pushed down as
/// a predicate; `_score` is already higher-is-better.
///
/// Writes only append rows. The inverted index is rebuilt once by
/// [`LexicalIndex::optimize`], or before the next search after a write.
pub struct LanceLexicalIndex {
    dir: PathBuf,
    handle: Handle<lancedb::Table>,
    /// Rows were written since the FTS index was last built. Starts set so
    /// rows left by an interrupted run become searchable.
    stale_fts: AtomicBool,
}

impl LanceLexicalIndex {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            handle: Handle::new("lance lexical"),
            stale_fts: AtomicBool::new(true),
        }
    }

    async fn table(&self) -> Result<lancedb::Table> {
        let dir = self.dir.clone();
        self.handle.get_or_open(|| async move { open(&dir).await }).await
    }

    pub async fn count(&self) -> Result<usize> {
        let table = self.table().await?;
        Ok(table.count_rows(None).await?)
    }

    async fn refresh_fts_index(&self, table: &lancedb::Table) -> Result<()> {
        if self.stale_fts.swap(false, Ordering::AcqRel)
            && let Err(error) = rebuild_fts_index(table).await
        {
            self.stale_fts.store(true, Ordering::Release);
            return Err(error);
        }
        Ok(())
    }
}

/// Open the docs table at the current schema version.
///
/// On a version mismatch the docs table is dropped and recreated, and only
/// then is the marker rewritten, so an interrupted migration re-runs on the
/// next open.
async fn open(dir: &std::path::Path) -> Result<lancedb::Table> {
    let connection = lance_util::connect(dir).await?;
    let meta = lance_util::open_or_create_table(&connection, META_TABLE, &meta_schema()).await?;
    let stored = read_marker(&meta).await?;

    if stored.as_deref() == Some(SCHEMA_VERSION) {
        return lance_util::open_or_create_table(&connection, DOCS_TABLE, &docs_schema()).await;
    }

    if let Some(previous) = &stored {
        tracing::info!(
            from = %previous,
            to = SCHEMA_VERSION,
            "lexical schema version changed, rebuilding index"
        );
    }
    lance_util::drop_table(&connection, DOCS_TABLE).await;
    let docs = lance_util::create_empty_table(&connection, DOCS_TABLE, &docs_schema()).await?;

    meta.delete(&format!("key = {}", sql_literal(VERSION_KEY))).await?;
    let marker = RecordBatch::try_new(
        Arc::new(meta_schema()),
        vec![
            Arc::new(StringArray::from(vec![VERSION_KEY])) as ArrayRef,
            Arc::new(StringArray::from(vec![SCHEMA_VERSION])) as ArrayRef,
        ],
    )?;
    lance_util::add_batch(&meta, marker).await?;

    Ok(docs)
}

async fn read_marker(meta: &lancedb::Table) -> Result<Option<String>> {
    let batches: Vec<RecordBatch> = meta
        .query()
        .only_if(format!("key = {}", sql_literal(VERSION_KEY)))
        .execute()
        .await?
        .try_collect()
        .await?;

    Ok(batches
        .iter()
        .flat_map(|batch| string_values(batch, "value"))
        .map(|(_, value)| value)
        .next())
}

fn meta_schema() -> Schema {
    Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
    ])
}

fn docs_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("reg_id", DataType::Utf8, false),
        Field::new("block_type", DataType::Utf8, false),
        Field::new("chapter_path", DataType::Utf8, false),
        Field::new("section_number", DataType::Utf8, true),
        Field::new("content", DataType::Utf8, false),
        Field::new("search_text", DataType::Utf8, false),
        Field::new("record", DataType::Utf8, false),
    ])
}

fn to_batch(items: &[&IndexItem]) -> Result<RecordBatch> {
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        records.push(serde_json::to_string(item)?);
    }

    let search_texts: Vec<String> = items
        .iter()
        .map(|item| match item.caption() {
            Some(caption) => format!("{}\n{}", segment_cjk(caption), segment_cjk(item.content())),
            None => segment_cjk(item.content()),
        })
        .collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(items.iter().map(|item| item.item_id()))),
        Arc::new(StringArray::from_iter_values(items.iter().map(|item| item.reg_id()))),
        Arc::new(StringArray::from_iter_values(
            items.iter().map(|item| item.block_type().as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            items.iter().map(|item| serialize_chapter_path(item.chapter_path())),
        )),
        Arc::new(StringArray::from(
            items.iter().map(|item| item.section_number()).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from_iter_values(items.iter().map(|item| item.content()))),
        Arc::new(StringArray::from(search_texts)),
        Arc::new(StringArray::from(records)),
    ];

    Ok(RecordBatch::try_new(Arc::new(docs_schema()), columns)?)
}

/// Predicate covering every filter. Chapter scope is a literal substring test
/// on the serialized chapter path.
fn pushdown_predicate(filters: &SearchFilters) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(reg_id) = &filters.reg_id {
        clauses.push(format!("reg_id = {}", sql_literal(reg_id)));
    }
    if let Some(scope) = &filters.chapter_scope {
        clauses.push(contains_predicate("chapter_path", scope));
    }
    if let Some(clause) = in_predicate(
        "block_type",
        filters.block_types.iter().map(|block_type| block_type.as_str()),
    ) {
        clauses.push(clause);
    }
    if let Some(section) = &filters.section_number {
        clauses.push(format!("section_number = {}", sql_literal(section)));
    }
    (!clauses.is_empty()).then(|| clauses.join(" AND "))
}

/// (Re)build the inverted index so newly added rows are searchable.
async fn rebuild_fts_index(table: &lancedb::Table) -> Result<()> {
    table
        .create_index(&["search_text"], lancedb::index::Index::FTS(Default::default()))
        .replace(true)
        .execute()
        .await
        .map_err(|e| DbError::LanceDb(format!("failed to create FTS index: {e}")))?;
    tracing::trace!("lexical FTS index rebuilt");
    Ok(())
}

#[async_trait]
impl LexicalIndex for LanceLexicalIndex {
    fn backend_name(&self) -> &'static str {
        "lance"
    }

    async fn index_one(&self, item: &IndexItem) -> Result<bool> {
        Ok(self.index_batch(std::slice::from_ref(item)).await? == 1)
    }

    async fn index_batch(&self, items: &[IndexItem]) -> Result<usize> {
        let items: Vec<&IndexItem> = items.iter().filter(|item| !item.is_blank()).collect();
        if items.is_empty() {
            return Ok(0);
        }
        let table = self.table().await?;

        // Replace rows with the same ids so re-indexing never duplicates.
        let ids: Vec<String> = items.iter().map(|item| item.item_id()).collect();
        if let Some(predicate) = in_predicate("id", ids.iter().map(String::as_str)) {
            table.delete(&predicate).await?;
        }

        lance_util::add_batch(&table, to_batch(&items)?).await?;
        self.stale_fts.store(true, Ordering::Release);

        tracing::debug!(stored = items.len(), "lexical rows written");
        Ok(items.len())
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let table = self.table().await?;
        if table.count_rows(None).await? == 0 {
            return Ok(Vec::new());
        }
        self.refresh_fts_index(&table).await?;

        let fts_query = terms
            .iter()
            .map(|term| segment_cjk(term))
            .collect::<Vec<_>>()
            .join(" ");

        let mut request = table
            .query()
            .full_text_search(lance_index::scalar::FullTextSearchQuery::new(fts_query))
            .select(lancedb::query::Select::columns(&["record", "_score"]))
            .limit(limit);
        if let Some(predicate) = pushdown_predicate(filters) {
            request = request.only_if(predicate);
        }

        let batches: Vec<RecordBatch> = request.execute().await?.try_collect().await?;

        let mut results = Vec::new();
        for batch in &batches {
            let Some(score_column) = batch.column_by_name("_score") else {
                continue;
            };
            let scores: &arrow_array::PrimitiveArray<Float32Type> = score_column.as_primitive();
            for (index, record) in string_values(batch, "record") {
                if !scores.is_valid(index) {
                    continue;
                }
                let item: IndexItem = serde_json::from_str(&record)?;
                if !filters.matches(&item) {
                    continue;
                }
                let snippet = extract_snippet(item.content(), &terms);
                results.push(item.into_result(scores.value(index).abs(), snippet));
            }
        }
        tracing::debug!(?terms, candidates = results.len(), "lance lexical search");

        sort_by_score(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn delete_regulation(&self, reg_id: &str) -> Result<()> {
        let table = self.table().await?;
        table.delete(&format!("reg_id = {}", sql_literal(reg_id))).await?;
        tracing::debug!(reg_id, "lexical rows deleted");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.handle.close().await;
        Ok(())
    }

    async fn optimize(&self) -> Result<()> {
        let table = self.table().await?;
        if table.count_rows(None).await? == 0 {
            return Ok(());
        }
        self.refresh_fts_index(&table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::index::BlockRecord;
    use crate::models::BlockType;

    fn block(reg_id: &str, page_num: u32, block_type: BlockType, content: &str) -> IndexItem {
        IndexItem::Block(BlockRecord {
            reg_id: reg_id.to_string(),
            page_num,
            block_id: format!("b{page_num}"),
            block_type,
            chapter_path: vec!["3 厂房和仓库".to_string(), "3.2 耐火等级".to_string()],
            chapter_node_id: None,
            section_number: Some("3.2".to_string()),
            content: content.to_string(),
        })
    }

    async fn seeded() -> (tempfile::TempDir, LanceLexicalIndex) {
        let temp = tempfile::tempdir().expect("tempdir");
        let index = LanceLexicalIndex::new(temp.path().join("lance"));
        let items = vec![
            block("gb1", 1, BlockType::Text, "厂房的耐火等级不应低于二级"),
            block("gb1", 2, BlockType::Heading, "3.2 厂房和仓库的耐火等级"),
            block("gb1", 3, BlockType::List, "sprinkler systems in warehouses"),
            block("gb2", 1, BlockType::Text, "仓库的耐火等级"),
        ];
        assert_eq!(index.index_batch(&items).await.expect("index"), 4);
        (temp, index)
    }

    #[tokio::test]
    async fn searches_with_pushed_down_filters() {
        let (_temp, index) = seeded().await;

        let all = index
            .search("耐火等级", &SearchFilters::default(), 10)
            .await
            .expect("search");
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|pair| pair[0].score >= pair[1].score));

        let scoped = index
            .search(
                "耐火等级",
                &SearchFilters::for_regulation("gb1").with_block_types([BlockType::Heading]),
                10,
            )
            .await
            .expect("search");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].page_num(), 2);

        let chapter = index
            .search("sprinkler", &SearchFilters::default().with_chapter_scope("耐火等级"), 10)
            .await
            .expect("search");
        assert_eq!(chapter.len(), 1);
        assert_eq!(chapter[0].block_id(), Some("b3"));
    }

    #[tokio::test]
    async fn chapter_scope_is_applied_inside_the_query() {
        let temp = tempfile::tempdir().expect("tempdir");
        let index = LanceLexicalIndex::new(temp.path().join("lance"));

        let mut items: Vec<IndexItem> = (1..=8)
            .map(|page_num| {
                let mut item = block("gb1", page_num, BlockType::Text, "sprinkler sprinkler sprinkler");
                if let IndexItem::Block(record) = &mut item {
                    record.chapter_path = vec!["1 总则".to_string()];
                }
                item
            })
            .collect();
        let mut appendix = block(
            "gb1",
            9,
            BlockType::Text,
            "where a building has a sprinkler the spacing of hydrants along the fire lane may be relaxed",
        );
        if let IndexItem::Block(record) = &mut appendix {
            record.chapter_path = vec!["9 附录".to_string()];
        }
        items.push(appendix);
        index.index_batch(&items).await.expect("index");

        let results = index
            .search("sprinkler", &SearchFilters::default().with_chapter_scope("附录"), 1)
            .await
            .expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].block_id(), Some("b9"));
    }

    #[tokio::test]
    async fn like_wildcards_in_scope_match_literally() {
        let (_temp, index) = seeded().await;
        let results = index
            .search("耐火等级", &SearchFilters::default().with_chapter_scope("3.%"), 10)
            .await
            .expect("search");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn optimize_makes_new_rows_searchable() {
        let (_temp, index) = seeded().await;
        index.optimize().await.expect("optimize");
        index
            .index_one(&block("gb1", 7, BlockType::Text, "smoke exhaust shafts"))
            .await
            .expect("index");
        index.optimize().await.expect("optimize again");

        let results = index
            .search("exhaust", &SearchFilters::default(), 5)
            .await
            .expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page_num(), 7);
    }

    #[tokio::test]
    async fn delete_then_search_is_empty() {
        let (_temp, index) = seeded().await;
        index.delete_regulation("gb1").await.expect("delete");
        index.delete_regulation("gb1").await.expect("delete again");

        let results = index
            .search("耐火等级", &SearchFilters::for_regulation("gb1"), 10)
            .await
            .expect("search");
        assert!(results.is_empty());
        assert_eq!(index.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn reindexing_does_not_duplicate() {
        let (_temp, index) = seeded().await;
        index
            .index_one(&block("gb1", 1, BlockType::Text, "厂房的耐火等级不应低于三级"))
            .await
            .expect("reindex");
        assert_eq!(index.count().await.expect("count"), 4);
    }

    #[tokio::test]
    async fn stale_marker_rebuilds_docs() {
        let (temp, index) = seeded().await;
        index.close().await.expect("close");

        let connection = lance_util::connect(&temp.path().join("lance")).await.expect("connect");
        let meta = connection.open_table(META_TABLE).execute().await.expect("meta");
        meta.delete("key = 'schema_version'").await.expect("clear marker");

        let reopened = LanceLexicalIndex::new(temp.path().join("lance"));
        assert_eq!(reopened.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn closed_index_rejects_operations() {
        let (_temp, index) = seeded().await;
        index.close().await.expect("close");
        let error = index.delete_regulation("gb1").await.expect_err("closed");
        assert!(matches!(error, Error::Db(DbError::Closed(_))));
    }
}
