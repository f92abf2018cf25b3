//! SQLite FTS5 lexical index.
//!
//! Metadata and the full tagged record live in `lexical_docs`; the
//! CJK-segmented searchable text lives in the `lexical_fts` virtual table,
//! joined by rowid. FTS5's `bm25()` is more-negative-is-better, so scores are
//! reported as absolute values.

use crate::error::Result;
use crate::index::{Handle, IndexItem, SearchFilters, SearchResult, extract_snippet, query_terms};
use crate::index::{serialize_chapter_path, sort_by_score};
use crate::lexical::{LexicalIndex, segment_cjk};

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::path::PathBuf;

const SCHEMA_VERSION: &str = "1";
const VERSION_KEY: &str = "schema_version";

const DROP_SCHEMA: &[&str] = &[
    "DROP TABLE IF EXISTS lexical_fts",
    "DROP TABLE IF EXISTS lexical_docs",
];

const CREATE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS lexical_docs (
        id INTEGER PRIMARY KEY,
        item_id TEXT NOT NULL UNIQUE,
        reg_id TEXT NOT NULL,
        block_type TEXT NOT NULL,
        page_start INTEGER NOT NULL,
        page_end INTEGER NOT NULL,
        is_cross_page INTEGER NOT NULL DEFAULT 0,
        chapter_path TEXT NOT NULL,
        section_number TEXT,
        caption TEXT,
        col_headers TEXT,
        content TEXT NOT NULL,
        record TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_lexical_docs_reg_id ON lexical_docs(reg_id)",
    "CREATE VIRTUAL TABLE IF NOT EXISTS lexical_fts USING fts5(
        content,
        caption,
        tokenize = 'unicode61'
    )",
];

/// FTS5-backed [`LexicalIndex`] stored in a single SQLite file.
pub struct SqliteLexicalIndex {
    path: PathBuf,
    handle: Handle<SqlitePool>,
}

impl SqliteLexicalIndex {
    /// Nothing is opened until the first operation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: Handle::new("sqlite lexical"),
        }
    }

    async fn pool(&self) -> Result<SqlitePool> {
        let path = self.path.clone();
        self.handle
            .get_or_open(|| async move {
                let pool = crate::index::sqlite::connect(&path).await?;
                migrate(&pool).await?;
                Ok(pool)
            })
            .await
    }

    /// Number of stored rows, optionally for one regulation.
    pub async fn count(&self, reg_id: Option<&str>) -> Result<usize> {
        let pool = self.pool().await?;
        let (count,): (i64,) = match reg_id {
            Some(reg_id) => {
                sqlx::query_as("SELECT COUNT(*) FROM lexical_docs WHERE reg_id = ?")
                    .bind(reg_id)
                    .fetch_one(&pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM lexical_docs")
                    .fetch_one(&pool)
                    .await?
            }
        };
        Ok(count as usize)
    }
}

/// Bring the schema to [`SCHEMA_VERSION`].
///
/// On a mismatch the tables are dropped and recreated, then the marker is
/// rewritten. All of it runs in one transaction, so a crash leaves either the
/// old schema or the new one.
async fn migrate(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("CREATE TABLE IF NOT EXISTS lexical_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
        .execute(&mut *tx)
        .await?;

    let stored: Option<(String,)> = sqlx::query_as("SELECT value FROM lexical_meta WHERE key = ?")
        .bind(VERSION_KEY)
        .fetch_optional(&mut *tx)
        .await?;
    let stored = stored.map(|(value,)| value);

    if stored.as_deref() != Some(SCHEMA_VERSION) {
        if let Some(previous) = &stored {
            tracing::info!(
                from = %previous,
                to = SCHEMA_VERSION,
                "lexical schema version changed, rebuilding index"
            );
        }
        for statement in DROP_SCHEMA.iter().chain(CREATE_SCHEMA) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT OR REPLACE INTO lexical_meta (key, value) VALUES (?, ?)")
            .bind(VERSION_KEY)
            .bind(SCHEMA_VERSION)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn upsert(conn: &mut SqliteConnection, item: &IndexItem) -> Result<()> {
    let item_id = item.item_id();

    sqlx::query(
        "DELETE FROM lexical_fts WHERE rowid IN (SELECT id FROM lexical_docs WHERE item_id = ?)",
    )
    .bind(&item_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM lexical_docs WHERE item_id = ?")
        .bind(&item_id)
        .execute(&mut *conn)
        .await?;

    let (page_start, page_end, is_cross_page, col_headers) = match item {
        IndexItem::Block(block) => (block.page_num, block.page_num, false, None),
        IndexItem::Table(table) => (
            table.page_start,
            table.page_end,
            table.is_cross_page,
            Some(serde_json::to_string(&table.col_headers)?),
        ),
    };

    let rowid = sqlx::query(
        "INSERT INTO lexical_docs (item_id, reg_id, block_type, page_start, page_end, \
         is_cross_page, chapter_path, section_number, caption, col_headers, content, record) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&item_id)
    .bind(item.reg_id())
    .bind(item.block_type().as_str())
    .bind(page_start as i64)
    .bind(page_end as i64)
    .bind(is_cross_page)
    .bind(serialize_chapter_path(item.chapter_path()))
    .bind(item.section_number())
    .bind(item.caption())
    .bind(col_headers)
    .bind(item.content())
    .bind(serde_json::to_string(item)?)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    sqlx::query("INSERT INTO lexical_fts (rowid, content, caption) VALUES (?, ?, ?)")
        .bind(rowid)
        .bind(segment_cjk(item.content()))
        .bind(segment_cjk(item.caption().unwrap_or_default()))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// OR of quoted phrases, one per query term. Quoting keeps FTS5 operators in
/// user input from being interpreted; a CJK term becomes a phrase of its
/// characters.
fn match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|term| {
            let tokens = segment_cjk(term)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            format!("\"{}\"", tokens.replace('"', "\"\""))
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[async_trait]
impl LexicalIndex for SqliteLexicalIndex {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn index_one(&self, item: &IndexItem) -> Result<bool> {
        Ok(self.index_batch(std::slice::from_ref(item)).await? == 1)
    }

    async fn index_batch(&self, items: &[IndexItem]) -> Result<usize> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let mut stored = 0;
        for item in items.iter().filter(|item| !item.is_blank()) {
            upsert(&mut tx, item).await?;
            stored += 1;
        }
        tx.commit().await?;

        tracing::debug!(stored, skipped = items.len() - stored, "lexical rows written");
        Ok(stored)
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
        let pool = self.pool().await?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT d.record, bm25(lexical_fts) AS rank \
             FROM lexical_fts JOIN lexical_docs d ON d.id = lexical_fts.rowid \
             WHERE lexical_fts MATCH ",
        );
        builder.push_bind(match_expression(&terms));
        if let Some(reg_id) = &filters.reg_id {
            builder.push(" AND d.reg_id = ").push_bind(reg_id.clone());
        }
        if let Some(scope) = &filters.chapter_scope {
            builder
                .push(" AND instr(d.chapter_path, ")
                .push_bind(scope.clone())
                .push(") > 0");
        }
        if !filters.block_types.is_empty() {
            builder.push(" AND d.block_type IN (");
            let mut separated = builder.separated(", ");
            for block_type in &filters.block_types {
                separated.push_bind(block_type.as_str());
            }
            separated.push_unseparated(")");
        }
        if let Some(section) = &filters.section_number {
            builder.push(" AND d.section_number = ").push_bind(section.clone());
        }
        builder.push(" ORDER BY rank LIMIT ").push_bind(limit as i64);

        let rows: Vec<(String, f64)> = builder.build_query_as().fetch_all(&pool).await?;
        tracing::debug!(?terms, candidates = rows.len(), "sqlite lexical search");

        let mut results = Vec::with_capacity(rows.len());
        for (record, rank) in rows {
            let item: IndexItem = serde_json::from_str(&record)?;
            let snippet = extract_snippet(item.content(), &terms);
            results.push(item.into_result(rank.abs() as f32, snippet));
        }
        sort_by_score(&mut results);
        Ok(results)
    }

    async fn delete_regulation(&self, reg_id: &str) -> Result<()> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        sqlx::query(
            "DELETE FROM lexical_fts WHERE rowid IN (SELECT id FROM lexical_docs WHERE reg_id = ?)",
        )
        .bind(reg_id)
        .execute(&mut *tx)
        .await?;
        let deleted = sqlx::query("DELETE FROM lexical_docs WHERE reg_id = ?")
            .bind(reg_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        tracing::debug!(reg_id, deleted, "lexical rows deleted");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(pool) = self.handle.close().await {
            pool.close().await;
        }
        Ok(())
    }
}
