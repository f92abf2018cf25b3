//! Search restricted to merged tables, with match classification and
//! registry lookups.

use crate::error::Result;
use crate::index::{ResultSource, SearchFilters, SearchResult};
use crate::lexical::LexicalIndex;
use crate::search::hybrid::finish;
use crate::tables::{RegistryStore, TableEntry};
use crate::vector::VectorIndex;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where the query text literally occurs in a table hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Caption,
    Content,
    Both,
}

impl MatchType {
    /// Classify by case-insensitive substring presence. A hit whose query
    /// text occurs in neither place (tokenized or semantic matches) is
    /// reported as `Content`.
    pub fn classify(query: &str, caption: Option<&str>, content: &str) -> Self {
        let needle = query.trim().to_lowercase();
        let in_caption = caption.is_some_and(|caption| caption.to_lowercase().contains(&needle));
        let in_content = content.to_lowercase().contains(&needle);
        match (in_caption, in_content) {
            (true, true) => MatchType::Both,
            (true, false) => MatchType::Caption,
            _ => MatchType::Content,
        }
    }
}

/// A table hit. Carries the page span and headers so a caller can decide
/// whether to fetch the full merged table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSearchResult {
    pub reg_id: String,
    pub table_id: String,
    pub caption: Option<String>,
    pub chapter_path: Vec<String>,
    pub page_start: u32,
    pub page_end: u32,
    pub is_cross_page: bool,
    pub col_headers: Vec<String>,
    pub row_count: usize,
    pub snippet: String,
    pub merged_markdown: String,
    pub score: f32,
    pub match_type: MatchType,
}

impl TableSearchResult {
    /// `None` for block hits.
    fn from_result(query: &str, result: SearchResult) -> Option<Self> {
        let ResultSource::Table {
            table_id,
            caption,
            page_start,
            page_end,
            is_cross_page,
            col_headers,
            row_count,
        } = result.source
        else {
            return None;
        };

        let match_type = MatchType::classify(query, caption.as_deref(), &result.content);
        Some(Self {
            reg_id: result.reg_id,
            table_id,
            caption,
            chapter_path: result.chapter_path,
            page_start,
            page_end,
            is_cross_page,
            col_headers,
            row_count,
            snippet: result.snippet,
            merged_markdown: result.content,
            score: result.score,
            match_type,
        })
    }
}

#[derive(Clone)]
pub struct TableSearch {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    registries: Arc<RegistryStore>,
}

impl TableSearch {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        registries: Arc<RegistryStore>,
    ) -> Self {
        Self {
            lexical,
            vector,
            registries,
        }
    }

    /// Lexical search over merged tables.
    pub async fn search_tables(
        &self,
        query: &str,
        reg_id: Option<&str>,
        chapter_scope: Option<&str>,
        limit: usize,
    ) -> Vec<TableSearchResult> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let filters = table_filters(reg_id, chapter_scope);
        let outcome = self.lexical.search(query, &filters, limit).await;
        let results = finish(outcome, self.lexical.backend_name(), "table lexical", limit);
        to_table_results(query, results)
    }

    /// Semantic search over merged tables.
    pub async fn search_tables_semantic(
        &self,
        query: &str,
        reg_id: Option<&str>,
        chapter_scope: Option<&str>,
        limit: usize,
    ) -> Vec<TableSearchResult> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let filters = table_filters(reg_id, chapter_scope);
        let outcome = self.vector.search(query, &filters, limit).await;
        let results = finish(outcome, self.vector.backend_name(), "table vector", limit);
        to_table_results(query, results)
    }

    /// Look a table up across every stored registry. Returns the owning
    /// reg_id with the entry.
    pub fn get_table_by_id(&self, table_id: &str) -> Result<Option<(String, TableEntry)>> {
        self.registries.find_table(table_id)
    }

    pub fn get_table(&self, reg_id: &str, table_id: &str) -> Result<Option<TableEntry>> {
        self.registries.get_table(reg_id, table_id)
    }
}

fn table_filters(reg_id: Option<&str>, chapter_scope: Option<&str>) -> SearchFilters {
    SearchFilters {
        reg_id: reg_id.map(str::to_string),
        chapter_scope: chapter_scope.map(str::to_string),
        ..SearchFilters::default()
    }
    .tables_only()
}

fn to_table_results(query: &str, results: Vec<SearchResult>) -> Vec<TableSearchResult> {
    results
        .into_iter()
        .filter_map(|result| TableSearchResult::from_result(query, result))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_caption_content_and_both() {
        assert_eq!(
            MatchType::classify("表6-2", Some("表6-2 疏散距离"), "| a | b |"),
            MatchType::Caption
        );
        assert_eq!(
            MatchType::classify("住宅", Some("表6-2 疏散距离"), "| 住宅 | 40 |"),
            MatchType::Content
        );
        assert_eq!(
            MatchType::classify("Height", Some("Table 3 height limits"), "| height | 24 |"),
            MatchType::Both
        );
        assert_eq!(MatchType::classify("absent", None, "text"), MatchType::Content);
    }
}
