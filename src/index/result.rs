//! Search hits returned by every index and façade.

use crate::models::BlockType;

use serde::{Deserialize, Serialize};

/// Where a hit came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultSource {
    Block {
        block_id: String,
        page_num: u32,
        block_type: BlockType,
        chapter_node_id: Option<String>,
    },
    Table {
        table_id: String,
        caption: Option<String>,
        page_start: u32,
        page_end: u32,
        is_cross_page: bool,
        col_headers: Vec<String>,
        row_count: usize,
    },
}

/// One ranked hit. `score` is always higher-is-better, whatever sign
/// convention the backend uses internally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub reg_id: String,
    pub chapter_path: Vec<String>,
    pub section_number: Option<String>,
    pub snippet: String,
    /// Full stored text: block markdown, or merged table markdown.
    pub content: String,
    pub score: f32,
    pub source: ResultSource,
}

impl SearchResult {
    /// Page of a block hit, or first page of a table hit.
    pub fn page_num(&self) -> u32 {
        match &self.source {
            ResultSource::Block { page_num, .. } => *page_num,
            ResultSource::Table { page_start, .. } => *page_start,
        }
    }

    pub fn block_id(&self) -> Option<&str> {
        match &self.source {
            ResultSource::Block { block_id, .. } => Some(block_id),
            ResultSource::Table { .. } => None,
        }
    }

    pub fn table_id(&self) -> Option<&str> {
        match &self.source {
            ResultSource::Table { table_id, .. } => Some(table_id),
            ResultSource::Block { .. } => None,
        }
    }
}

/// Sort hits by descending score. Ties keep their backend order.
pub fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
