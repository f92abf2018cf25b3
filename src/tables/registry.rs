//! Merged table records and the per-regulation registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One physical-page fragment of a logical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSegment {
    pub segment_id: String,
    pub page_num: u32,
    pub block_id: String,
    /// True only for the first segment of a table.
    pub is_header: bool,
    /// Half-open data row range `[row_start, row_end)` within the merged table.
    pub row_start: usize,
    pub row_end: usize,
}

impl TableSegment {
    pub fn row_len(&self) -> usize {
        self.row_end - self.row_start
    }
}

/// A logical table reassembled from one or more page fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub table_id: String,
    pub caption: Option<String>,
    pub chapter_path: Vec<String>,
    pub page_start: u32,
    pub page_end: u32,
    pub is_cross_page: bool,
    /// Ordered by ascending `page_num`.
    pub segments: Vec<TableSegment>,
    pub row_count: usize,
    pub col_count: usize,
    pub col_headers: Vec<String>,
    /// Header and separator of the first fragment followed by the data rows
    /// of every fragment.
    pub merged_markdown: String,
    pub created_at: DateTime<Utc>,
}

impl TableEntry {
    pub fn pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.segments.iter().map(|segment| segment.page_num)
    }
}

/// Every merged table of one regulation plus lookup maps.
///
/// Built wholesale from a complete page set and replaced as a unit on
/// re-ingestion; never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRegistry {
    pub reg_id: String,
    pub total_tables: usize,
    pub cross_page_tables: usize,
    pub tables: BTreeMap<String, TableEntry>,
    pub segment_to_table: BTreeMap<String, String>,
    pub page_to_tables: BTreeMap<u32, Vec<String>>,
}

impl TableRegistry {
    pub fn new(reg_id: impl Into<String>, entries: Vec<TableEntry>) -> Self {
        let mut tables = BTreeMap::new();
        let mut segment_to_table = BTreeMap::new();
        let mut page_to_tables: BTreeMap<u32, Vec<String>> = BTreeMap::new();

        for entry in entries {
            for segment in &entry.segments {
                segment_to_table.insert(segment.segment_id.clone(), entry.table_id.clone());
                let on_page = page_to_tables.entry(segment.page_num).or_default();
                if !on_page.contains(&entry.table_id) {
                    on_page.push(entry.table_id.clone());
                }
            }
            tables.insert(entry.table_id.clone(), entry);
        }

        let cross_page_tables = tables.values().filter(|entry| entry.is_cross_page).count();

        Self {
            reg_id: reg_id.into(),
            total_tables: tables.len(),
            cross_page_tables,
            tables,
            segment_to_table,
            page_to_tables,
        }
    }

    pub fn get(&self, table_id: &str) -> Option<&TableEntry> {
        self.tables.get(table_id)
    }

    /// Tables that have at least one fragment on `page_num`.
    pub fn tables_on_page(&self, page_num: u32) -> Vec<&TableEntry> {
        self.page_to_tables
            .get(&page_num)
            .map(|ids| ids.iter().filter_map(|id| self.tables.get(id)).collect())
            .unwrap_or_default()
    }

    /// Merged table owning a given segment.
    pub fn table_for_segment(&self, segment_id: &str) -> Option<&TableEntry> {
        self.segment_to_table
            .get(segment_id)
            .and_then(|table_id| self.tables.get(table_id))
    }
}
