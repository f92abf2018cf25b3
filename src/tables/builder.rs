//! Cross-page table detection and merging.
//!
//! Parsers emit one table block per physical page, so a long table arrives as
//! several fragments. The grouping pass walks pages in `page_num` order and
//! treats the first table of a page as a continuation of the previous page's
//! last table when the column counts match and the fragment has no caption.
//!
//! Known false positive: two distinct captionless tables with equal column
//! counts on adjacent pages are merged into one entry. The heuristic is kept
//! as is; callers that need certainty should caption their tables.

use crate::error::{Error, Result, TableError};
use crate::models::{BlockType, ContentBlock, PageDocument, TableMeta};
use crate::tables::markdown;
use crate::tables::registry::{TableEntry, TableRegistry, TableSegment};

use chrono::Utc;
use std::collections::HashSet;

/// A table block together with the page it was found on.
#[derive(Debug, Clone)]
pub struct TableFragment<'a> {
    pub page_num: u32,
    pub page_chapter_path: &'a [String],
    pub block: &'a ContentBlock,
    /// Parser metadata, or metadata derived from the markdown when the parser
    /// left it out.
    pub meta: TableMeta,
}

impl TableFragment<'_> {
    fn has_caption(&self) -> bool {
        self.meta
            .caption
            .as_deref()
            .is_some_and(|caption| !caption.trim().is_empty())
    }

    fn chapter_path(&self) -> Vec<String> {
        if self.block.chapter_path.is_empty() {
            self.page_chapter_path.to_vec()
        } else {
            self.block.chapter_path.clone()
        }
    }
}

/// Builds a [`TableRegistry`] for one regulation.
pub struct TableRegistryBuilder {
    reg_id: String,
}

impl TableRegistryBuilder {
    pub fn new(reg_id: impl Into<String>) -> Self {
        Self {
            reg_id: reg_id.into(),
        }
    }

    /// Group, merge, and register every table in `pages`.
    ///
    /// Pages may arrive in any order; every page must belong to this
    /// builder's regulation.
    pub fn build(&self, pages: &[PageDocument]) -> Result<TableRegistry> {
        if let Some(stray) = pages.iter().find(|page| page.reg_id != self.reg_id) {
            return Err(TableError::RegIdMismatch {
                expected: self.reg_id.clone(),
                found: stray.reg_id.clone(),
            }
            .into());
        }

        let groups = group_cross_page_tables(&self.reg_id, pages);

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(groups.len());
        for group in &groups {
            let mut entry = build_table_entry(group)?;
            if !seen.insert(entry.table_id.clone()) {
                let unique = unique_table_id(&entry, &seen);
                tracing::debug!(
                    reg_id = %self.reg_id,
                    table_id = %entry.table_id,
                    renamed = %unique,
                    "duplicate table id, renaming"
                );
                rename_entry(&mut entry, unique.clone());
                seen.insert(unique);
            }
            entries.push(entry);
        }

        let registry = TableRegistry::new(self.reg_id.clone(), entries);
        tracing::debug!(
            reg_id = %self.reg_id,
            total_tables = registry.total_tables,
            cross_page_tables = registry.cross_page_tables,
            "table registry built"
        );
        Ok(registry)
    }
}

/// Group table fragments into logical tables.
///
/// Sorts `pages` by `page_num` first; this is the only structural assumption
/// the pass makes. Single pass with one page of lookahead state: the column
/// count of the last table seen on the previous page.
pub fn group_cross_page_tables<'a>(
    reg_id: &str,
    pages: &'a [PageDocument],
) -> Vec<Vec<TableFragment<'a>>> {
    let mut sorted: Vec<&PageDocument> = pages.iter().collect();
    sorted.sort_by_key(|page| page.page_num);

    let mut groups = Vec::new();
    let mut current: Vec<TableFragment<'a>> = Vec::new();
    let mut open_col_count: Option<usize> = None;

    for page in sorted {
        // Only leading headings may precede a continuation fragment.
        let leading_table = page
            .content_blocks
            .iter()
            .position(|block| block.block_type != BlockType::Heading)
            .filter(|&index| page.content_blocks[index].is_table());

        let mut last_col_count = None;

        for (index, block) in page.content_blocks.iter().enumerate() {
            if !block.is_table() {
                continue;
            }

            let fragment = TableFragment {
                page_num: page.page_num,
                page_chapter_path: &page.chapter_path,
                block,
                meta: resolve_meta(reg_id, page.page_num, block),
            };
            let col_count = fragment.meta.col_count;

            let continues = leading_table == Some(index)
                && open_col_count == Some(col_count)
                && !fragment.has_caption()
                && !current.is_empty();

            if !continues && !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
            current.push(fragment);
            last_col_count = Some(col_count);
        }

        open_col_count = last_col_count;
        if open_col_count.is_none() && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        groups.push(current);
    }

    groups
}

/// Merge one group of fragments into a [`TableEntry`].
///
/// The first fragment keeps all of its table lines. Every later fragment
/// loses its first two lines (repeated header and separator) before its rows
/// are counted and appended.
///
/// A first fragment with fewer than two `|` lines (a bare header row, say)
/// still has those lines emitted but counts zero data rows, so the merged
/// markdown then holds more `|` lines than `row_count + 2`.
pub fn build_table_entry(group: &[TableFragment<'_>]) -> Result<TableEntry> {
    let first = group.first().ok_or(Error::Table(TableError::EmptyGroup))?;
    let last = group.last().ok_or(Error::Table(TableError::EmptyGroup))?;

    let table_id = first.meta.table_id.clone();
    let mut merged_lines: Vec<&str> = Vec::new();
    let mut segments = Vec::with_capacity(group.len());
    let mut row_cursor = 0;

    for (index, fragment) in group.iter().enumerate() {
        let lines = markdown::table_lines(&fragment.block.content_markdown);
        let data_rows = if index == 0 {
            let data_rows = lines.len().saturating_sub(2);
            merged_lines.extend(lines);
            data_rows
        } else {
            let data: Vec<&str> = lines.into_iter().skip(2).collect();
            let data_rows = data.len();
            merged_lines.extend(data);
            data_rows
        };

        segments.push(TableSegment {
            segment_id: segment_id(&table_id, index),
            page_num: fragment.page_num,
            block_id: fragment.block.block_id.clone(),
            is_header: index == 0,
            row_start: row_cursor,
            row_end: row_cursor + data_rows,
        });
        row_cursor += data_rows;
    }

    Ok(TableEntry {
        table_id,
        caption: first.meta.caption.clone().filter(|c| !c.trim().is_empty()),
        chapter_path: first.chapter_path(),
        page_start: first.page_num,
        page_end: last.page_num,
        is_cross_page: first.page_num != last.page_num,
        segments,
        row_count: row_cursor,
        col_count: first.meta.col_count,
        col_headers: first.meta.col_headers.clone(),
        merged_markdown: merged_lines.join("\n"),
        created_at: Utc::now(),
    })
}

fn segment_id(table_id: &str, index: usize) -> String {
    format!("{table_id}:seg{index}")
}

fn resolve_meta(reg_id: &str, page_num: u32, block: &ContentBlock) -> TableMeta {
    match &block.table_meta {
        Some(meta) => meta.clone(),
        None => TableMeta {
            table_id: format!("{reg_id}-p{page_num}-{}", block.block_id),
            caption: None,
            col_count: markdown::column_count(&block.content_markdown),
            col_headers: markdown::header_cells(&block.content_markdown),
        },
    }
}

fn unique_table_id(entry: &TableEntry, seen: &HashSet<String>) -> String {
    let base = format!("{}-p{}", entry.table_id, entry.page_start);
    let mut candidate = base.clone();
    let mut n = 2;
    while seen.contains(&candidate) {
        candidate = format!("{base}-{n}");
        n += 1;
    }
    candidate
}

fn rename_entry(entry: &mut TableEntry, table_id: String) {
    for (index, segment) in entry.segments.iter_mut().enumerate() {
        segment.segment_id = segment_id(&table_id, index);
    }
    entry.table_id = table_id;
}
