//! Records written into lexical and vector indexes.

use crate::index::result::{ResultSource, SearchResult};
use crate::models::{BlockType, ContentBlock, PageContext, PageDocument, section_number_of};
use crate::tables::TableEntry;

use serde::{Deserialize, Serialize};

/// A prose block denormalized with its page context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub reg_id: String,
    pub page_num: u32,
    pub block_id: String,
    pub block_type: BlockType,
    pub chapter_path: Vec<String>,
    pub chapter_node_id: Option<String>,
    pub section_number: Option<String>,
    pub content: String,
}

/// A merged table denormalized for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub reg_id: String,
    pub table_id: String,
    pub caption: Option<String>,
    pub chapter_path: Vec<String>,
    pub section_number: Option<String>,
    pub page_start: u32,
    pub page_end: u32,
    pub is_cross_page: bool,
    pub col_headers: Vec<String>,
    pub row_count: usize,
    /// Merged markdown of the whole table.
    pub content: String,
}

/// One unit of indexable content. Both index kinds accept exactly this shape
/// and hand it back inside [`SearchResult`], so callers never inspect
/// backend payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexItem {
    Block(BlockRecord),
    Table(TableRecord),
}

impl IndexItem {
    pub fn from_block(block: &ContentBlock, page: &PageContext) -> Self {
        let chapter_path = if block.chapter_path.is_empty() {
            page.chapter_path.clone()
        } else {
            block.chapter_path.clone()
        };
        let section_number = block
            .section_number()
            .or_else(|| chapter_path.last().and_then(|title| section_number_of(title)));

        IndexItem::Block(BlockRecord {
            reg_id: page.reg_id.clone(),
            page_num: page.page_num,
            block_id: block.block_id.clone(),
            block_type: block.block_type,
            chapter_path,
            chapter_node_id: block.chapter_node_id.clone(),
            section_number,
            content: block.content_markdown.clone(),
        })
    }

    /// Every non-blank prose block on `page`. Table blocks are skipped: the
    /// merged [`TableEntry`] is the indexed unit for tables.
    pub fn prose_items(page: &PageDocument) -> Vec<Self> {
        let context = page.context();
        page.content_blocks
            .iter()
            .filter(|block| !block.is_table())
            .map(|block| Self::from_block(block, &context))
            .filter(|item| !item.is_blank())
            .collect()
    }

    pub fn from_table(entry: &TableEntry, reg_id: &str) -> Self {
        IndexItem::Table(TableRecord {
            reg_id: reg_id.to_string(),
            table_id: entry.table_id.clone(),
            caption: entry.caption.clone(),
            chapter_path: entry.chapter_path.clone(),
            section_number: entry.chapter_path.last().and_then(|title| section_number_of(title)),
            page_start: entry.page_start,
            page_end: entry.page_end,
            is_cross_page: entry.is_cross_page,
            col_headers: entry.col_headers.clone(),
            row_count: entry.row_count,
            content: entry.merged_markdown.clone(),
        })
    }

    /// Stable row key, unique across regulations.
    pub fn item_id(&self) -> String {
        match self {
            IndexItem::Block(block) => {
                format!("block:{}:{}:{}", block.reg_id, block.page_num, block.block_id)
            }
            IndexItem::Table(table) => format!("table:{}:{}", table.reg_id, table.table_id),
        }
    }

    pub fn reg_id(&self) -> &str {
        match self {
            IndexItem::Block(block) => &block.reg_id,
            IndexItem::Table(table) => &table.reg_id,
        }
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            IndexItem::Block(block) => block.block_type,
            IndexItem::Table(_) => BlockType::Table,
        }
    }

    pub fn chapter_path(&self) -> &[String] {
        match self {
            IndexItem::Block(block) => &block.chapter_path,
            IndexItem::Table(table) => &table.chapter_path,
        }
    }

    pub fn section_number(&self) -> Option<&str> {
        match self {
            IndexItem::Block(block) => block.section_number.as_deref(),
            IndexItem::Table(table) => table.section_number.as_deref(),
        }
    }

    pub fn caption(&self) -> Option<&str> {
        match self {
            IndexItem::Block(_) => None,
            IndexItem::Table(table) => table.caption.as_deref(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            IndexItem::Block(block) => &block.content,
            IndexItem::Table(table) => &table.content,
        }
    }

    /// True when there is nothing worth indexing.
    pub fn is_blank(&self) -> bool {
        self.content().trim().is_empty() && self.caption().is_none_or(|c| c.trim().is_empty())
    }

    /// Text submitted to the embedder, bounded to `max_chars` characters.
    ///
    /// Tables lead with caption and column headers so a fragment-only match
    /// still lands near the table's subject.
    pub fn embedding_text(&self, max_chars: usize) -> String {
        let full = match self {
            IndexItem::Block(block) => block.content.trim().to_string(),
            IndexItem::Table(table) => {
                let mut text = String::new();
                if let Some(caption) = &table.caption {
                    text.push_str(caption.trim());
                    text.push('\n');
                }
                if !table.col_headers.is_empty() {
                    text.push_str(&table.col_headers.join(" | "));
                    text.push('\n');
                }
                text.push_str(table.content.trim());
                text
            }
        };
        truncate_chars(&full, max_chars)
    }

    /// Wrap this item as a search hit.
    pub fn into_result(self, score: f32, snippet: String) -> SearchResult {
        match self {
            IndexItem::Block(block) => SearchResult {
                reg_id: block.reg_id,
                chapter_path: block.chapter_path,
                section_number: block.section_number,
                snippet,
                content: block.content,
                score,
                source: ResultSource::Block {
                    block_id: block.block_id,
                    page_num: block.page_num,
                    block_type: block.block_type,
                    chapter_node_id: block.chapter_node_id,
                },
            },
            IndexItem::Table(table) => SearchResult {
                reg_id: table.reg_id,
                chapter_path: table.chapter_path,
                section_number: table.section_number,
                snippet,
                content: table.content,
                score,
                source: ResultSource::Table {
                    table_id: table.table_id,
                    caption: table.caption,
                    page_start: table.page_start,
                    page_end: table.page_end,
                    is_cross_page: table.is_cross_page,
                    col_headers: table.col_headers,
                    row_count: table.row_count,
                },
            },
        }
    }
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
