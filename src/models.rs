//! Page and block shapes produced by the upstream document parser.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static SECTION_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:§\s*)?(\d+(?:\.\d+)*)").expect("section number pattern is valid")
});

/// Kind of a content block on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Text,
    Heading,
    Table,
    List,
}

impl BlockType {
    /// String representation stored in index metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Heading => "heading",
            BlockType::Table => "table",
            BlockType::List => "list",
        }
    }

    /// Parse the stored representation. Unknown values fall back to `Text`.
    pub fn parse(value: &str) -> Self {
        match value {
            "heading" => BlockType::Heading,
            "table" => BlockType::Table,
            "list" => BlockType::List,
            _ => BlockType::Text,
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Table metadata attached by the parser to `table` blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub table_id: String,
    #[serde(default)]
    pub caption: Option<String>,
    pub col_count: usize,
    #[serde(default)]
    pub col_headers: Vec<String>,
}

/// One block of page content in markdown form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Unique within its page.
    pub block_id: String,
    pub block_type: BlockType,
    pub content_markdown: String,
    #[serde(default)]
    pub chapter_path: Vec<String>,
    #[serde(default)]
    pub chapter_node_id: Option<String>,
    /// Present only when `block_type` is `Table`.
    #[serde(default)]
    pub table_meta: Option<TableMeta>,
}

impl ContentBlock {
    pub fn is_table(&self) -> bool {
        self.block_type == BlockType::Table
    }

    /// Leading dotted section numeral of this block.
    ///
    /// Headings carry their own number; other blocks inherit the number of
    /// the innermost chapter they sit in.
    pub fn section_number(&self) -> Option<String> {
        if self.block_type == BlockType::Heading {
            let own = self.content_markdown.trim_start_matches(['#', ' ']);
            if let Some(number) = section_number_of(own) {
                return Some(number);
            }
        }
        self.chapter_path.last().and_then(|title| section_number_of(title))
    }
}

/// Extract a leading section number such as `6.2.1` from a title.
pub fn section_number_of(title: &str) -> Option<String> {
    SECTION_NUMBER
        .captures(title)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// One physical page of a parsed regulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDocument {
    pub reg_id: String,
    /// 1-based, unique per `reg_id`.
    pub page_num: u32,
    #[serde(default)]
    pub content_blocks: Vec<ContentBlock>,
    /// Section titles active at the start of the page.
    #[serde(default)]
    pub chapter_path: Vec<String>,
    #[serde(default)]
    pub continues_from_prev: bool,
    #[serde(default)]
    pub continues_to_next: bool,
}

impl PageDocument {
    pub fn context(&self) -> PageContext {
        PageContext {
            reg_id: self.reg_id.clone(),
            page_num: self.page_num,
            chapter_path: self.chapter_path.clone(),
        }
    }
}

/// The page-level fields a block needs when it is indexed on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    pub reg_id: String,
    pub page_num: u32,
    pub chapter_path: Vec<String>,
}
