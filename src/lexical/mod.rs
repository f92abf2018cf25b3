//! Lexical (term-matching) indexes over prose blocks and merged tables.

pub mod lance;
pub mod sqlite;

pub use lance::LanceLexicalIndex;
pub use sqlite::SqliteLexicalIndex;

use crate::error::Result;
use crate::index::{IndexItem, SearchFilters, SearchResult};
use crate::models::{ContentBlock, PageContext, PageDocument};
use crate::tables::TableEntry;

use async_trait::async_trait;

/// A ranked term-matching index.
///
/// Query terms are OR-combined. Scores are normalized so higher is always
/// better, whatever the engine reports natively.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Store or replace one item. Blank items are skipped and return `false`.
    async fn index_one(&self, item: &IndexItem) -> Result<bool>;

    /// Store or replace many items in one write. Returns how many were stored.
    async fn index_batch(&self, items: &[IndexItem]) -> Result<usize>;

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Remove every row of `reg_id`. Succeeds when nothing matches.
    async fn delete_regulation(&self, reg_id: &str) -> Result<()>;

    /// Release the connection. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Make rows written so far searchable at full speed, such as rebuilding
    /// an inverted index once after a bulk write. Nothing by default.
    async fn optimize(&self) -> Result<()> {
        Ok(())
    }

    async fn index_block(&self, block: &ContentBlock, page: &PageContext) -> Result<bool> {
        self.index_one(&IndexItem::from_block(block, page)).await
    }

    async fn index_table(&self, entry: &TableEntry, reg_id: &str) -> Result<bool> {
        self.index_one(&IndexItem::from_table(entry, reg_id)).await
    }

    /// Index the prose blocks of one page.
    async fn index_page(&self, page: &PageDocument) -> Result<usize> {
        self.index_batch(&IndexItem::prose_items(page)).await
    }
}

/// Surround every CJK character with spaces so word-splitting tokenizers
/// see one token per character. Unsegmented CJK runs would otherwise index
/// as a single token and never match a sub-phrase.
pub fn segment_cjk(text: &str) -> String {
    let mut segmented = String::with_capacity(text.len() + text.len() / 2);
    for c in text.chars() {
        if is_cjk(c) {
            segmented.push(' ');
            segmented.push(c);
            segmented.push(' ');
        } else {
            segmented.push(c);
        }
    }
    segmented
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xAC00..=0xD7AF
        | 0xF900..=0xFAFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_characters_become_separate_tokens() {
        let segmented = segment_cjk("表6-2 fire门");
        let tokens: Vec<&str> = segmented.split_whitespace().collect();
        assert_eq!(tokens, vec!["表", "6-2", "fire", "门"]);
    }

    #[test]
    fn latin_text_is_untouched() {
        assert_eq!(segment_cjk("Section 6.2.1"), "Section 6.2.1");
    }
}
