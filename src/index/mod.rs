//! The boundary shared by every index backend: what goes in, what comes out,
//! and how a query is scoped.

pub mod handle;
pub mod item;
pub mod lance;
pub mod query;
pub mod result;
pub mod sqlite;

pub use handle::Handle;
pub use item::{BlockRecord, IndexItem, TableRecord, truncate_chars};
pub use query::{SearchFilters, extract_snippet, query_terms, serialize_chapter_path};
pub use result::{ResultSource, SearchResult, sort_by_score};
