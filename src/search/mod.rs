//! Query-time façades over the lexical and vector indexes.

pub mod hybrid;
pub mod tables;

pub use hybrid::{HybridSearch, SearchMode};
pub use tables::{MatchType, TableSearch, TableSearchResult};
