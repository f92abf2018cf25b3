//! Cross-page table reassembly and lexical/vector retrieval over structured
//! regulation documents.

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod indexer;
pub mod lexical;
pub mod models;
pub mod search;
pub mod tables;
pub mod vector;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use index::{SearchFilters, SearchResult};
pub use indexer::{IngestStats, RegulationIndexer};
pub use models::{BlockType, ContentBlock, PageDocument, TableMeta};
pub use search::{HybridSearch, MatchType, SearchMode, TableSearch, TableSearchResult};
pub use tables::{TableEntry, TableRegistry, TableRegistryBuilder};
