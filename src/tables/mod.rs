//! Cross-page table reassembly: grouping, merging, registry, persistence.

pub mod builder;
pub mod markdown;
pub mod registry;
pub mod store;

pub use builder::{TableFragment, TableRegistryBuilder, build_table_entry, group_cross_page_tables};
pub use registry::{TableEntry, TableRegistry, TableSegment};
pub use store::RegistryStore;
