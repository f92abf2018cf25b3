//! JSON persistence for table registries, one file per regulation.

use crate::error::{Error, Result};
use crate::tables::registry::{TableEntry, TableRegistry};

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const EXTENSION: &str = "json";

/// Directory-backed registry store with a read-through cache.
pub struct RegistryStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<TableRegistry>>>,
}

impl RegistryStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replace the stored registry for its regulation.
    ///
    /// The file is written to a temporary sibling and renamed into place, so
    /// readers see either the old registry or the new one.
    pub fn save(&self, registry: &TableRegistry) -> Result<()> {
        let path = self.path_for(&registry.reg_id)?;
        let json = serde_json::to_vec_pretty(registry)?;

        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(&json)?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|error| Error::Io(error.error))?;

        self.cache_write()
            .insert(registry.reg_id.clone(), Arc::new(registry.clone()));

        tracing::debug!(
            reg_id = %registry.reg_id,
            path = %path.display(),
            total_tables = registry.total_tables,
            "table registry saved"
        );
        Ok(())
    }

    /// Load the registry of `reg_id`, if one has been saved.
    pub fn load(&self, reg_id: &str) -> Result<Option<Arc<TableRegistry>>> {
        let path = self.path_for(reg_id)?;

        if let Some(cached) = self.cache_read().get(reg_id) {
            return Ok(Some(cached.clone()));
        }

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let registry: Arc<TableRegistry> = Arc::new(serde_json::from_slice(&bytes)?);
        self.cache_write()
            .insert(reg_id.to_string(), registry.clone());
        Ok(Some(registry))
    }

    /// Remove the registry of `reg_id`. Missing registries are not an error.
    pub fn delete(&self, reg_id: &str) -> Result<()> {
        let path = self.path_for(reg_id)?;
        self.cache_write().remove(reg_id);

        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(reg_id, "table registry deleted");
                Ok(())
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Regulation ids with a stored registry, sorted.
    pub fn list_reg_ids(&self) -> Result<Vec<String>> {
        let mut reg_ids = Vec::new();
        for item in std::fs::read_dir(&self.dir)? {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                reg_ids.push(stem.to_string());
            }
        }
        reg_ids.sort();
        Ok(reg_ids)
    }

    /// Look a table up in one regulation.
    pub fn get_table(&self, reg_id: &str, table_id: &str) -> Result<Option<TableEntry>> {
        Ok(self
            .load(reg_id)?
            .and_then(|registry| registry.get(table_id).cloned()))
    }

    /// Look a table up across all regulations, in sorted reg_id order.
    pub fn find_table(&self, table_id: &str) -> Result<Option<(String, TableEntry)>> {
        for reg_id in self.list_reg_ids()? {
            if let Some(entry) = self.get_table(&reg_id, table_id)? {
                return Ok(Some((reg_id, entry)));
            }
        }
        Ok(None)
    }

    fn path_for(&self, reg_id: &str) -> Result<PathBuf> {
        validate_reg_id(reg_id)?;
        Ok(self.dir.join(format!("{reg_id}.{EXTENSION}")))
    }

    fn cache_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<TableRegistry>>> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cache_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<TableRegistry>>> {
        self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reject reg_ids that cannot safely name a file.
pub fn validate_reg_id(reg_id: &str) -> Result<()> {
    let invalid = reg_id.trim().is_empty()
        || reg_id.contains(['/', '\\', '\0'])
        || reg_id.contains("..");
    if invalid {
        return Err(Error::InvalidInput(format!("invalid reg_id: {reg_id:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockType, ContentBlock, PageDocument, TableMeta};
    use crate::tables::TableRegistryBuilder;

    fn registry(reg_id: &str, table_id: &str) -> TableRegistry {
        let page = PageDocument {
            reg_id: reg_id.to_string(),
            page_num: 1,
            content_blocks: vec![ContentBlock {
                block_id: "b0".to_string(),
                block_type: BlockType::Table,
                content_markdown: "| a | b |\n|---|---|\n| 1 | 2 |".to_string(),
                chapter_path: vec!["1 总则".to_string()],
                chapter_node_id: None,
                table_meta: Some(TableMeta {
                    table_id: table_id.to_string(),
                    caption: Some("表1".to_string()),
                    col_count: 2,
                    col_headers: vec!["a".to_string(), "b".to_string()],
                }),
            }],
            chapter_path: Vec::new(),
            continues_from_prev: false,
            continues_to_next: false,
        };
        TableRegistryBuilder::new(reg_id).build(&[page]).expect("registry")
    }

    #[test]
    fn save_load_delete_cycle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RegistryStore::open(temp.path()).expect("open store");

        let saved = registry("reg-a", "t1");
        store.save(&saved).expect("save");

        let reopened = RegistryStore::open(temp.path()).expect("reopen store");
        let loaded = reopened.load("reg-a").expect("load").expect("present");
        assert_eq!(*loaded, saved);

        reopened.delete("reg-a").expect("delete");
        assert!(reopened.load("reg-a").expect("load after delete").is_none());
        reopened.delete("reg-a").expect("second delete is a no-op");
    }

    #[test]
    fn find_table_scans_regulations_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RegistryStore::open(temp.path()).expect("open store");
        store.save(&registry("reg-b", "shared")).expect("save b");
        store.save(&registry("reg-a", "shared")).expect("save a");
        store.save(&registry("reg-c", "only-c")).expect("save c");

        assert_eq!(store.list_reg_ids().expect("list"), vec!["reg-a", "reg-b", "reg-c"]);

        let (reg_id, entry) = store.find_table("shared").expect("find").expect("found");
        assert_eq!(reg_id, "reg-a");
        assert_eq!(entry.table_id, "shared");
        assert!(store.find_table("missing").expect("find").is_none());
    }

    #[test]
    fn path_like_reg_ids_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RegistryStore::open(temp.path()).expect("open store");
        for reg_id in ["", "../etc", "a/b", "a\\b"] {
            assert!(store.load(reg_id).is_err(), "{reg_id:?} should be rejected");
        }
    }
}
