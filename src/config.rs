//! Engine configuration: backend selection, storage paths, embedding settings.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `REGINDEX__*` environment variables (`__` separates nested keys, e.g.
//! `REGINDEX__VECTOR__MAX_EMBED_CHARS=400`).

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "REGINDEX";

/// Which engine answers lexical queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LexicalBackend {
    /// SQLite FTS5 with BM25 ranking.
    #[default]
    Sqlite,
    /// LanceDB full-text index.
    Lance,
}

/// Which engine answers nearest-neighbor queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// LanceDB vector table, cosine distance.
    #[default]
    Lance,
    /// SQLite table of embedding blobs, scanned in process.
    Sqlite,
}

/// Which embedder produces vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Local ONNX model through fastembed.
    #[default]
    Fastembed,
    /// Deterministic feature hashing, no model download.
    Hashing,
}

/// Configuration for vector indexing and search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Embedding dimension (must match the embedding model).
    pub embedding_dim: usize,
    /// Number of texts to embed per backend call.
    pub batch_size: usize,
    /// Maximum characters of block or table text submitted for embedding.
    pub max_embed_chars: usize,
    /// Nearest neighbors requested per result slot, to survive filtering.
    pub overfetch_factor: usize,
    /// Instruction prefix for query embeddings.
    pub query_prefix: String,
    /// Instruction prefix for document embeddings.
    pub document_prefix: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 384,
            batch_size: 32,
            max_embed_chars: 500,
            overfetch_factor: 2,
            query_prefix: "query: ".to_string(),
            document_prefix: "passage: ".to_string(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for every persisted store.
    pub data_dir: PathBuf,
    pub lexical_backend: LexicalBackend,
    pub vector_backend: VectorBackend,
    pub embedder: EmbedderKind,
    /// fastembed model code.
    pub embedding_model: String,
    /// Where fastembed keeps downloaded model files. Defaults to
    /// `{data_dir}/models`.
    pub embedding_cache_dir: Option<PathBuf>,
    /// Result limit used when a caller does not pass one.
    pub default_limit: usize,
    pub vector: VectorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            lexical_backend: LexicalBackend::default(),
            vector_backend: VectorBackend::default(),
            embedder: EmbedderKind::default(),
            embedding_model: "intfloat/multilingual-e5-small".to_string(),
            embedding_cache_dir: None,
            default_limit: 10,
            vector: VectorConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("regindex"))
        .unwrap_or_else(|| PathBuf::from("./regindex-data"))
}

impl EngineConfig {
    /// Load defaults, then `path` (if given), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|error| Error::Config(error.to_string()))?;
        let config: EngineConfig = settings
            .try_deserialize()
            .map_err(|error| Error::Config(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document directly, without environment overrides.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(source).map_err(|error| Error::Config(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults rooted at `data_dir`, with the offline hashing embedder.
    pub fn offline(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            embedder: EmbedderKind::Hashing,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.vector.embedding_dim == 0 {
            return Err(Error::Config("vector.embedding_dim must be positive".into()));
        }
        if self.vector.batch_size == 0 {
            return Err(Error::Config("vector.batch_size must be positive".into()));
        }
        if self.vector.max_embed_chars == 0 {
            return Err(Error::Config("vector.max_embed_chars must be positive".into()));
        }
        if self.vector.overfetch_factor == 0 {
            return Err(Error::Config("vector.overfetch_factor must be positive".into()));
        }
        Ok(())
    }

    pub fn lexical_sqlite_path(&self) -> PathBuf {
        self.data_dir.join("lexical.sqlite")
    }

    pub fn vector_sqlite_path(&self) -> PathBuf {
        self.data_dir.join("vectors.sqlite")
    }

    pub fn lance_dir(&self) -> PathBuf {
        self.data_dir.join("lance")
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.data_dir.join("registries")
    }

    pub fn model_cache_dir(&self) -> PathBuf {
        self.embedding_cache_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml_str("").expect("parse");
        assert_eq!(config.lexical_backend, LexicalBackend::Sqlite);
        assert_eq!(config.vector_backend, VectorBackend::Lance);
        assert_eq!(config.vector.max_embed_chars, 500);
        assert_eq!(config.vector.overfetch_factor, 2);
    }

    #[test]
    fn toml_selects_backends_and_overrides_nested_values() {
        let config = EngineConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/regindex"
            lexical_backend = "lance"
            vector_backend = "sqlite"
            embedder = "hashing"

            [vector]
            embedding_dim = 256
            max_embed_chars = 300
            "#,
        )
        .expect("parse");

        assert_eq!(config.lexical_backend, LexicalBackend::Lance);
        assert_eq!(config.vector_backend, VectorBackend::Sqlite);
        assert_eq!(config.embedder, EmbedderKind::Hashing);
        assert_eq!(config.vector.embedding_dim, 256);
        assert_eq!(config.vector.batch_size, 32);
        assert_eq!(config.lexical_sqlite_path(), PathBuf::from("/var/lib/regindex/lexical.sqlite"));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let error = EngineConfig::from_toml_str("[vector]\nembedding_dim = 0").expect_err("invalid");
        assert!(matches!(error, Error::Config(_)));
    }

    #[test]
    fn load_reads_toml_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("regindex.toml");
        std::fs::write(&path, "default_limit = 7\nvector_backend = \"sqlite\"\n").expect("write");

        let config = EngineConfig::load(Some(&path)).expect("load");
        assert_eq!(config.default_limit, 7);
        assert_eq!(config.vector_backend, VectorBackend::Sqlite);
    }
}
