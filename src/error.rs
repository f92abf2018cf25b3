//! Error types shared across the indexing and retrieval engine.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Storage backend failures (SQLite, LanceDB, Arrow conversion).
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(String),

    #[error("lancedb error: {0}")]
    LanceDb(String),

    #[error("arrow error: {0}")]
    Arrow(String),

    #[error("{0} index is closed")]
    Closed(&'static str),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<sqlx::Error> for DbError {
    fn from(error: sqlx::Error) -> Self {
        DbError::Sqlite(error.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Db(error.into())
    }
}

impl From<lancedb::Error> for Error {
    fn from(error: lancedb::Error) -> Self {
        Error::Db(DbError::LanceDb(error.to_string()))
    }
}

impl From<arrow_schema::ArrowError> for Error {
    fn from(error: arrow_schema::ArrowError) -> Self {
        Error::Db(DbError::Arrow(error.to_string()))
    }
}

/// Embedding model failures.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("embedding task failed: {0}")]
    Task(String),

    #[error("embedding model returned no vectors")]
    EmptyResult,
}

/// Structural failures while assembling cross-page tables.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// An empty fragment group reached entry construction. This is a bug in
    /// the grouping pass, never a data problem.
    #[error("cannot build a table entry from an empty fragment group")]
    EmptyGroup,

    #[error("page belongs to regulation {found}, expected {expected}")]
    RegIdMismatch { expected: String, found: String },
}
