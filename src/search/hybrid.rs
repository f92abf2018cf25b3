//! One entry point over the lexical and vector indexes.

use crate::index::{SearchFilters, SearchResult, sort_by_score};
use crate::lexical::LexicalIndex;
use crate::vector::VectorIndex;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which index answers a query. Scores from different modes are not
/// comparable, so they are never merged here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Lexical,
    Vector,
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "lexical" => Ok(SearchMode::Lexical),
            "vector" => Ok(SearchMode::Vector),
            other => Err(format!("unknown search mode: {other}")),
        }
    }
}

/// Mode-selected search honoring one [`SearchFilters`] contract.
///
/// Backend failures degrade to an empty list and a warning, so one broken
/// index never fails a multi-step query pipeline.
#[derive(Clone)]
pub struct HybridSearch {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
}

impl HybridSearch {
    pub fn new(lexical: Arc<dyn LexicalIndex>, vector: Arc<dyn VectorIndex>) -> Self {
        Self { lexical, vector }
    }

    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        mode: SearchMode,
        limit: usize,
    ) -> Vec<SearchResult> {
        match mode {
            SearchMode::Lexical => self.search_lexical(query, filters, limit).await,
            SearchMode::Vector => self.search_vector(query, filters, limit).await,
        }
    }

    pub async fn search_lexical(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let outcome = self.lexical.search(query, filters, limit).await;
        finish(outcome, self.lexical.backend_name(), "lexical", limit)
    }

    pub async fn search_vector(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let outcome = self.vector.search(query, filters, limit).await;
        finish(outcome, self.vector.backend_name(), "vector", limit)
    }
}

/// Sort, truncate, or degrade a failed search to no results.
pub(crate) fn finish(
    outcome: crate::error::Result<Vec<SearchResult>>,
    backend: &str,
    mode: &str,
    limit: usize,
) -> Vec<SearchResult> {
    match outcome {
        Ok(mut results) => {
            sort_by_score(&mut results);
            results.truncate(limit);
            results
        }
        Err(error) => {
            tracing::warn!(%error, backend, mode, "search failed, returning no results");
            Vec::new()
        }
    }
}
