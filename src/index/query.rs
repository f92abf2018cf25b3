//! Query-side helpers shared by all backends: filters, term splitting,
//! snippet extraction.

use crate::index::item::IndexItem;
use crate::models::BlockType;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static TERM_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\p{P}\p{S}]+").expect("term separator pattern is valid"));

const SNIPPET_RADIUS: usize = 100;
const SNIPPET_FALLBACK: usize = 200;
const ELLIPSIS: &str = "...";

/// The one filter contract honored by every index kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Exact match on regulation.
    pub reg_id: Option<String>,
    /// Substring of the serialized chapter path.
    pub chapter_scope: Option<String>,
    /// Allowed block types; empty allows all.
    #[serde(default)]
    pub block_types: Vec<BlockType>,
    /// Exact match on section number.
    pub section_number: Option<String>,
}

impl SearchFilters {
    pub fn for_regulation(reg_id: impl Into<String>) -> Self {
        Self {
            reg_id: Some(reg_id.into()),
            ..Self::default()
        }
    }

    pub fn with_chapter_scope(mut self, scope: impl Into<String>) -> Self {
        self.chapter_scope = Some(scope.into());
        self
    }

    pub fn with_block_types(mut self, block_types: impl IntoIterator<Item = BlockType>) -> Self {
        self.block_types = block_types.into_iter().collect();
        self
    }

    pub fn with_section_number(mut self, section_number: impl Into<String>) -> Self {
        self.section_number = Some(section_number.into());
        self
    }

    /// Only merged tables.
    pub fn tables_only(mut self) -> Self {
        self.block_types = vec![BlockType::Table];
        self
    }

    /// Client-side evaluation, for backends that cannot push filters down.
    pub fn matches(&self, item: &IndexItem) -> bool {
        if let Some(reg_id) = &self.reg_id
            && item.reg_id() != reg_id
        {
            return false;
        }
        if let Some(scope) = &self.chapter_scope
            && !serialize_chapter_path(item.chapter_path()).contains(scope.as_str())
        {
            return false;
        }
        if !self.block_types.is_empty() && !self.block_types.contains(&item.block_type()) {
            return false;
        }
        if let Some(section) = &self.section_number
            && item.section_number() != Some(section.as_str())
        {
            return false;
        }
        true
    }
}

/// Canonical stored form of a chapter path, the target of `chapter_scope`
/// substring matching.
pub fn serialize_chapter_path(chapter_path: &[String]) -> String {
    serde_json::to_string(chapter_path).unwrap_or_default()
}

/// Split a query on whitespace and punctuation. Terms are OR-combined by the
/// backends, so this favors recall over phrase precision.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in TERM_SEPARATOR.split(query) {
        if !term.is_empty() && !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    }
    terms
}

/// A window of about ±100 characters around the earliest literal occurrence
/// of any term, with ellipses at cut edges. Falls back to the first 200
/// characters when no term occurs literally (tokenizers may match where a
/// plain substring search does not).
pub fn extract_snippet(content: &str, terms: &[String]) -> String {
    let chars: Vec<char> = content.chars().collect();

    let earliest = terms
        .iter()
        .filter_map(|term| {
            let needle: Vec<char> = term.chars().collect();
            find_chars(&chars, &needle).map(|position| (position, needle.len()))
        })
        .min_by_key(|(position, _)| *position);

    let (start, end) = match earliest {
        Some((position, len)) => (
            position.saturating_sub(SNIPPET_RADIUS),
            (position + len + SNIPPET_RADIUS).min(chars.len()),
        ),
        None => (0, SNIPPET_FALLBACK.min(chars.len())),
    };

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.extend(&chars[start..end]);
    if end < chars.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

/// Case-insensitive (ASCII) position of `needle` in `haystack`, in chars.
fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| {
            window
                .iter()
                .zip(needle)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
        })
}
