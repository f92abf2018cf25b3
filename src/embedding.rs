//! Embedding generation.
//!
//! One embedder is constructed at startup and shared (`Arc<dyn Embedder>`)
//! by every vector index. Queries and documents are embedded asymmetrically:
//! each side gets its own instruction prefix.

use crate::config::VectorConfig;
use crate::error::{EmbeddingError, Result};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Produces fixed-length, L2-normalized text embeddings.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the underlying model.
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed texts for storage, in one backend call.
    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Scale `vector` to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// fastembed-backed local ONNX embedder.
///
/// fastembed's TextEmbedding is not Send, so we hold it behind an Arc and
/// use spawn_blocking to call into it from async contexts.
pub struct FastEmbedder {
    model: Arc<fastembed::TextEmbedding>,
    model_code: String,
    dimension: usize,
    query_prefix: String,
    document_prefix: String,
}

impl FastEmbedder {
    /// Load `model_code`, storing downloaded model files in `cache_dir`.
    ///
    /// Limits ONNX intra-op threads to avoid excessive memory usage on
    /// machines with many cores.
    pub fn new(model_code: &str, cache_dir: &Path, config: &VectorConfig) -> Result<Self> {
        let info = fastembed::TextEmbedding::list_supported_models()
            .into_iter()
            .find(|info| info.model_code.eq_ignore_ascii_case(model_code))
            .ok_or_else(|| {
                EmbeddingError::ModelInit(format!("unsupported embedding model: {model_code}"))
            })?;

        if info.dim != config.embedding_dim {
            return Err(EmbeddingError::ModelInit(format!(
                "model {model_code} produces {} dimensions, configured embedding_dim is {}",
                info.dim, config.embedding_dim
            ))
            .into());
        }

        if std::env::var("OMP_NUM_THREADS").is_err() {
            // SAFETY: Called once during single-threaded init before any ONNX
            // threads are spawned.
            unsafe { std::env::set_var("OMP_NUM_THREADS", "2") };
        }

        let options = fastembed::InitOptions::new(info.model.clone())
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(false);

        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        tracing::info!(model = %info.model_code, dimension = info.dim, "embedding model loaded");

        Ok(Self {
            model: Arc::new(model),
            model_code: info.model_code,
            dimension: info.dim,
            query_prefix: config.query_prefix.clone(),
            document_prefix: config.document_prefix.clone(),
        })
    }

    async fn embed_blocking(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let mut vectors = tokio::task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Task(e.to_string()))??;

        for vector in &mut vectors {
            l2_normalize(vector);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn model_name(&self) -> &str {
        &self.model_code
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let prefixed = texts
            .into_iter()
            .map(|text| format!("{}{}", self.document_prefix, text))
            .collect();
        self.embed_blocking(prefixed).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let prefixed = format!("{}{}", self.query_prefix, text);
        self.embed_blocking(vec![prefixed])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmptyResult.into())
    }
}

/// Deterministic feature-hashing embedder.
///
/// Hashes lowercase word tokens, and CJK character unigrams and bigrams, into
/// fixed-dimension buckets weighted by term frequency. Not semantically rich,
/// but needs no model files and gives identical texts identical vectors.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Hash a term into a bucket index using FNV-1a.
    fn bucket(&self, term: &str) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % self.dimension as u64) as usize
    }

    fn terms(text: &str) -> Vec<String> {
        let mut terms = Vec::new();
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            if word.chars().any(is_cjk) {
                let chars: Vec<char> = word.chars().collect();
                for (index, ch) in chars.iter().enumerate() {
                    terms.push(ch.to_lowercase().collect());
                    if let Some(next) = chars.get(index + 1) {
                        terms.push(format!("{ch}{next}").to_lowercase());
                    }
                }
            } else {
                terms.push(word.to_lowercase());
            }
        }
        terms
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut counts: HashMap<String, f32> = HashMap::new();
        for term in Self::terms(text) {
            *counts.entry(term).or_default() += 1.0;
        }

        let mut vector = vec![0.0f32; self.dimension];
        for (term, count) in &counts {
            // Longer terms carry more signal than single characters.
            let weight = 1.0 + (term.chars().count() as f32).ln();
            vector[self.bucket(term)] += count * weight;
        }
        l2_normalize(&mut vector);
        vector
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF    // kana
        | 0x3400..=0x4DBF  // CJK extension A
        | 0x4E00..=0x9FFF  // CJK unified ideographs
        | 0xAC00..=0xD7AF  // hangul
        | 0xF900..=0xFAFF) // CJK compatibility ideographs
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "feature-hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vector(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn hashing_vectors_are_unit_length() {
        let embedder = HashingEmbedder::new(128);
        let vector = embedder.embed_query("疏散楼梯间的门应向疏散方向开启").await.expect("embed");
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert_eq!(vector.len(), 128);
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
    }

    #[tokio::test]
    async fn empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(64);
        let vector = embedder.embed_query("").await.expect("embed");
        assert!(vector.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn query_and_document_agree_for_identical_text() {
        let embedder = HashingEmbedder::new(256);
        let text = "Fire doors shall be self-closing";
        let documents = embedder.embed_documents(vec![text.to_string()]).await.expect("embed");
        let query = embedder.embed_query(text).await.expect("embed");
        assert_eq!(documents[0], query);
    }

    #[tokio::test]
    async fn overlapping_cjk_text_is_closer() {
        let embedder = HashingEmbedder::new(512);
        let a = embedder.embed_query("安全出口的数量").await.expect("embed");
        let b = embedder.embed_query("安全出口的宽度").await.expect("embed");
        let c = embedder.embed_query("锅炉房的通风").await.expect("embed");
        assert!(cosine(&a, &b) > cosine(&a, &c));
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut zero = vec![0.0f32; 4];
        l2_normalize(&mut zero);
        assert!(zero.iter().all(|&x| x == 0.0));

        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }
}
