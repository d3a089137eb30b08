//! Dense text embedding interface and vector math.
//!
//! Every dense strategy (the built-in hash embedder, the optional local
//! transformer model) implements [`Embedder`] and returns L2-normalized
//! vectors, so cosine similarity reduces to a dot product. Sparse TF-IDF
//! vectors live in [`crate::tfidf`].

use crate::error::XbmError;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// The embedder is not available (e.g., model files missing).
    #[error("embedder unavailable: {0}")]
    Unavailable(String),

    /// Failed to generate an embedding.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
}

impl From<EmbedderError> for XbmError {
    fn from(e: EmbedderError) -> Self {
        Self::embedding(e.to_string())
    }
}

/// Result type for embedder operations.
pub type EmbedderResult<T> = Result<T, EmbedderError>;

/// Converts text into fixed-dimension, L2-normalized dense vectors.
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the model fails.
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>>;

    /// Embed several texts. Models that batch natively should override this.
    ///
    /// # Errors
    ///
    /// Returns an error if any text fails; no partial results are returned.
    fn embed_batch(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize;

    fn id(&self) -> &str;

    fn is_semantic(&self) -> bool;
}

/// Model name that selects [`crate::hash_embedder::HashEmbedder`].
pub const HASH_MODEL: &str = "hash";

/// Dense embedder for a configured model name.
///
/// `hash` is always available; anything else is a fastembed model and needs
/// the `semantic` feature. Model files are cached under `cache_dir`.
///
/// # Errors
///
/// Returns an error if the model is unknown, unsupported by this build, or
/// fails to load.
pub fn load_embedder(
    model: &str,
    dimension: usize,
    cache_dir: &std::path::Path,
) -> crate::error::Result<std::sync::Arc<dyn Embedder>> {
    if model.eq_ignore_ascii_case(HASH_MODEL) {
        return Ok(std::sync::Arc::new(crate::hash_embedder::HashEmbedder::new(dimension)));
    }

    #[cfg(feature = "semantic")]
    {
        let embedder = crate::fast_embedder::FastEmbedder::shared(model, cache_dir.to_path_buf())?;
        Ok(embedder)
    }

    #[cfg(not(feature = "semantic"))]
    {
        let _ = cache_dir;
        Err(EmbedderError::Unavailable(format!(
            "model '{model}' needs a build with the `semantic` feature; use '{HASH_MODEL}' instead"
        ))
        .into())
    }
}

/// L2-normalize a vector in place. Zero vectors are left as-is.
#[inline]
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product, 8 lanes at a time.
#[inline]
#[must_use]
pub fn dot_product_simd(a: &[f32], b: &[f32]) -> f32 {
    use wide::f32x8;

    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| x * y)
        .sum();

    let mut acc = f32x8::ZERO;
    let mut lane_a = [0.0f32; 8];
    let mut lane_b = [0.0f32; 8];
    for (ca, cb) in chunks_a.zip(chunks_b) {
        lane_a.copy_from_slice(ca);
        lane_b.copy_from_slice(cb);
        acc += f32x8::from(lane_a) * f32x8::from(lane_b);
    }

    acc.reduce_add() + tail
}

/// Cosine similarity of two dense vectors.
///
/// Returns exactly `0.0` when either vector has zero magnitude or the
/// lengths differ, never NaN.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let norm_a = dot_product_simd(a, a).sqrt();
    let norm_b = dot_product_simd(b, b).sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    let score = dot_product_simd(a, b) / (norm_a * norm_b);
    if score.is_finite() { score } else { 0.0 }
}
