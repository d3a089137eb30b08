//! Feature-hashing embedder.
//!
//! Always available, needs no model files, and is deterministic across runs
//! and machines, which makes it the default dense strategy and the one tests
//! use. It is lexical: posts score high against queries sharing their words
//! (and word pairs), not against paraphrases.
//!
//! # Algorithm
//!
//! 1. Lowercase and split on non-alphanumeric boundaries, dropping 1-char tokens
//! 2. Hash each token, and each adjacent token pair, with FNV-1a (64-bit)
//! 3. `hash % dimension` picks the slot, bit 63 picks the sign; pairs add 0.5
//! 4. L2-normalize

use crate::embedder::{Embedder, EmbedderResult, l2_normalize};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Default embedding dimension (matches `MiniLM`).
pub const DEFAULT_DIMENSION: usize = 384;

const MIN_TOKEN_LEN: usize = 2;
const PAIR_WEIGHT: f32 = 0.5;

/// FNV-1a feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    id: String,
}

impl HashEmbedder {
    /// Embedder producing `dimension`-long vectors. Zero falls back to the
    /// default dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        let dimension = if dimension == 0 {
            DEFAULT_DIMENSION
        } else {
            dimension
        };
        Self {
            dimension,
            id: format!("fnv1a-pairs-{dimension}"),
        }
    }

    #[inline]
    fn fnv1a(bytes: &[u8], seed: u64) -> u64 {
        bytes.iter().fold(seed, |hash, b| {
            (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
        })
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.chars().count() >= MIN_TOKEN_LEN)
            .map(String::from)
            .collect()
    }

    fn add_feature(&self, vector: &mut [f32], hash: u64, weight: f32) {
        let dim = u64::try_from(self.dimension).unwrap_or(u64::MAX);
        let slot = usize::try_from(hash % dim).unwrap_or(0);
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Embedder for HashEmbedder {
    /// Text with no usable tokens embeds to the zero vector, which scores 0
    /// against everything.
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut vector = vec![0.0f32; self.dimension];

        for token in &tokens {
            self.add_feature(&mut vector, Self::fnv1a(token.as_bytes(), FNV_OFFSET_BASIS), 1.0);
        }
        for pair in tokens.windows(2) {
            let first = Self::fnv1a(pair[0].as_bytes(), FNV_OFFSET_BASIS);
            let joined = Self::fnv1a(b" ", first);
            self.add_feature(&mut vector, Self::fnv1a(pair[1].as_bytes(), joined), PAIR_WEIGHT);
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_semantic(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::cosine_similarity;

    #[test]
    fn test_new_and_identity() {
        let embedder = HashEmbedder::new(256);
        assert_eq!(embedder.id(), "fnv1a-pairs-256");
        assert_eq!(embedder.dimension(), 256);
        assert!(!embedder.is_semantic());
        assert_eq!(HashEmbedder::new(0).dimension(), DEFAULT_DIMENSION);
    }

    #[test]
    fn test_fnv1a_empty_is_offset_basis() {
        assert_eq!(HashEmbedder::fnv1a(b"", FNV_OFFSET_BASIS), FNV_OFFSET_BASIS);
        assert_ne!(HashEmbedder::fnv1a(b"a", FNV_OFFSET_BASIS), FNV_OFFSET_BASIS);
    }

    #[test]
    fn test_tokenize_drops_short_tokens() {
        let tokens = HashEmbedder::tokenize("Hello, World! A test.");
        assert_eq!(tokens, vec!["hello", "world", "test"]);
    }

    #[test]
    fn test_embed_is_normalized_and_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("rust async runtimes").unwrap();
        let b = embedder.embed("Rust ASYNC runtimes").unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::default();
        for text in ["", "a b c !", "   "] {
            let v = embedder.embed(text).unwrap();
            assert_eq!(v.len(), DEFAULT_DIMENSION);
            assert!(v.iter().all(|x| *x == 0.0));
        }
    }

    #[test]
    fn test_shared_words_score_higher() {
        let embedder = HashEmbedder::default();
        let base = embedder.embed("rust programming language").unwrap();
        let near = embedder.embed("rust programming").unwrap();
        let far = embedder.embed("python scripting language").unwrap();
        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_word_order_matters_through_pairs() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("dog bites man").unwrap();
        let b = embedder.embed("man bites dog").unwrap();
        assert_ne!(a, b);
        assert!(cosine_similarity(&a, &b) > 0.5);
    }

    #[test]
    fn test_batch_matches_single() {
        let embedder = HashEmbedder::default();
        let texts = ["hello world", "日本語テスト café naïve"];
        let batch = embedder.embed_batch(&texts).unwrap();
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(&embedder.embed(text).unwrap(), vector);
        }
    }
}
