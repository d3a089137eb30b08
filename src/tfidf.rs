//! Sparse TF-IDF vectors over the whole saved corpus.
//!
//! The model is derived from every post at once, so any change to the corpus
//! (a post added, removed, or edited) requires rebuilding it and
//! re-vectorizing every post.
//!
//! Weights: `tf = count / max_count` within the text, `idf = ln(N / (1 + df))`.
//! Terms seen in more than `N - 1` documents therefore get a negative weight,
//! and query terms outside the vocabulary get zero.

use crate::canonicalize::embedding_source;
use crate::model::Tweet;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Sparse vector: term → weight.
pub type SparseVector = BTreeMap<String, f32>;

/// Vocabulary and inverse document frequencies for one corpus.
#[derive(Debug, Clone, Default)]
pub struct TfIdfModel {
    idf: HashMap<String, f32>,
    documents: usize,
}

impl TfIdfModel {
    /// Build over `corpus`, using each post's text, author name and handle.
    #[must_use]
    pub fn build(corpus: &[Tweet]) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for tweet in corpus {
            let unique: HashSet<String> = tokenize(&embedding_source(tweet)).into_iter().collect();
            for term in unique {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let n = corpus.len() as f64;
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                let weight = (n / (1.0 + df as f64)).ln() as f32;
                (term, weight)
            })
            .collect::<HashMap<_, _>>();

        debug!(documents = corpus.len(), terms = idf.len(), "Built TF-IDF model");

        Self {
            idf,
            documents: corpus.len(),
        }
    }

    /// Vector for arbitrary text (a post or a query).
    #[must_use]
    pub fn vectorize(&self, text: &str) -> SparseVector {
        let tokens = tokenize(text);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }
        let Some(&max) = counts.values().max() else {
            return SparseVector::new();
        };

        counts
            .into_iter()
            .map(|(term, count)| {
                #[allow(clippy::cast_precision_loss)]
                let tf = count as f32 / max as f32;
                let idf = self.idf.get(term).copied().unwrap_or(0.0);
                (term.to_string(), tf * idf)
            })
            .collect()
    }

    /// Vector for a post, from the same text the model was built on.
    #[must_use]
    pub fn vectorize_tweet(&self, tweet: &Tweet) -> SparseVector {
        self.vectorize(&embedding_source(tweet))
    }

    #[must_use]
    pub fn idf(&self, term: &str) -> Option<f32> {
        self.idf.get(term).copied()
    }

    #[must_use]
    pub fn vocabulary_size(&self) -> usize {
        self.idf.len()
    }

    #[must_use]
    pub const fn documents(&self) -> usize {
        self.documents
    }
}

/// Lowercase, drop everything but word characters and whitespace, split.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .map(String::from)
        .collect()
}

/// Cosine similarity over shared terms; `0.0` if either vector is empty or
/// has zero magnitude.
#[must_use]
pub fn cosine_similarity_sparse(a: &SparseVector, b: &SparseVector) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f32 = small
        .iter()
        .filter_map(|(term, x)| large.get(term).map(|y| x * y))
        .sum();
    let mag_a = a.values().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.values().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    let score = dot / (mag_a * mag_b);
    if score.is_finite() { score } else { 0.0 }
}
