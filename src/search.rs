//! Similarity search over saved posts.
//!
//! Queries are encoded with the same strategy the corpus was indexed with and
//! every post is scored by cosine similarity against its stored vector. Posts
//! without a vector, or with one from the other strategy, score zero. Results
//! below the strategy's floor are dropped, the rest are sorted by descending
//! score (ties keep corpus order) and capped.

use crate::canonicalize::canonicalize_for_embedding;
use crate::embedder::{Embedder, cosine_similarity};
use crate::error::{Result, find_closest_match};
use crate::model::{Embedding, SearchHit, Tweet};
use crate::tfidf::{TfIdfModel, cosine_similarity_sparse};
use clap::ValueEnum;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Minimum dense score for a result to be shown.
pub const DENSE_MIN_SCORE: f32 = 0.3;
/// Maximum dense results.
pub const DENSE_LIMIT: usize = 10;
/// Maximum sparse results. Sparse results only need a score above zero.
pub const SPARSE_LIMIT: usize = 50;
/// Quiet period before a typed query runs.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(300);

/// Indexing and query strategy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Embedding-model vectors (default).
    #[default]
    Dense,
    /// TF-IDF term weights over the saved corpus.
    Sparse,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dense => write!(f, "dense"),
            Self::Sparse => write!(f, "sparse"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dense" | "semantic" | "embedding" => Ok(Self::Dense),
            "sparse" | "tfidf" | "tf-idf" => Ok(Self::Sparse),
            _ => Err(match find_closest_match(s, &["dense", "sparse"]) {
                Some(close) => format!("unknown strategy: '{s}'. Did you mean '{close}'?"),
                None => format!("unknown strategy: '{s}'. Use 'dense' or 'sparse'"),
            }),
        }
    }
}

/// How the query text becomes a vector.
#[derive(Clone, Copy)]
pub enum QueryEncoder<'a> {
    Dense(&'a dyn Embedder),
    Sparse(&'a TfIdfModel),
}

impl QueryEncoder<'_> {
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        match self {
            Self::Dense(_) => Strategy::Dense,
            Self::Sparse(_) => Strategy::Sparse,
        }
    }

    fn encode(&self, query: &str) -> Result<Embedding> {
        match self {
            Self::Dense(embedder) => {
                let vector = embedder.embed(&canonicalize_for_embedding(query))?;
                Ok(Embedding::Dense(vector))
            }
            Self::Sparse(model) => Ok(Embedding::Sparse(model.vectorize(query))),
        }
    }
}

/// Floor and cap for one strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultLimits {
    pub min_score: f32,
    pub limit: usize,
}

/// Scores a corpus against a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilaritySearch {
    pub dense: ResultLimits,
    pub sparse: ResultLimits,
}

impl Default for SimilaritySearch {
    fn default() -> Self {
        Self {
            dense: ResultLimits {
                min_score: DENSE_MIN_SCORE,
                limit: DENSE_LIMIT,
            },
            sparse: ResultLimits {
                min_score: 0.0,
                limit: SPARSE_LIMIT,
            },
        }
    }
}

impl SimilaritySearch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the cap for both strategies.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.dense.limit = limit;
        self.sparse.limit = limit;
        self
    }

    /// Rank `corpus` against `query`.
    ///
    /// An empty or whitespace-only query returns no results.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedder fails to encode the query.
    pub fn search(
        &self,
        query: &str,
        corpus: &[Tweet],
        encoder: &QueryEncoder<'_>,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || corpus.is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = encoder.encode(query)?;
        let limits = match encoder.strategy() {
            Strategy::Dense => self.dense,
            Strategy::Sparse => self.sparse,
        };
        if limits.limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = corpus
            .par_iter()
            .enumerate()
            .map(|(idx, tweet)| (idx, score(&query_vector, tweet.embedding.as_ref())))
            .filter(|(_, s)| passes(*s, limits.min_score, encoder.strategy()))
            .collect();

        // sort_by is stable, so equal scores stay in corpus order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limits.limit);

        debug!(
            strategy = %encoder.strategy(),
            candidates = corpus.len(),
            hits = scored.len(),
            "Scored corpus"
        );

        Ok(scored
            .into_iter()
            .map(|(idx, score)| SearchHit {
                score,
                tweet: corpus[idx].clone(),
            })
            .collect())
    }
}

fn score(query: &Embedding, doc: Option<&Embedding>) -> f32 {
    match (query, doc) {
        (Embedding::Dense(q), Some(Embedding::Dense(d))) => cosine_similarity(q, d),
        (Embedding::Sparse(q), Some(Embedding::Sparse(d))) => cosine_similarity_sparse(q, d),
        _ => 0.0,
    }
}

fn passes(score: f32, floor: f32, strategy: Strategy) -> bool {
    match strategy {
        Strategy::Dense => score >= floor,
        Strategy::Sparse => score > floor,
    }
}

// =============================================================================
// Debouncing
// =============================================================================

/// Runs only the last of a burst of calls made within `delay` of each other.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_DELAY)
    }
}

impl Debouncer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wait out the delay, then run `f` unless a newer call arrived meanwhile.
    /// Superseded calls return `None`.
    pub async fn call<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.generation.load(Ordering::SeqCst) != ticket {
            return None;
        }
        Some(f().await)
    }
}

// =============================================================================
// Search service
// =============================================================================

/// Outcome of one query, suitable for display.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub strategy: Strategy,
    pub hits: Vec<SearchHit>,
    /// Set when the search could not run normally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub elapsed_ms: u64,
}

enum Encoder {
    Dense(Arc<dyn Embedder>),
    Sparse(TfIdfModel),
}

/// A loaded corpus plus the encoder for one strategy.
pub struct SearchService {
    corpus: Vec<Tweet>,
    encoder: Encoder,
    engine: SimilaritySearch,
    debouncer: Debouncer,
    indexed: usize,
}

impl SearchService {
    /// Dense search over `corpus`, whose posts carry vectors from `embedder`.
    pub fn dense(corpus: Vec<Tweet>, embedder: Arc<dyn Embedder>) -> Self {
        let dimension = embedder.dimension();
        let indexed = corpus
            .iter()
            .filter(|t| matches!(&t.embedding, Some(Embedding::Dense(v)) if v.len() == dimension))
            .count();
        Self {
            corpus,
            encoder: Encoder::Dense(embedder),
            engine: SimilaritySearch::default(),
            debouncer: Debouncer::default(),
            indexed,
        }
    }

    /// Sparse search over `corpus`. The TF-IDF model is rebuilt from the
    /// corpus and every post is re-vectorized with it, so stored vectors
    /// weighted by an older corpus never mix with the current idf.
    #[must_use]
    pub fn sparse(mut corpus: Vec<Tweet>) -> Self {
        let model = TfIdfModel::build(&corpus);
        for tweet in &mut corpus {
            tweet.embedding = Some(Embedding::Sparse(model.vectorize_tweet(tweet)));
        }
        let indexed = corpus.len();
        Self {
            corpus,
            encoder: Encoder::Sparse(model),
            engine: SimilaritySearch::default(),
            debouncer: Debouncer::default(),
            indexed,
        }
    }

    #[must_use]
    pub const fn with_engine(mut self, engine: SimilaritySearch) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.debouncer = Debouncer::new(delay);
        self
    }

    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        match self.encoder {
            Encoder::Dense(_) => Strategy::Dense,
            Encoder::Sparse(_) => Strategy::Sparse,
        }
    }

    #[must_use]
    pub fn corpus(&self) -> &[Tweet] {
        &self.corpus
    }

    /// Posts that carry a usable vector for this strategy.
    #[must_use]
    pub const fn indexed(&self) -> usize {
        self.indexed
    }

    /// Run a query. Failures produce an empty result with a status message.
    #[must_use]
    pub fn search(&self, query: &str) -> SearchResponse {
        let start = Instant::now();
        let strategy = self.strategy();
        let encoder = match &self.encoder {
            Encoder::Dense(embedder) => QueryEncoder::Dense(embedder.as_ref()),
            Encoder::Sparse(model) => QueryEncoder::Sparse(model),
        };

        let (hits, mut status) = match self.engine.search(query, &self.corpus, &encoder) {
            Ok(hits) => (hits, None),
            Err(e) => {
                warn!(error = %e, "Search failed");
                (Vec::new(), Some(format!("Search failed: {e}")))
            }
        };
        if status.is_none() && self.indexed == 0 && !self.corpus.is_empty() {
            status = Some(format!(
                "No posts are indexed for {strategy} search yet; run `xbm index`"
            ));
        }

        SearchResponse {
            query: query.to_string(),
            strategy,
            hits,
            status,
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Debounced [`search`](Self::search): returns `None` if a newer query
    /// arrives before the delay elapses.
    pub async fn search_debounced(&self, query: &str) -> Option<SearchResponse> {
        self.debouncer
            .call(move || async move { self.search(query) })
            .await
    }
}
