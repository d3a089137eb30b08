//! Attaching vectors to saved posts.
//!
//! Dense indexing is incremental: each post's canonical text is hashed, and a
//! post whose hash matches the cached entry reuses the cached vector. Only the
//! remainder goes through the model, in small batches, and the cache is
//! flushed after every successful batch so an interrupted run keeps its
//! progress. Sparse indexing has no cache; the TF-IDF model depends on the
//! whole corpus and is rebuilt each time.

use crate::canonicalize::{embedding_text, tweet_content_hash};
use crate::embedder::Embedder;
use crate::error::{Result, XbmError};
use crate::logging::OperationGuard;
use crate::model::{Embedding, Tweet};
use crate::store::{KvStore, get_typed, set_typed};
use crate::tfidf::TfIdfModel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Key of the dense vector cache record.
pub const EMBEDDINGS_CACHE_KEY: &str = "tweet_embeddings_cache";

/// Posts sent to the model per call.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Cached vectors keyed by post id, valid for one embedder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingCache {
    /// Embedder id the vectors were produced with.
    pub model: String,
    #[serde(default)]
    pub entries: HashMap<String, CacheEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// SHA-256 of the canonical embedding text.
    pub hash: String,
    pub vector: Vec<f32>,
}

impl EmbeddingCache {
    fn for_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Cached vector for `id` if its text hash is still `hash` and the
    /// dimension matches.
    fn lookup(&self, id: &str, hash: &str, dimension: usize) -> Option<&[f32]> {
        self.entries
            .get(id)
            .filter(|e| e.hash == hash && e.vector.len() == dimension)
            .map(|e| e.vector.as_slice())
    }
}

/// Counters from one indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub model: String,
    /// Posts whose vector came from the cache.
    pub cached: usize,
    /// Posts embedded by the model in this run.
    pub computed: usize,
    /// Posts left without a vector because their batch failed.
    pub failed: usize,
    /// Batches attempted.
    pub batches: usize,
    /// Calls into the embedder.
    pub model_invocations: usize,
    /// Another run was already in progress; nothing was done.
    pub skipped: bool,
}

impl IndexReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.cached + self.computed + self.failed
    }
}

/// Dense indexer with a persistent per-post vector cache.
pub struct EmbeddingIndexer {
    embedder: Arc<dyn Embedder>,
    kv: Arc<dyn KvStore>,
    batch_size: usize,
    busy: AtomicBool,
}

/// Clears the busy flag however the run ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EmbeddingIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            embedder,
            kv,
            batch_size: DEFAULT_BATCH_SIZE,
            busy: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Attach dense vectors to `tweets`, reusing cached ones.
    ///
    /// A call made while another is running returns immediately with
    /// `skipped` set. A batch the model rejects is logged and left without
    /// vectors; the run continues with the next batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read from the store.
    pub fn index(&self, tweets: &mut [Tweet]) -> Result<IndexReport> {
        self.run(tweets, false)
    }

    /// Like [`index`](Self::index), but ignores every cached vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read from the store.
    pub fn reindex(&self, tweets: &mut [Tweet]) -> Result<IndexReport> {
        self.run(tweets, true)
    }

    fn run(&self, tweets: &mut [Tweet], force: bool) -> Result<IndexReport> {
        let model = self.embedder.id().to_string();
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Indexing already in progress");
            return Ok(IndexReport {
                model,
                skipped: true,
                ..IndexReport::default()
            });
        }
        let _busy = BusyGuard(&self.busy);
        let op = OperationGuard::new("index");

        let mut cache = if force {
            EmbeddingCache::for_model(&model)
        } else {
            self.load_cache(&model)?
        };
        let dimension = self.embedder.dimension();
        let mut report = IndexReport {
            model,
            ..IndexReport::default()
        };

        let mut pending: Vec<(usize, String, String)> = Vec::new();
        for (idx, tweet) in tweets.iter_mut().enumerate() {
            let text = embedding_text(tweet);
            let hash = tweet_content_hash(tweet);
            match cache.lookup(&tweet.id, &hash, dimension) {
                Some(vector) => {
                    tweet.embedding = Some(Embedding::Dense(vector.to_vec()));
                    report.cached += 1;
                }
                None => pending.push((idx, text, hash)),
            }
        }

        debug!(
            cached = report.cached,
            pending = pending.len(),
            "Resolved embedding cache"
        );

        for batch in pending.chunks(self.batch_size) {
            report.batches += 1;
            report.model_invocations += 1;
            let texts: Vec<&str> = batch.iter().map(|(_, text, _)| text.as_str()).collect();

            let vectors = match self.embedder.embed_batch(&texts) {
                Ok(v) if v.len() == batch.len() => v,
                Ok(v) => {
                    let err = XbmError::embedding(format!(
                        "model returned {} vectors for {} texts",
                        v.len(),
                        batch.len()
                    ));
                    warn!(batch = report.batches, error = %err, "Skipping embedding batch");
                    Self::mark_failed(tweets, batch, &mut report);
                    continue;
                }
                Err(e) => {
                    let err = XbmError::from(e);
                    warn!(batch = report.batches, error = %err, "Skipping embedding batch");
                    Self::mark_failed(tweets, batch, &mut report);
                    continue;
                }
            };

            for ((idx, _, hash), vector) in batch.iter().zip(vectors) {
                let tweet = &mut tweets[*idx];
                cache.entries.insert(
                    tweet.id.clone(),
                    CacheEntry {
                        hash: hash.clone(),
                        vector: vector.clone(),
                    },
                );
                tweet.embedding = Some(Embedding::Dense(vector));
                report.computed += 1;
            }
            self.flush(&cache);
        }

        let before = cache.entries.len();
        let live: std::collections::HashSet<&str> = tweets.iter().map(|t| t.id.as_str()).collect();
        cache.entries.retain(|id, _| live.contains(id.as_str()));
        if cache.entries.len() != before || force {
            self.flush(&cache);
        }

        info!(
            model = %report.model,
            cached = report.cached,
            computed = report.computed,
            failed = report.failed,
            batches = report.batches,
            "Indexing finished"
        );
        op.complete();
        Ok(report)
    }

    fn mark_failed(tweets: &mut [Tweet], batch: &[(usize, String, String)], report: &mut IndexReport) {
        for (idx, _, _) in batch {
            tweets[*idx].embedding = None;
        }
        report.failed += batch.len();
    }

    fn load_cache(&self, model: &str) -> Result<EmbeddingCache> {
        let cache = match get_typed::<EmbeddingCache>(self.kv.as_ref(), EMBEDDINGS_CACHE_KEY) {
            Ok(Some(cache)) => cache,
            Ok(None) => return Ok(EmbeddingCache::for_model(model)),
            Err(XbmError::Serialization(e)) => {
                warn!(error = %e, "Embedding cache unreadable, starting over");
                return Ok(EmbeddingCache::for_model(model));
            }
            Err(e) => return Err(e),
        };
        if cache.model == model {
            Ok(cache)
        } else {
            info!(
                cached_model = %cache.model,
                model,
                "Embedder changed, discarding cached vectors"
            );
            Ok(EmbeddingCache::for_model(model))
        }
    }

    fn flush(&self, cache: &EmbeddingCache) {
        if let Err(e) = set_typed(self.kv.as_ref(), EMBEDDINGS_CACHE_KEY, cache) {
            warn!(error = %e, "Failed to write embedding cache");
        }
    }
}

/// Rebuild the TF-IDF model over `tweets` and attach a sparse vector to each.
pub fn index_sparse(tweets: &mut [Tweet]) -> TfIdfModel {
    let op = OperationGuard::new("index_sparse");
    let model = TfIdfModel::build(tweets);
    for tweet in tweets.iter_mut() {
        tweet.embedding = Some(Embedding::Sparse(model.vectorize_tweet(tweet)));
    }
    info!(
        documents = model.documents(),
        terms = model.vocabulary_size(),
        "Sparse index rebuilt"
    );
    op.complete();
    model
}
