//! Local transformer embeddings via `fastembed` (feature `semantic`).
//!
//! The ONNX model is downloaded into the data directory on first use and
//! loaded once per process; every later [`FastEmbedder::shared`] call reuses
//! it. Outputs are mean-pooled by fastembed and re-normalized here.

use crate::embedder::{Embedder, EmbedderError, EmbedderResult, l2_normalize};
use fastembed::{InitOptions, TextEmbedding};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

static SHARED: OnceCell<Arc<FastEmbedder>> = OnceCell::new();

/// Dense embedder backed by a local ONNX sentence-transformer.
pub struct FastEmbedder {
    // fastembed's embed() needs &mut self
    model: Mutex<TextEmbedding>,
    id: String,
    dimension: usize,
}

impl FastEmbedder {
    /// Process-wide instance, initialized on the first call.
    ///
    /// # Errors
    ///
    /// Returns an error if the model name is unknown or the model cannot be
    /// downloaded or loaded. A failed initialization is retried next call.
    pub fn shared(model_name: &str, cache_dir: PathBuf) -> EmbedderResult<Arc<Self>> {
        SHARED
            .get_or_try_init(|| Self::load(model_name, cache_dir).map(Arc::new))
            .cloned()
    }

    /// Load a model without sharing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the model name is unknown or loading fails.
    pub fn load(model_name: &str, cache_dir: PathBuf) -> EmbedderResult<Self> {
        let model_enum = parse_model_name(model_name)?;
        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            EmbedderError::Unavailable(format!("creating {}: {e}", cache_dir.display()))
        })?;

        info!(model = model_name, "Loading embedding model");
        let options = InitOptions::new(model_enum)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);
        let mut model =
            TextEmbedding::try_new(options).map_err(|e| EmbedderError::Unavailable(e.to_string()))?;

        let probe = model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| EmbedderError::Unavailable(e.to_string()))?;
        let dimension = probe.first().map_or(0, Vec::len);

        Ok(Self {
            model: Mutex::new(model),
            id: format!("fastembed-{}", model_name.to_lowercase()),
            dimension,
        })
    }
}

fn parse_model_name(name: &str) -> EmbedderResult<fastembed::EmbeddingModel> {
    use fastembed::EmbeddingModel as M;
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok(M::AllMiniLML6V2),
        "all-minilm-l6-v2-q" => Ok(M::AllMiniLML6V2Q),
        "bge-small-en-v1.5" => Ok(M::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(M::BGEBaseENV15),
        other => Err(EmbedderError::Unavailable(format!(
            "unknown model '{other}' (try {DEFAULT_MODEL}, bge-small-en-v1.5, bge-base-en-v1.5)"
        ))),
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::EmbeddingFailed("no embedding returned".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = self
            .model
            .lock()
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedderError::EmbeddingFailed(e.to_string()))?;
        for v in &mut vectors {
            l2_normalize(v);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_semantic(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_is_rejected() {
        assert!(parse_model_name("gpt-17").is_err());
        assert!(parse_model_name("All-MiniLM-L6-v2").is_ok());
    }
}
