//! Embedding model wrapper for fastembed.
//!
//! Provides the text encoder used by the clustering service:
//! - Model selection by name, with multilingual models for mixed-language headers
//! - Model download into a configurable cache directory on first load
//! - Batch embedding generation

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Anything that turns a batch of strings into fixed-dimension vectors.
///
/// Implementations must be pure: the same input string always yields the
/// same vector for the lifetime of the encoder.
pub trait TextEncoder: Send + Sync {
    /// Model name the encoder was built from.
    fn name(&self) -> &str;

    /// Dimension of every vector this encoder returns.
    fn dimensions(&self) -> usize;

    /// Encode `texts`, returning one vector per input in the same order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Load-time knobs for [`EmbeddingModel`].
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    /// Batch size handed to fastembed; `None` lets fastembed pick.
    pub batch_size: Option<usize>,
    pub show_download_progress: bool,
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
    batch_size: Option<usize>,
}

impl EmbeddingModel {
    /// Load the named model, downloading it into `cache_dir/models` if it
    /// is not cached yet.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        options: ModelOptions,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let init = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(options.show_download_progress);

        let mut model =
            TextEmbedding::try_new(init).map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
            batch_size: options.batch_size,
        })
    }

    /// Parse model name string to fastembed enum.
    pub fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        use fastembed::EmbeddingModel as M;

        match name.to_lowercase().as_str() {
            "paraphrase-multilingual-minilm-l12-v2" | "paraphrasemlminilml12v2" => {
                Ok(M::ParaphraseMLMiniLML12V2)
            }
            "paraphrase-multilingual-minilm-l12-v2-q" | "paraphrasemlminilml12v2q" => {
                Ok(M::ParaphraseMLMiniLML12V2Q)
            }
            "paraphrase-multilingual-mpnet-base-v2" | "paraphrasemlmpnetbasev2" => {
                Ok(M::ParaphraseMLMpnetBaseV2)
            }
            "multilingual-e5-small" => Ok(M::MultilingualE5Small),
            "multilingual-e5-base" => Ok(M::MultilingualE5Base),
            "multilingual-e5-large" => Ok(M::MultilingualE5Large),
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(M::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(M::AllMiniLML6V2Q),
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(M::BGESmallENV15),
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => Ok(M::BGESmallENV15Q),
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(M::BGEBaseENV15),
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => Ok(M::BGEBaseENV15Q),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: paraphrase-multilingual-minilm-l12-v2, paraphrase-multilingual-mpnet-base-v2, multilingual-e5-{{small,base,large}}, all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl TextEncoder for EmbeddingModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = lock_recovering(&self.model);

        let embeddings = model
            .embed(texts.to_vec(), self.batch_size)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} embeddings, model returned {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }
}

/// Lock `mutex`, taking the guard back if an earlier holder panicked.
///
/// A panic inside one embedding run fails that request only; the model
/// itself holds no partial state between runs.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("model lock was poisoned by a panicked run, recovering");
        PoisonError::into_inner(poisoned)
    })
}
