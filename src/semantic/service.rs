//! Clustering service: validation and the encode → distance → cluster pipeline.
//!
//! - Owns the text encoder, loading it at most once per service instance
//! - Rejects bad input before any model work happens
//! - Keeps validation failures and infrastructure failures apart at the type level

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;

use crate::config::{ClusteringConfig, EncoderConfig};
use crate::semantic::cluster::AgglomerativeClustering;
use crate::semantic::distance::{DistanceError, DistanceMatrix};
use crate::semantic::embeddings::{EmbeddingError, EmbeddingModel, ModelOptions, TextEncoder};

/// Smallest distance between two different strings.
const DISTINCT_KEY_FLOOR: f32 = f32::EPSILON;

/// Builds the encoder the first time it is needed.
pub type EncoderLoader =
    Box<dyn Fn() -> Result<Box<dyn TextEncoder>, EmbeddingError> + Send + Sync>;

/// Request input that fails the preconditions of [`ClusteringService::cluster`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid `{field}`: {reason}")]
pub struct ValidationError {
    /// Name of the offending request field.
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// The encoder or the numeric pipeline behind it failed.
#[derive(Debug, thiserror::Error)]
pub enum InfrastructureError {
    #[error("Encoder error: {0}")]
    Encoder(#[from] EmbeddingError),

    #[error("Distance error: {0}")]
    Distance(#[from] DistanceError),
}

/// Errors returned by [`ClusteringService::cluster`].
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    #[error("Clustering did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl From<EmbeddingError> for ClusterError {
    fn from(err: EmbeddingError) -> Self {
        ClusterError::Infrastructure(err.into())
    }
}

impl From<DistanceError> for ClusterError {
    fn from(err: DistanceError) -> Self {
        ClusterError::Infrastructure(err.into())
    }
}

/// Liveness snapshot of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    /// Whether the encoder has been loaded.
    pub loaded: bool,
}

/// Groups text keys into clusters of near-synonyms.
///
/// The encoder is loaded lazily on first use. Concurrent first callers block
/// on the same initialization and all observe the one loaded instance. A
/// failed load leaves the service unloaded so a later request can retry.
pub struct ClusteringService {
    config: ClusteringConfig,
    loader: EncoderLoader,
    encoder: OnceCell<Box<dyn TextEncoder>>,
}

impl ClusteringService {
    /// Create a service backed by a fastembed model cached under `base_path`.
    pub fn new(config: ClusteringConfig, encoder: EncoderConfig, base_path: PathBuf) -> Self {
        let loader: EncoderLoader = Box::new(move || {
            let options = ModelOptions {
                batch_size: encoder.batch_size,
                show_download_progress: encoder.show_download_progress,
            };
            let model = EmbeddingModel::new(&encoder.model, base_path.clone(), options)?;
            Ok(Box::new(model) as Box<dyn TextEncoder>)
        });
        Self::with_loader(config, loader)
    }

    /// Create a service with a custom encoder loader.
    pub fn with_loader(config: ClusteringConfig, loader: EncoderLoader) -> Self {
        Self {
            config,
            loader,
            encoder: OnceCell::new(),
        }
    }

    /// Get the configured default threshold.
    pub fn default_threshold(&self) -> f32 {
        self.config.default_threshold
    }

    /// Check if the encoder has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.encoder.get().is_some()
    }

    pub fn health(&self) -> Health {
        Health {
            loaded: self.is_loaded(),
        }
    }

    /// Load the encoder now instead of on the first request.
    pub fn initialize(&self) -> Result<(), ClusterError> {
        self.encoder().map(|_| ())
    }

    /// Partition `keys` into clusters of near-synonyms.
    ///
    /// Every input occurrence lands in exactly one cluster, duplicates
    /// included. Clusters are ordered by the position of their first key and
    /// keys inside a cluster keep their input order.
    pub fn cluster(&self, keys: &[String], threshold: f32) -> Result<Vec<Vec<String>>, ClusterError> {
        self.validate(keys, threshold)?;

        log::info!("Clustering {} keys with threshold {}", keys.len(), threshold);

        let encoder = self.encoder()?;

        if keys.len() == 1 {
            return Ok(vec![keys.to_vec()]);
        }

        let deadline = self.timeout().map(|timeout| (Instant::now() + timeout, timeout));

        // Equal keys share one embedding.
        let mut unique: Vec<String> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let slots: Vec<usize> = keys
            .iter()
            .map(|key| {
                *positions.entry(key.as_str()).or_insert_with(|| {
                    unique.push(key.clone());
                    unique.len() - 1
                })
            })
            .collect();

        log::debug!("Encoding {} unique keys", unique.len());
        let embeddings = encoder.embed_batch(&unique)?;
        if embeddings.len() != unique.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} embeddings, encoder returned {}",
                unique.len(),
                embeddings.len()
            ))
            .into());
        }

        let unique_matrix = DistanceMatrix::from_embeddings(&embeddings)?;
        drop(embeddings);

        // Only occurrences of the same string sit at zero. Distinct strings
        // keep a positive floor even when their vectors coincide.
        let matrix = DistanceMatrix::from_fn(keys.len(), |i, j| {
            let (a, b) = (slots[i], slots[j]);
            if a == b {
                return 0.0;
            }
            let distance = unique_matrix.get(a, b);
            if distance < DISTINCT_KEY_FLOOR {
                DISTINCT_KEY_FLOOR
            } else {
                distance
            }
        });
        drop(unique_matrix);

        let groups = AgglomerativeClustering::new(threshold)
            .with_deadline(deadline.map(|(at, _)| at))
            .fit_owned(matrix)
            .map_err(|err| {
                log::warn!("Clustering of {} keys aborted: {}", keys.len(), err);
                ClusterError::DeadlineExceeded(deadline.map_or(Duration::ZERO, |(_, t)| t))
            })?;

        let clusters: Vec<Vec<String>> = groups
            .into_iter()
            .map(|group| group.into_iter().map(|idx| keys[idx].clone()).collect())
            .collect();

        log::info!("Found {} clusters", clusters.len());

        Ok(clusters)
    }

    fn validate(&self, keys: &[String], threshold: f32) -> Result<(), ValidationError> {
        if keys.is_empty() {
            return Err(ValidationError::new("keys", "Keys list cannot be empty"));
        }
        if keys.len() > self.config.max_keys {
            return Err(ValidationError::new(
                "keys",
                format!(
                    "at most {} keys are allowed, got {}",
                    self.config.max_keys,
                    keys.len()
                ),
            ));
        }
        if let Some(idx) = keys.iter().position(|key| key.trim().is_empty()) {
            return Err(ValidationError::new(
                "keys",
                format!("key at position {idx} is blank"),
            ));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ValidationError::new(
                "threshold",
                format!("Threshold must be between 0 and 1, got {threshold}"),
            ));
        }
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        match self.config.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    fn encoder(&self) -> Result<&dyn TextEncoder, ClusterError> {
        let encoder = self.encoder.get_or_try_init(|| {
            log::info!("Loading text encoder...");
            let started = Instant::now();
            let encoder = (self.loader)().map_err(|err| {
                log::error!("Failed to load text encoder: {err}");
                err
            })?;
            log::info!(
                "Text encoder '{}' loaded in {:.2?} ({} dimensions)",
                encoder.name(),
                started.elapsed(),
                encoder.dimensions()
            );
            Ok::<_, EmbeddingError>(encoder)
        })?;
        Ok(&**encoder)
    }
}
