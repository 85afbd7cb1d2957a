
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::ClusteringConfig;
use crate::semantic::embeddings::{EmbeddingError, TextEncoder};
use crate::semantic::ClusteringService;

/// Deterministic encoder over a fixed vocabulary. Unknown keys fail, which
/// doubles as a way to provoke encoder errors mid-request.
pub struct FixtureEncoder {
    vectors: HashMap<&'static str, Vec<f32>>,
}

impl FixtureEncoder {
    pub fn new() -> Self {
        let vectors = HashMap::from([
            ("price", vec![1.0, 0.1, 0.0, 0.0]),
            ("cost", vec![0.95, 0.25, 0.0, 0.05]),
            ("цена", vec![0.98, 0.15, 0.02, 0.0]),
            ("color", vec![0.0, 0.05, 1.0, 0.1]),
            ("colour", vec![0.0, 0.0, 0.97, 0.2]),
            ("weight", vec![0.0, 1.0, 0.0, 0.0]),
            ("discount", vec![-1.0, -0.1, 0.0, 0.0]),
        ]);
        Self { vectors }
    }
}

impl TextEncoder for FixtureEncoder {
    fn name(&self) -> &str {
        "fixture"
    }

    fn dimensions(&self) -> usize {
        4
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts
            .iter()
            .map(|text| {
                self.vectors.get(text.as_str()).cloned().ok_or_else(|| {
                    EmbeddingError::EmbeddingFailed(format!("no fixture vector for {text:?}"))
                })
            })
            .collect()
    }
}

/// Service over [`FixtureEncoder`] plus a counter of encoder loads.
pub fn fixture_service() -> (ClusteringService, Arc<AtomicUsize>) {
    fixture_service_with(ClusteringConfig::default())
}

pub fn fixture_service_with(config: ClusteringConfig) -> (ClusteringService, Arc<AtomicUsize>) {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let service = ClusteringService::with_loader(
        config,
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            // widen the window for racing first callers
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Box::new(FixtureEncoder::new()) as Box<dyn TextEncoder>)
        }),
    );
    (service, loads)
}

pub fn keys(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Sort clusters and their members so partitions compare as sets of sets.
pub fn canonical(mut clusters: Vec<Vec<String>>) -> Vec<Vec<String>> {
    for cluster in clusters.iter_mut() {
        cluster.sort();
    }
    clusters.sort();
    clusters
}
