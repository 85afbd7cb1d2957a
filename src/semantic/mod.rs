//! Semantic clustering of text keys.
//!
//! Groups differently-worded labels (paraphrases, translations, spelling
//! variants) that mean the same thing.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed behind the `TextEncoder` trait
//! - `distance`: Pairwise cosine distance matrix
//! - `cluster`: Average-linkage agglomerative clustering under a threshold
//! - `service`: Validation, lazy encoder loading and the request pipeline

pub mod cluster;
pub mod distance;
pub mod embeddings;
pub mod service;

pub use service::{ClusterError, ClusteringService};
