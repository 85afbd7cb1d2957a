//! Pairwise cosine distances over a batch of embeddings.

use rayon::prelude::*;

/// Errors that can occur while building a distance matrix.
#[derive(Debug, thiserror::Error)]
pub enum DistanceError {
    #[error("Dimension mismatch at row {row}: expected {expected}, got {got}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("Embeddings have zero dimensions")]
    EmptyEmbedding,
}

/// Symmetric N×N matrix of cosine distances, stored row-major.
///
/// The diagonal is zero. Off-diagonal entries are `1 - cos(a, b)` and lie in
/// `[0, 2]`; they are not clamped at 1, so anti-correlated pairs stay far apart.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f32>,
}

impl DistanceMatrix {
    /// Compute all pairwise distances. Rows are filled in parallel.
    pub fn from_embeddings<V>(embeddings: &[V]) -> Result<Self, DistanceError>
    where
        V: AsRef<[f32]> + Sync,
    {
        let n = embeddings.len();
        if let Some(first) = embeddings.first() {
            let expected = first.as_ref().len();
            if expected == 0 {
                return Err(DistanceError::EmptyEmbedding);
            }
            for (row, embedding) in embeddings.iter().enumerate() {
                let got = embedding.as_ref().len();
                if got != expected {
                    return Err(DistanceError::DimensionMismatch { row, expected, got });
                }
            }
        }

        let norms: Vec<f32> = embeddings.iter().map(|v| l2_norm(v.as_ref())).collect();

        let mut data = vec![0.0f32; n * n];
        if n > 0 {
            data.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
                let a = embeddings[i].as_ref();
                for (j, cell) in row.iter_mut().enumerate() {
                    if i != j {
                        *cell = distance_with_norms(a, embeddings[j].as_ref(), norms[i], norms[j]);
                    }
                }
            });
        }

        Ok(Self { n, data })
    }

    /// Build a matrix from an arbitrary distance function.
    ///
    /// `f` is only called for `i < j`; the lower triangle mirrors it and the
    /// diagonal is zero.
    pub fn from_fn(n: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = vec![0.0f32; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = f(i, j);
                data[i * n + j] = d;
                data[j * n + i] = d;
            }
        }
        Self { n, data }
    }

    /// Number of rows (and columns).
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Widen to `f64`, consuming the matrix.
    pub fn into_f64(self) -> Vec<f64> {
        self.data.into_iter().map(f64::from).collect()
    }

    /// Distance between items `i` and `j`.
    ///
    /// # Panics
    /// If either index is out of bounds.
    pub fn get(&self, i: usize, j: usize) -> f32 {
        assert!(i < self.n && j < self.n, "index ({i}, {j}) out of bounds for {}", self.n);
        self.data[i * self.n + j]
    }
}

/// Cosine distance between two vectors: `1 - cos(a, b)`.
///
/// Bitwise-equal vectors are at distance exactly 0. A zero-norm operand has
/// no direction and is treated as orthogonal (distance 1).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    distance_with_norms(a, b, l2_norm(a), l2_norm(b))
}

fn distance_with_norms(a: &[f32], b: &[f32], norm_a: f32, norm_b: f32) -> f32 {
    if a == b && norm_a >= f32::EPSILON {
        return 0.0;
    }
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 1.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (1.0 - dot_product / (norm_a * norm_b)).max(0.0)
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors_are_at_zero() {
        let v = vec![0.3, -0.7, 0.2];
        assert_eq!(cosine_distance(&v, &v), 0.0);
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_scale_invariant() {
        let d = cosine_distance(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]);
        assert!(d < 1e-6);
        assert!(d >= 0.0);
    }

    #[test]
    fn test_zero_vector_is_orthogonal_to_everything() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[0.0, 0.0]), 1.0);
    }

    #[test]
    fn test_matrix_is_symmetric_with_zero_diagonal() {
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.8, 0.6, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![-0.5, 0.5, 0.5],
        ];
        let matrix = DistanceMatrix::from_embeddings(&embeddings).unwrap();

        assert_eq!(matrix.len(), 4);
        for i in 0..4 {
            assert_eq!(matrix.get(i, i), 0.0);
            for j in 0..4 {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
                assert!(matrix.get(i, j) >= 0.0);
            }
        }
        assert!((matrix.get(0, 1) - 0.2).abs() < 1e-6);
        assert!((matrix.get(0, 2) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]];
        let err = DistanceMatrix::from_embeddings(&embeddings).unwrap_err();
        assert!(matches!(
            err,
            DistanceError::DimensionMismatch { row: 1, expected: 2, got: 3 }
        ));
    }

    #[test]
    fn test_empty_dimension_is_rejected() {
        let embeddings: Vec<Vec<f32>> = vec![vec![], vec![]];
        assert!(matches!(
            DistanceMatrix::from_embeddings(&embeddings),
            Err(DistanceError::EmptyEmbedding)
        ));
    }

    #[test]
    fn test_empty_input() {
        let embeddings: Vec<Vec<f32>> = vec![];
        let matrix = DistanceMatrix::from_embeddings(&embeddings).unwrap();
        assert!(matrix.is_empty());
    }

    #[test]
    fn test_into_f64_keeps_layout() {
        let matrix = DistanceMatrix::from_fn(2, |_, _| 0.5);
        assert_eq!(matrix.into_f64(), vec![0.0, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_from_fn_mirrors_upper_triangle() {
        let matrix = DistanceMatrix::from_fn(3, |i, j| (i + j) as f32 / 10.0);
        assert_eq!(matrix.get(0, 1), 0.1);
        assert_eq!(matrix.get(1, 0), 0.1);
        assert_eq!(matrix.get(2, 1), 0.3);
        assert_eq!(matrix.get(2, 2), 0.0);
    }
}
