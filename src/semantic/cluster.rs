//! Average-linkage agglomerative clustering with a distance threshold.
//!
//! Every item starts as its own cluster. The two clusters with the smallest
//! average pairwise distance are merged while that distance is at most the
//! threshold. Cluster-to-cluster distances are maintained with the
//! Lance-Williams update for average linkage, so each merge costs one row
//! update instead of a rescan of all member pairs.
//!
//! # Determinism
//!
//! A cluster lives in the slot of its lowest member index. Among equally
//! close candidate pairs the one with the lowest `(slot, slot)` pair wins,
//! which makes the result a pure function of the distance matrix and the
//! threshold.

use std::time::Instant;

use super::distance::DistanceMatrix;

/// The clustering ran past its deadline; no partial result is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("clustering deadline exceeded after {merges} merges")]
pub struct DeadlineExceeded {
    pub merges: usize,
}

/// Threshold-stopped average-linkage clustering.
#[derive(Debug, Clone, Copy)]
pub struct AgglomerativeClustering {
    threshold: f64,
    deadline: Option<Instant>,
}

/// Closest higher-slot neighbour of a slot.
#[derive(Debug, Clone, Copy)]
struct Nearest {
    slot: usize,
    distance: f64,
}

impl AgglomerativeClustering {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold as f64,
            deadline: None,
        }
    }

    /// Abort with [`DeadlineExceeded`] once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Partition the items of `matrix`.
    ///
    /// Returns clusters of item indices. Indices inside a cluster are
    /// ascending and clusters are ordered by their lowest index.
    pub fn fit(&self, matrix: &DistanceMatrix) -> Result<Vec<Vec<usize>>, DeadlineExceeded> {
        if matrix.is_empty() {
            return Ok(vec![]);
        }
        let n = matrix.len();
        let linkage = (0..n * n)
            .map(|idx| matrix.get(idx / n, idx % n) as f64)
            .collect();
        self.merge(n, linkage)
    }

    /// Same as [`AgglomerativeClustering::fit`], but the `f32` matrix is
    /// released before merging starts, so only the `f64` linkage copy stays
    /// alive for the long phase.
    pub fn fit_owned(&self, matrix: DistanceMatrix) -> Result<Vec<Vec<usize>>, DeadlineExceeded> {
        let n = matrix.len();
        self.merge(n, matrix.into_f64())
    }

    fn merge(&self, n: usize, mut linkage: Vec<f64>) -> Result<Vec<Vec<usize>>, DeadlineExceeded> {
        if n == 0 {
            return Ok(vec![]);
        }

        let mut members: Vec<Option<Vec<usize>>> = (0..n).map(|i| Some(vec![i])).collect();
        let mut nearest: Vec<Option<Nearest>> = (0..n)
            .map(|i| Self::nearest_in_row(&linkage, &members, n, i))
            .collect();

        let mut merges = 0usize;
        loop {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(DeadlineExceeded { merges });
                }
            }

            let Some((a, b, distance)) = Self::closest_pair(&nearest) else {
                break;
            };
            if distance > self.threshold {
                break;
            }

            let size_a = members[a].as_ref().map_or(0, Vec::len) as f64;
            let size_b = members[b].as_ref().map_or(0, Vec::len) as f64;

            for k in 0..n {
                if k == a || k == b || members[k].is_none() {
                    continue;
                }
                let merged =
                    (size_a * linkage[a * n + k] + size_b * linkage[b * n + k]) / (size_a + size_b);
                linkage[a * n + k] = merged;
                linkage[k * n + a] = merged;
            }

            let absorbed = members[b].take().unwrap_or_default();
            if let Some(target) = members[a].as_mut() {
                target.extend(absorbed);
            }
            nearest[b] = None;
            merges += 1;

            log::trace!("merged slot {b} into slot {a} at distance {distance:.4}");

            // Row `a` changed entirely; rows below `a` changed in column `a`
            // and lost column `b`. Rows above `a` only hold higher slots and
            // are untouched except for losing `b`.
            nearest[a] = Self::nearest_in_row(&linkage, &members, n, a);
            for k in 0..n {
                if k == a || members[k].is_none() {
                    continue;
                }
                let Some(current) = nearest[k] else {
                    continue;
                };
                if current.slot == a || current.slot == b {
                    nearest[k] = Self::nearest_in_row(&linkage, &members, n, k);
                } else if k < a {
                    let candidate = linkage[k * n + a];
                    if candidate < current.distance
                        || (candidate == current.distance && a < current.slot)
                    {
                        nearest[k] = Some(Nearest {
                            slot: a,
                            distance: candidate,
                        });
                    }
                }
            }
        }

        let mut clusters: Vec<Vec<usize>> = members.into_iter().flatten().collect();
        for cluster in clusters.iter_mut() {
            cluster.sort_unstable();
        }
        clusters.sort_by_key(|cluster| cluster[0]);

        Ok(clusters)
    }

    /// Nearest live slot above `row`, lowest slot first on ties. NaN
    /// distances never qualify.
    fn nearest_in_row(
        linkage: &[f64],
        members: &[Option<Vec<usize>>],
        n: usize,
        row: usize,
    ) -> Option<Nearest> {
        let mut best: Option<Nearest> = None;
        for slot in (row + 1)..n {
            if members[slot].is_none() {
                continue;
            }
            let distance = linkage[row * n + slot];
            if distance.is_nan() {
                continue;
            }
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Nearest { slot, distance });
            }
        }
        best
    }

    /// Globally closest pair, lowest row first on ties.
    fn closest_pair(nearest: &[Option<Nearest>]) -> Option<(usize, usize, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for (row, candidate) in nearest.iter().enumerate() {
            let Some(candidate) = candidate else {
                continue;
            };
            if best.map_or(true, |(_, _, d)| candidate.distance < d) {
                best = Some((row, candidate.slot, candidate.distance));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f32]]) -> DistanceMatrix {
        DistanceMatrix::from_fn(rows.len(), |i, j| rows[i][j])
    }

    #[test]
    fn test_empty_and_single() {
        let clustering = AgglomerativeClustering::new(0.5);
        assert!(clustering.fit(&DistanceMatrix::from_fn(0, |_, _| 0.0)).unwrap().is_empty());
        assert_eq!(
            clustering.fit(&DistanceMatrix::from_fn(1, |_, _| 0.0)).unwrap(),
            vec![vec![0]]
        );
    }

    #[test]
    fn test_two_pairs() {
        let m = matrix(&[
            &[0.0, 0.1, 0.9, 0.8],
            &[0.1, 0.0, 0.85, 0.95],
            &[0.9, 0.85, 0.0, 0.05],
            &[0.8, 0.95, 0.05, 0.0],
        ]);
        let clusters = AgglomerativeClustering::new(0.4).fit(&m).unwrap();
        assert_eq!(clusters, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let m = matrix(&[&[0.0, 0.25], &[0.25, 0.0]]);
        assert_eq!(
            AgglomerativeClustering::new(0.25).fit(&m).unwrap(),
            vec![vec![0, 1]]
        );
        assert_eq!(
            AgglomerativeClustering::new(0.2499).fit(&m).unwrap(),
            vec![vec![0], vec![1]]
        );
    }

    #[test]
    fn test_zero_threshold_merges_only_exact_duplicates() {
        let m = matrix(&[
            &[0.0, 0.0, 0.01, 0.0],
            &[0.0, 0.0, 0.01, 0.0],
            &[0.01, 0.01, 0.0, 0.01],
            &[0.0, 0.0, 0.01, 0.0],
        ]);
        let clusters = AgglomerativeClustering::new(0.0).fit(&m).unwrap();
        assert_eq!(clusters, vec![vec![0, 1, 3], vec![2]]);
    }

    #[test]
    fn test_average_linkage_not_single_linkage() {
        // 0-1 are close, 2 is close to 1 only. Single linkage would chain
        // all three at 0.3; the average from {0,1} to 2 is (0.9 + 0.3) / 2.
        let m = matrix(&[
            &[0.0, 0.1, 0.9],
            &[0.1, 0.0, 0.3],
            &[0.9, 0.3, 0.0],
        ]);
        assert_eq!(
            AgglomerativeClustering::new(0.5).fit(&m).unwrap(),
            vec![vec![0, 1], vec![2]]
        );
        assert_eq!(
            AgglomerativeClustering::new(0.6).fit(&m).unwrap(),
            vec![vec![0, 1, 2]]
        );
    }

    #[test]
    fn test_ties_break_towards_lowest_indices() {
        // Every pair is at the same distance; the first merge must be (0, 1),
        // after which {0,1}-2 and {0,1}-3 and 2-3 are all still tied.
        let m = DistanceMatrix::from_fn(4, |_, _| 0.3);
        let clusters = AgglomerativeClustering::new(0.3).fit(&m).unwrap();
        assert_eq!(clusters, vec![vec![0, 1, 2, 3]]);

        let m = matrix(&[
            &[0.0, 0.2, 0.2, 1.0],
            &[0.2, 0.0, 1.0, 0.2],
            &[0.2, 1.0, 0.0, 1.0],
            &[1.0, 0.2, 1.0, 0.0],
        ]);
        // (0,1), (0,2) and (1,3) tie at 0.2; (0,1) wins, leaving both
        // remaining items at an average of 0.6 from {0,1}.
        let clusters = AgglomerativeClustering::new(0.3).fit(&m).unwrap();
        assert_eq!(clusters, vec![vec![0, 1], vec![2], vec![3]]);
    }

    #[test]
    fn test_owned_matrix_gives_same_partition() {
        let m = matrix(&[
            &[0.0, 0.1, 0.9, 0.8],
            &[0.1, 0.0, 0.85, 0.95],
            &[0.9, 0.85, 0.0, 0.05],
            &[0.8, 0.95, 0.05, 0.0],
        ]);
        let clustering = AgglomerativeClustering::new(0.4);
        let borrowed = clustering.fit(&m).unwrap();
        assert_eq!(clustering.fit_owned(m).unwrap(), borrowed);
    }

    #[test]
    fn test_nan_never_merges() {
        let m = matrix(&[&[0.0, f32::NAN], &[f32::NAN, 0.0]]);
        assert_eq!(
            AgglomerativeClustering::new(1.0).fit(&m).unwrap(),
            vec![vec![0], vec![1]]
        );
    }

    #[test]
    fn test_expired_deadline_aborts() {
        let m = DistanceMatrix::from_fn(3, |_, _| 0.1);
        let result = AgglomerativeClustering::new(0.5)
            .with_deadline(Some(Instant::now()))
            .fit(&m);
        assert_eq!(result, Err(DeadlineExceeded { merges: 0 }));
    }
}
