//! Spatial statistics over a labelled point set.
//!
//! - Moran's I of the lineage labels, pooled over one-hot indicators;
//! - α, the mean within-lineage pairwise distance;
//! - β, the mean distance between founder centroids.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::diffuser::SpatialPoint;
use super::weights::neighbor_lists;
use crate::config::{AdjacencyMethod, MetricsConfig};
use crate::distance::{centroid, coords_from_pairs, euclidean_distance_matrix, mean_pairwise_distance};
use crate::error::{LineageError, Result};
use crate::tree::NodeId;

/// Summary of one lineage's points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineageBreakdown {
    pub count: usize,
    pub centroid: (f64, f64),
    /// Mean pairwise distance; 0 for a single point.
    pub spread: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialMetricsReport {
    pub moran_i: f64,
    pub alpha: f64,
    pub beta: f64,
    pub per_lineage_breakdown: BTreeMap<NodeId, LineageBreakdown>,
}

pub struct SpatialMetricsEngine {
    method: AdjacencyMethod,
    parameter: f64,
}

impl SpatialMetricsEngine {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            method: config.spatial_adjacency_method,
            parameter: config.adjacency_parameter,
        }
    }

    /// Compute Moran's I, α, β and the per-lineage breakdown.
    ///
    /// # Arguments
    /// * `points` - Labelled points of one sample
    ///
    /// # Returns
    /// The report, or [`LineageError::EmptyPointSet`] /
    /// [`LineageError::DegenerateVariance`] when the statistics are undefined.
    pub fn compute_metrics(&self, points: &[SpatialPoint]) -> Result<SpatialMetricsReport> {
        let first = points.first().ok_or(LineageError::EmptyPointSet)?;
        if points.iter().all(|p| p.x == first.x && p.y == first.y) {
            return Err(LineageError::DegenerateVariance {
                n_points: points.len(),
            });
        }

        let pairs: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
        let coords = coords_from_pairs(&pairs);

        let mut by_lineage: BTreeMap<NodeId, Vec<usize>> = BTreeMap::new();
        let mut by_founder: BTreeMap<NodeId, Vec<usize>> = BTreeMap::new();
        for (i, p) in points.iter().enumerate() {
            by_lineage.entry(p.lineage_label).or_default().push(i);
            by_founder.entry(p.founder_id).or_default().push(i);
        }

        let moran_i = self.moran_i(&coords, points, &by_lineage);

        let per_lineage_breakdown: BTreeMap<NodeId, LineageBreakdown> = by_lineage
            .iter()
            .map(|(&label, members)| (label, breakdown(&pairs, members)))
            .collect();

        let spreads: Vec<f64> = per_lineage_breakdown
            .values()
            .filter(|b| b.count >= 2)
            .map(|b| b.spread)
            .collect();
        let alpha = if spreads.is_empty() {
            0.0
        } else {
            spreads.iter().sum::<f64>() / spreads.len() as f64
        };

        let founder_centroids: Vec<(f64, f64)> = by_founder
            .values()
            .map(|members| breakdown(&pairs, members).centroid)
            .collect();
        let beta = founder_separation(&founder_centroids);

        log::debug!(
            "metrics over {} points, {} lineages: I={:.4} alpha={:.4} beta={:.4}",
            points.len(),
            by_lineage.len(),
            moran_i,
            alpha,
            beta
        );

        Ok(SpatialMetricsReport {
            moran_i,
            alpha,
            beta,
            per_lineage_breakdown,
        })
    }

    /// Pooled Moran's I of the one-hot lineage indicators.
    ///
    /// For labels a, b of a neighbouring pair the pooled cross-product is
    /// Σ_L (δ_aL - p_L)(δ_bL - p_L) = δ_ab - p_a - p_b + Σ_L p_L², and the
    /// pooled variance is n Σ_L p_L (1 - p_L).
    fn moran_i(
        &self,
        coords: &Array2<f64>,
        points: &[SpatialPoint],
        by_lineage: &BTreeMap<NodeId, Vec<usize>>,
    ) -> f64 {
        if by_lineage.len() < 2 {
            log::debug!("single lineage, Moran's I defined as 0");
            return 0.0;
        }

        let n = points.len() as f64;
        let index: BTreeMap<NodeId, usize> =
            by_lineage.keys().enumerate().map(|(i, &l)| (l, i)).collect();
        let freq: Vec<f64> = by_lineage.values().map(|m| m.len() as f64 / n).collect();
        let labels: Vec<usize> = points.iter().map(|p| index[&p.lineage_label]).collect();

        let sum_sq: f64 = freq.iter().map(|p| p * p).sum();
        let denominator: f64 = n * freq.iter().map(|p| p * (1.0 - p)).sum::<f64>();

        let neighbors = neighbor_lists(coords.view(), self.method, self.parameter);
        let s0: usize = neighbors.iter().map(Vec::len).sum();
        if s0 == 0 {
            log::warn!("no neighbour pairs under {:?} adjacency, Moran's I defined as 0", self.method);
            return 0.0;
        }

        let mut numerator = 0.0;
        for (i, list) in neighbors.iter().enumerate() {
            let a = labels[i];
            for &j in list {
                let b = labels[j];
                let same = if a == b { 1.0 } else { 0.0 };
                numerator += same - freq[a] - freq[b] + sum_sq;
            }
        }

        let i = (n / s0 as f64) * numerator / denominator;
        i.clamp(-1.0, 1.0)
    }
}

fn breakdown(pairs: &[(f64, f64)], members: &[usize]) -> LineageBreakdown {
    let subset: Vec<(f64, f64)> = members.iter().map(|&i| pairs[i]).collect();
    let coords = coords_from_pairs(&subset);
    let centre = centroid(coords.view()).map_or((0.0, 0.0), |c| (c[0], c[1]));
    LineageBreakdown {
        count: members.len(),
        centroid: centre,
        spread: mean_pairwise_distance(coords.view()).unwrap_or(0.0),
    }
}

/// Mean pairwise distance between founder centroids; 0 with one founder.
fn founder_separation(centroids: &[(f64, f64)]) -> f64 {
    let n = centroids.len();
    if n < 2 {
        return 0.0;
    }
    let dist = euclidean_distance_matrix(coords_from_pairs(centroids).view());
    let upper: f64 = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| dist[[i, j]])
        .sum();
    upper / (n * (n - 1) / 2) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn point(x: f64, y: f64, lineage_label: NodeId, founder_id: NodeId) -> SpatialPoint {
        SpatialPoint {
            x,
            y,
            lineage_label,
            founder_id,
        }
    }

    /// Three tight 2x5 grids far apart, one lineage each.
    fn clustered_points() -> Vec<SpatialPoint> {
        let centres = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        let mut points = Vec::new();
        for (label, &(cx, cy)) in centres.iter().enumerate() {
            for r in 0..2 {
                for c in 0..5 {
                    points.push(point(cx + 0.1 * c as f64, cy + 0.1 * r as f64, label, label));
                }
            }
        }
        points
    }

    fn knn_engine(k: f64) -> SpatialMetricsEngine {
        SpatialMetricsEngine::new(&MetricsConfig {
            spatial_adjacency_method: AdjacencyMethod::Knn,
            adjacency_parameter: k,
        })
    }

    #[test]
    fn test_segregated_lineages_have_maximal_autocorrelation() {
        let report = knn_engine(4.0).compute_metrics(&clustered_points()).unwrap();
        assert!((report.moran_i - 1.0).abs() < 1e-9, "I = {}", report.moran_i);
        assert_eq!(report.per_lineage_breakdown.len(), 3);
        assert!(report.per_lineage_breakdown.values().all(|b| b.count == 10));
    }

    #[test]
    fn test_shuffled_labels_lower_moran_i() {
        let clustered = clustered_points();
        let mut labels: Vec<NodeId> = clustered.iter().map(|p| p.lineage_label).collect();
        labels.shuffle(&mut StdRng::seed_from_u64(11));
        let shuffled: Vec<SpatialPoint> = clustered
            .iter()
            .zip(&labels)
            .map(|(p, &l)| point(p.x, p.y, l, p.founder_id))
            .collect();

        let engine = knn_engine(4.0);
        let i_clustered = engine.compute_metrics(&clustered).unwrap().moran_i;
        let i_shuffled = engine.compute_metrics(&shuffled).unwrap().moran_i;
        assert!(i_shuffled < 0.5, "shuffled I = {}", i_shuffled);
        assert!(i_clustered > i_shuffled);
    }

    /// Uniform points in the unit square with three lineages assigned at random.
    fn random_labelled_points(n: usize, seed: u64) -> Vec<SpatialPoint> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut labels: Vec<NodeId> = (0..n).map(|i| i % 3).collect();
        labels.shuffle(&mut rng);
        labels
            .into_iter()
            .map(|label| point(rng.gen::<f64>(), rng.gen::<f64>(), label, label))
            .collect()
    }

    fn mean_abs_moran_i(n: usize, seeds: std::ops::Range<u64>) -> f64 {
        let engine = knn_engine(8.0);
        let trials = seeds.end - seeds.start;
        let total: f64 = seeds
            .map(|seed| {
                let points = random_labelled_points(n, seed);
                engine.compute_metrics(&points).unwrap().moran_i.abs()
            })
            .sum();
        total / trials as f64
    }

    #[test]
    fn test_random_labels_large_sample_near_zero() {
        let points = random_labelled_points(1200, 5);
        let report = knn_engine(8.0).compute_metrics(&points).unwrap();
        assert!(report.moran_i.abs() < 0.05, "I = {}", report.moran_i);
    }

    #[test]
    fn test_random_labels_shrink_with_sample_size() {
        let small = mean_abs_moran_i(50, 0..20);
        let large = mean_abs_moran_i(1200, 100..106);
        assert!(large < 0.05, "large-sample mean |I| = {}", large);
        assert!(large < small, "mean |I|: n=50 {} vs n=1200 {}", small, large);
    }

    #[test]
    fn test_moran_i_bounded() {
        // Alternating labels on a line: negative autocorrelation
        let points: Vec<SpatialPoint> = (0..20)
            .map(|i| point(i as f64, 0.0, i % 2, 0))
            .collect();
        let report = knn_engine(2.0).compute_metrics(&points).unwrap();
        assert!(report.moran_i < 0.0);
        assert!(report.moran_i >= -1.0);
    }

    #[test]
    fn test_single_lineage_moran_zero() {
        let points = vec![point(0.0, 0.0, 3, 3), point(1.0, 0.0, 3, 3), point(0.0, 1.0, 3, 3)];
        let report = knn_engine(2.0).compute_metrics(&points).unwrap();
        assert_eq!(report.moran_i, 0.0);
        assert_eq!(report.beta, 0.0);
        assert!(report.alpha > 0.0);
    }

    #[test]
    fn test_isolated_points_under_distance_band() {
        let engine = SpatialMetricsEngine::new(&MetricsConfig {
            spatial_adjacency_method: AdjacencyMethod::DistanceBand,
            adjacency_parameter: 0.01,
        });
        let points = vec![point(0.0, 0.0, 0, 0), point(1.0, 0.0, 1, 1)];
        let report = engine.compute_metrics(&points).unwrap();
        assert_eq!(report.moran_i, 0.0);
    }

    #[test]
    fn test_alpha_and_beta() {
        let points = vec![
            point(0.0, 0.0, 0, 0),
            point(2.0, 0.0, 0, 0),
            point(3.0, 4.0, 1, 1),
            point(3.0, 4.0, 2, 1),
        ];
        let report = knn_engine(1.0).compute_metrics(&points).unwrap();

        // Only lineage 0 has two points
        assert!((report.alpha - 2.0).abs() < 1e-12);
        // Founder centroids (1, 0) and (3, 4)
        assert!((report.beta - 20.0f64.sqrt()).abs() < 1e-12);

        let lineage = &report.per_lineage_breakdown[&0];
        assert_eq!(lineage.centroid, (1.0, 0.0));
        assert_eq!(report.per_lineage_breakdown[&2].spread, 0.0);
    }

    #[test]
    fn test_empty_and_degenerate_inputs() {
        let engine = knn_engine(8.0);
        assert!(matches!(engine.compute_metrics(&[]), Err(LineageError::EmptyPointSet)));

        let single = [point(0.5, 0.5, 0, 0)];
        assert!(matches!(
            engine.compute_metrics(&single),
            Err(LineageError::DegenerateVariance { n_points: 1 })
        ));

        let stacked = [point(0.5, 0.5, 0, 0), point(0.5, 0.5, 1, 1)];
        assert!(matches!(
            engine.compute_metrics(&stacked),
            Err(LineageError::DegenerateVariance { n_points: 2 })
        ));
    }
}
