//! Binary spatial weights as per-point neighbour lists.
//!
//! Rows are built independently in parallel; the full distance matrix is
//! never stored. Self-pairs are always excluded.

use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::config::AdjacencyMethod;
use crate::distance::euclidean_pair;

/// Neighbour lists for the configured adjacency.
///
/// For [`AdjacencyMethod::Knn`] the parameter is truncated to an integer `k`.
pub fn neighbor_lists(
    coords: ArrayView2<f64>,
    method: AdjacencyMethod,
    parameter: f64,
) -> Vec<Vec<usize>> {
    match method {
        AdjacencyMethod::Knn => knn_neighbors(coords, parameter.max(0.0) as usize),
        AdjacencyMethod::DistanceBand => distance_band_neighbors(coords, parameter),
    }
}

/// The `k` nearest other points of each point, ties broken by index.
pub fn knn_neighbors(coords: ArrayView2<f64>, k: usize) -> Vec<Vec<usize>> {
    let n = coords.nrows();
    let k = k.min(n.saturating_sub(1));

    (0..n)
        .into_par_iter()
        .map(|i| {
            let mut candidates: Vec<(f64, usize)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (euclidean_pair(coords.row(i), coords.row(j)), j))
                .collect();
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            candidates.truncate(k);
            candidates.into_iter().map(|(_, j)| j).collect()
        })
        .collect()
}

/// All other points within `radius` (inclusive).
pub fn distance_band_neighbors(coords: ArrayView2<f64>, radius: f64) -> Vec<Vec<usize>> {
    let n = coords.nrows();

    (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .filter(|&j| j != i && euclidean_pair(coords.row(i), coords.row(j)) <= radius)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::coords_from_pairs;

    #[test]
    fn test_knn_excludes_self_and_orders_by_distance() {
        let coords = coords_from_pairs(&[(0.0, 0.0), (1.0, 0.0), (3.0, 0.0), (0.0, 0.5)]);
        let lists = knn_neighbors(coords.view(), 2);
        assert_eq!(lists[0], vec![3, 1]);
        assert_eq!(lists[2], vec![1, 0]);
        assert!(lists.iter().enumerate().all(|(i, l)| !l.contains(&i)));
    }

    #[test]
    fn test_knn_ties_by_index() {
        let coords = coords_from_pairs(&[(0.0, 0.0), (1.0, 0.0), (-1.0, 0.0), (0.0, 1.0)]);
        let lists = knn_neighbors(coords.view(), 2);
        assert_eq!(lists[0], vec![1, 2]);
    }

    #[test]
    fn test_knn_caps_k() {
        let coords = coords_from_pairs(&[(0.0, 0.0), (1.0, 0.0)]);
        let lists = knn_neighbors(coords.view(), 8);
        assert_eq!(lists, vec![vec![1], vec![0]]);
    }

    #[test]
    fn test_distance_band() {
        let coords = coords_from_pairs(&[(0.0, 0.0), (1.0, 0.0), (5.0, 0.0)]);
        let lists = neighbor_lists(coords.view(), AdjacencyMethod::DistanceBand, 1.0);
        assert_eq!(lists, vec![vec![1], vec![0], vec![]]);
    }
}
