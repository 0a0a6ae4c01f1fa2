//! Euclidean distances over 2-D point sets.
//!
//! Coordinates are held as an `(n, 2)` array. Pairwise work is split over the
//! upper triangle with rayon; per-row partial sums are combined sequentially
//! so that results do not depend on the thread count.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

/// Pack `(x, y)` pairs into an `(n, 2)` coordinate array.
pub fn coords_from_pairs(pairs: &[(f64, f64)]) -> Array2<f64> {
    let mut coords = Array2::<f64>::zeros((pairs.len(), 2));
    for (i, &(x, y)) in pairs.iter().enumerate() {
        coords[[i, 0]] = x;
        coords[[i, 1]] = y;
    }
    coords
}

/// Euclidean distance between two coordinate rows.
#[inline]
pub fn euclidean_pair(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&ai, &bi)| (ai - bi) * (ai - bi))
        .sum::<f64>()
        .sqrt()
}

/// Compute the symmetric pairwise distance matrix.
///
/// # Arguments
/// * `coords` - Coordinate matrix (n_points × n_dims)
///
/// # Returns
/// Distance matrix (n_points × n_points) with a zero diagonal
pub fn euclidean_distance_matrix(coords: ArrayView2<f64>) -> Array2<f64> {
    let n = coords.nrows();
    let mut distances = Array2::<f64>::zeros((n, n));

    let indices: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .collect();

    let dists: Vec<((usize, usize), f64)> = indices
        .par_iter()
        .map(|&(i, j)| ((i, j), euclidean_pair(coords.row(i), coords.row(j))))
        .collect();

    for ((i, j), dist) in dists {
        distances[[i, j]] = dist;
        distances[[j, i]] = dist;
    }

    distances
}

/// Mean distance over all unordered pairs, without materialising the matrix.
///
/// Returns `None` for fewer than two points.
pub fn mean_pairwise_distance(coords: ArrayView2<f64>) -> Option<f64> {
    let n = coords.nrows();
    if n < 2 {
        return None;
    }

    let row_sums: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            (i + 1..n)
                .map(|j| euclidean_pair(coords.row(i), coords.row(j)))
                .sum::<f64>()
        })
        .collect();

    let n_pairs = (n * (n - 1) / 2) as f64;
    Some(row_sums.iter().sum::<f64>() / n_pairs)
}

/// Mean of the rows; `None` for an empty array.
pub fn centroid(coords: ArrayView2<f64>) -> Option<Array1<f64>> {
    coords.mean_axis(Axis(0))
}
