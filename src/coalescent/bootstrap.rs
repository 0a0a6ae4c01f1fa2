//! Parametric bootstrap of per-interval N_e.
//!
//! Each replicate simulates the interval's Kingman waiting times at the
//! fitted N_e, re-estimates N_e from the simulated duration, and the
//! replicate distribution gives a percentile confidence interval.
//!
//! Replicates run in parallel with Rayon; replicate `r` of interval `j` uses
//! `StdRng::seed_from_u64(seed + j·R + r)`, so results do not depend on the
//! number of worker threads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::estimator::{unit_rates, NeEstimator};
use crate::stats::quantile_sorted;

/// Bootstrap settings for one genealogy.
#[derive(Clone, Copy, Debug)]
pub struct BootstrapConfig {
    pub replicates: usize,
    pub confidence_level: f64,
    pub seed: u64,
}

/// Simulate the total waiting time of `mergers` successive Kingman mergers
/// starting from `lineages` lineages at effective size `ne`.
pub fn simulate_interval_duration(
    lineages: usize,
    mergers: usize,
    ne: f64,
    rng: &mut StdRng,
) -> f64 {
    unit_rates(lineages, mergers)
        .into_iter()
        .map(|unit_rate| {
            let rate = unit_rate / ne;
            // 1 - U lies in (0, 1], keeping the log finite
            -(1.0 - rng.gen::<f64>()).ln() / rate
        })
        .sum()
}

/// Draw bootstrap N_e replicates for one interval.
pub fn bootstrap_replicates(
    estimator: &dyn NeEstimator,
    interval_id: usize,
    lineages: usize,
    mergers: usize,
    ne_hat: f64,
    config: &BootstrapConfig,
) -> Vec<f64> {
    let offset = (interval_id as u64).wrapping_mul(config.replicates as u64);
    (0..config.replicates)
        .into_par_iter()
        .map(|r| {
            let seed = config.seed.wrapping_add(offset).wrapping_add(r as u64);
            let mut rng = StdRng::seed_from_u64(seed);
            let duration = simulate_interval_duration(lineages, mergers, ne_hat, &mut rng);
            estimator.estimate(lineages, mergers, duration)
        })
        .collect()
}

/// Percentile confidence interval of N_e for one interval.
pub fn ne_confidence_interval(
    estimator: &dyn NeEstimator,
    interval_id: usize,
    lineages: usize,
    mergers: usize,
    ne_hat: f64,
    config: &BootstrapConfig,
) -> Option<(f64, f64)> {
    if config.replicates == 0 {
        return None;
    }
    let mut replicates =
        bootstrap_replicates(estimator, interval_id, lineages, mergers, ne_hat, config);
    replicates.sort_by(f64::total_cmp);

    let tail = (1.0 - config.confidence_level) / 2.0;
    let lower = quantile_sorted(&replicates, tail)?;
    let upper = quantile_sorted(&replicates, 1.0 - tail)?;
    Some((lower, upper))
}
