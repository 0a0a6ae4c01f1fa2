//! Effective population size estimators for one coalescent interval.
//!
//! Under Kingman's coalescent with `i` active lineages the waiting time to the
//! next merger is exponential with rate
//!
//! ```text
//! λ_i = i(i - 1) / (2 N_e)
//! ```
//!
//! An interval that starts (backward in time) with `k` lineages and sees `m`
//! mergers over a duration `T` is summarised by a single N_e. Estimators are
//! fitted per interval, never globally, and every estimator must return a
//! positive value that decreases as `m` grows for fixed `k` and `T`.

use crate::config::NeEstimatorKind;

/// Largest |c_i| for which the alternating hypoexponential sum is trusted.
/// Cancellation error grows as max|c_i|·ε, so beyond this the CDF is no
/// longer accurate to about 1e-10.
const MAX_WEIGHT_MAGNITUDE: f64 = 1e6;

/// Fits N_e for a single interval.
pub trait NeEstimator: Send + Sync {
    /// Estimate N_e from `lineages` (k, at the interval's lower bound),
    /// `mergers` (m, 1 ≤ m < k) and the interval `duration` (T > 0).
    fn estimate(&self, lineages: usize, mergers: usize, duration: f64) -> f64;

    /// Short name recorded in logs.
    fn name(&self) -> &'static str;
}

/// Build the estimator selected in the configuration.
pub fn estimator_for(kind: NeEstimatorKind) -> Box<dyn NeEstimator> {
    match kind {
        NeEstimatorKind::Skyline => Box::new(SkylineEstimator),
        NeEstimatorKind::MedianMatching => Box::new(MedianMatchingEstimator::default()),
    }
}

/// Rates λ_i for N_e = 1, for i = k, k-1, ..., k-m+1.
pub fn unit_rates(lineages: usize, mergers: usize) -> Vec<f64> {
    (0..mergers)
        .map(|r| {
            let i = (lineages - r) as f64;
            i * (i - 1.0) / 2.0
        })
        .collect()
}

/// Expected total waiting time of the `m` mergers when N_e = 1:
/// Σ 2/(i(i-1)) = 2 (1/(k-m) - 1/k).
pub fn expected_unit_time(lineages: usize, mergers: usize) -> f64 {
    2.0 * (1.0 / (lineages - mergers) as f64 - 1.0 / lineages as f64)
}

/// Moment matching of the expected waiting time (generalised skyline).
///
/// N_e = T / (2 (1/(k-m) - 1/k)), which reduces to the classic skyline
/// estimate T·k(k-1)/2 for a single merger.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkylineEstimator;

impl NeEstimator for SkylineEstimator {
    fn estimate(&self, lineages: usize, mergers: usize, duration: f64) -> f64 {
        debug_assert!(mergers >= 1 && mergers < lineages);
        (duration / expected_unit_time(lineages, mergers)).max(f64::MIN_POSITIVE)
    }

    fn name(&self) -> &'static str {
        "skyline"
    }
}

/// Median matching of the hypoexponential waiting-time sum.
///
/// Rates scale as 1/N_e, so the median of the sum is N_e times the median at
/// N_e = 1. That unit median is solved by bisection on the closed-form CDF,
/// and N_e = T / median.
#[derive(Clone, Copy, Debug)]
pub struct MedianMatchingEstimator {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for MedianMatchingEstimator {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 200,
        }
    }
}

impl MedianMatchingEstimator {
    /// Median of Σ Exp(λ_i) for N_e = 1.
    pub fn unit_median(&self, lineages: usize, mergers: usize) -> f64 {
        let rates = unit_rates(lineages, mergers);
        if mergers == 1 {
            return std::f64::consts::LN_2 / rates[0];
        }

        let weights = hypoexponential_weights(&rates);
        let conditioned = weights
            .iter()
            .all(|w| w.is_finite() && w.abs() <= MAX_WEIGHT_MAGNITUDE);
        if !conditioned {
            log::debug!(
                "hypoexponential CDF ill-conditioned for k={} m={}, using Cornish-Fisher median",
                lineages,
                mergers
            );
            return cornish_fisher_median(&rates);
        }
        let cdf = |t: f64| -> f64 {
            1.0 - rates
                .iter()
                .zip(&weights)
                .map(|(&rate, &w)| w * (-rate * t).exp())
                .sum::<f64>()
        };

        let mut lo = 0.0;
        let mut hi = expected_unit_time(lineages, mergers);
        while cdf(hi) < 0.5 {
            hi *= 2.0;
        }

        for _ in 0..self.max_iterations {
            let mid = 0.5 * (lo + hi);
            if cdf(mid) < 0.5 {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo < self.tolerance * hi {
                break;
            }
        }
        0.5 * (lo + hi)
    }
}

impl NeEstimator for MedianMatchingEstimator {
    fn estimate(&self, lineages: usize, mergers: usize, duration: f64) -> f64 {
        debug_assert!(mergers >= 1 && mergers < lineages);
        (duration / self.unit_median(lineages, mergers)).max(f64::MIN_POSITIVE)
    }

    fn name(&self) -> &'static str {
        "median_matching"
    }
}

/// Median of Σ Exp(λ_i) from its first three cumulants:
/// μ - κ3 / (6σ²), bounded below by the median of the slowest term.
fn cornish_fisher_median(rates: &[f64]) -> f64 {
    let cumulant = |power: i32| rates.iter().map(|r| r.powi(-power)).sum::<f64>();
    let mean = cumulant(1);
    let variance = cumulant(2);
    let kappa3 = 2.0 * cumulant(3);

    let slowest = rates.iter().copied().fold(f64::INFINITY, f64::min);
    (mean - kappa3 / (6.0 * variance)).max(std::f64::consts::LN_2 / slowest)
}

/// Coefficients c_i = Π_{j≠i} λ_j / (λ_j - λ_i) of the hypoexponential
/// survival function Σ c_i exp(-λ_i t). Rates must be distinct.
fn hypoexponential_weights(rates: &[f64]) -> Vec<f64> {
    rates
        .iter()
        .enumerate()
        .map(|(i, &ri)| {
            rates
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, &rj)| rj / (rj - ri))
                .product::<f64>()
        })
        .collect()
}
