//! Coalescent reconstruction: interval fitting, N_e estimation and genealogy
//! assembly.

pub mod bootstrap;
pub mod builder;
pub mod estimator;

use serde::{Deserialize, Serialize};

pub use bootstrap::{ne_confidence_interval, BootstrapConfig};
pub use builder::{coalescent_height, CoalescentTreeBuilder};
pub use estimator::{estimator_for, MedianMatchingEstimator, NeEstimator, SkylineEstimator};

/// One piecewise-constant segment of the coalescent, between two consecutive
/// VAF levels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoalescentInterval {
    /// 0 is the oldest interval (highest VAF).
    pub interval_id: usize,
    pub vaf_upper: f64,
    pub vaf_lower: f64,
    pub height_upper: f64,
    pub height_lower: f64,
    /// Lineages present at the interval's lower (recent) bound.
    pub lineages: usize,
    pub mergers: usize,
    pub duration: f64,
    pub ne_estimate: f64,
    /// Bootstrap percentile interval, when replicates were requested.
    #[serde(default)]
    pub ne_confidence: Option<(f64, f64)>,
}
