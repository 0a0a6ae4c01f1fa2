//! Pipeline configuration.
//!
//! All sections deserialize from JSON with every field optional; missing
//! fields take the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LineageError, Result};

/// How mutations are grouped into VAF clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinningPolicy {
    /// Open a cluster at the highest remaining VAF and extend it while the
    /// spread stays within tolerance.
    Greedy,
    /// Fixed bins of width `vaf_cluster_tolerance`.
    FixedWidth,
}

/// Per-interval effective population size estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeEstimatorKind {
    /// Moment matching of expected Kingman waiting times (skyline).
    Skyline,
    /// Median of the hypoexponential waiting-time sum, solved numerically.
    MedianMatching,
}

/// Resolution of clusters that share a VAF level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Binary mergers ordered lexicographically by cluster id.
    ClusterId,
    /// Binary mergers ordered by a shuffle drawn from the sample seed.
    Seeded,
    /// One multifurcating node per tied level.
    Polytomy,
}

/// Spatial weights used by Moran's I.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjacencyMethod {
    /// k nearest neighbours, `k = adjacency_parameter`.
    Knn,
    /// All pairs within distance `adjacency_parameter`.
    DistanceBand,
}

/// Mutation clustering parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Maximum VAF spread within one cluster.
    pub vaf_cluster_tolerance: f64,
    /// Minimum number of usable mutations per sample.
    pub min_mutation_count: usize,
    pub binning: BinningPolicy,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            vaf_cluster_tolerance: 0.05,
            min_mutation_count: 10,
            binning: BinningPolicy::Greedy,
        }
    }
}

/// Coalescent reconstruction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescentConfig {
    /// R² threshold of the external 1/f neutrality test.
    pub neutrality_r2_threshold: f64,
    pub ne_estimator: NeEstimatorKind,
    pub tie_break: TieBreak,
    /// Parametric bootstrap replicates per interval (0 disables).
    pub ne_bootstrap_replicates: usize,
    /// Two-sided coverage of bootstrap intervals.
    pub confidence_level: f64,
}

impl Default for CoalescentConfig {
    fn default() -> Self {
        Self {
            neutrality_r2_threshold: 0.98,
            ne_estimator: NeEstimatorKind::Skyline,
            tie_break: TieBreak::ClusterId,
            ne_bootstrap_replicates: 0,
            confidence_level: 0.95,
        }
    }
}

/// Gaussian diffusion parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Domain (width, height); founders are placed inside it.
    pub domain_size: (f64, f64),
    /// Variance per coalescent interval of depth.
    pub gaussian_variance_scale: f64,
    /// Variance shrink factor per generation of nesting below a founder.
    pub secondary_offset_ratio: f64,
    /// Founders closer than this collide and are re-sampled.
    pub min_founder_separation: f64,
    /// Placement attempts per founder before giving up.
    pub retry_limit: usize,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            domain_size: (1.0, 1.0),
            gaussian_variance_scale: 0.001,
            secondary_offset_ratio: 0.5,
            min_founder_separation: 1e-9,
            retry_limit: 100,
        }
    }
}

/// Spatial statistics parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub spatial_adjacency_method: AdjacencyMethod,
    /// k for [`AdjacencyMethod::Knn`], radius for [`AdjacencyMethod::DistanceBand`].
    pub adjacency_parameter: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            spatial_adjacency_method: AdjacencyMethod::Knn,
            adjacency_parameter: 8.0,
        }
    }
}

/// Top-level configuration for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub clustering: ClusteringConfig,
    pub coalescent: CoalescentConfig,
    pub spatial: SpatialConfig,
    pub metrics: MetricsConfig,
    /// Mixed into every derived seed; change it to draw a new set of trials.
    pub seed_salt: u64,
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let c = &self.clustering;
        if !(c.vaf_cluster_tolerance.is_finite() && c.vaf_cluster_tolerance >= 0.0) {
            return Err(LineageError::config(format!(
                "vaf_cluster_tolerance must be finite and >= 0, got {}",
                c.vaf_cluster_tolerance
            )));
        }
        if c.binning == BinningPolicy::FixedWidth && c.vaf_cluster_tolerance <= 0.0 {
            return Err(LineageError::config(
                "fixed_width binning requires vaf_cluster_tolerance > 0",
            ));
        }

        let t = &self.coalescent;
        if !(0.0..=1.0).contains(&t.neutrality_r2_threshold) {
            return Err(LineageError::config(format!(
                "neutrality_r2_threshold must lie in [0, 1], got {}",
                t.neutrality_r2_threshold
            )));
        }
        if !(t.confidence_level > 0.0 && t.confidence_level < 1.0) {
            return Err(LineageError::config(format!(
                "confidence_level must lie in (0, 1), got {}",
                t.confidence_level
            )));
        }

        let s = &self.spatial;
        let (width, height) = s.domain_size;
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(LineageError::config(format!(
                "domain_size must be positive, got ({}, {})",
                width, height
            )));
        }
        if !(s.gaussian_variance_scale.is_finite() && s.gaussian_variance_scale >= 0.0) {
            return Err(LineageError::config(format!(
                "gaussian_variance_scale must be finite and >= 0, got {}",
                s.gaussian_variance_scale
            )));
        }
        if !(s.secondary_offset_ratio > 0.0 && s.secondary_offset_ratio <= 1.0) {
            return Err(LineageError::config(format!(
                "secondary_offset_ratio must lie in (0, 1], got {}",
                s.secondary_offset_ratio
            )));
        }
        if !(s.min_founder_separation >= 0.0) {
            return Err(LineageError::config("min_founder_separation must be >= 0"));
        }
        if s.retry_limit == 0 {
            return Err(LineageError::config("retry_limit must be at least 1"));
        }

        let m = &self.metrics;
        match m.spatial_adjacency_method {
            AdjacencyMethod::Knn if !(m.adjacency_parameter >= 1.0) => {
                return Err(LineageError::config(format!(
                    "knn adjacency requires k >= 1, got {}",
                    m.adjacency_parameter
                )));
            }
            AdjacencyMethod::DistanceBand if !(m.adjacency_parameter > 0.0) => {
                return Err(LineageError::config(format!(
                    "distance_band adjacency requires a positive radius, got {}",
                    m.adjacency_parameter
                )));
            }
            _ => {}
        }

        Ok(())
    }
}
