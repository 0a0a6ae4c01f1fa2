//! Error types for lineage reconstruction.
//!
//! Every variant is scoped to a single sample: a failing sample is classified
//! with [`ErrorKind`] and excluded from batch aggregates, never aborting its
//! siblings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the clustering → tree → diffusion → metrics pipeline.
#[derive(Error, Debug)]
pub enum LineageError {
    /// Too few usable mutations remain after filtering.
    #[error("insufficient data: {found} usable mutations, at least {required} required")]
    InsufficientData { found: usize, required: usize },

    /// The neutrality gate failed; coalescent assumptions do not hold.
    #[error("non-neutral evolution: neutrality test failed (R² = {r_squared:?})")]
    NonNeutralEvolution { r_squared: Option<f64> },

    /// The coalescent sweep cannot reduce the sample to a single ancestor.
    #[error("unresolved lineages: {remaining} lineages remain at VAF {vaf:.4} with no coalescent time left")]
    UnresolvedLineage { remaining: usize, vaf: f64 },

    /// Founder placement could not avoid collisions within the retry budget.
    #[error("domain saturated: founder {founder} could not be placed after {attempts} attempts")]
    DomainSaturation { founder: usize, attempts: usize },

    /// Metrics requested on an empty point set.
    #[error("empty point set: spatial metrics are undefined")]
    EmptyPointSet,

    /// All points coincide, variance-based statistics are undefined.
    #[error("degenerate variance: all {n_points} points coincide")]
    DegenerateVariance { n_points: usize },

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors while writing sample outputs.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure classification used by the batch summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientData,
    NonNeutralEvolution,
    UnresolvedLineage,
    DomainSaturation,
    EmptyPointSet,
    DegenerateVariance,
    Config,
    Io,
    Serialization,
}

impl ErrorKind {
    /// Stable snake_case name, as written to results files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientData => "insufficient_data",
            ErrorKind::NonNeutralEvolution => "non_neutral_evolution",
            ErrorKind::UnresolvedLineage => "unresolved_lineage",
            ErrorKind::DomainSaturation => "domain_saturation",
            ErrorKind::EmptyPointSet => "empty_point_set",
            ErrorKind::DegenerateVariance => "degenerate_variance",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LineageError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        LineageError::Config(message.into())
    }

    /// Classifies this error for batch reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LineageError::InsufficientData { .. } => ErrorKind::InsufficientData,
            LineageError::NonNeutralEvolution { .. } => ErrorKind::NonNeutralEvolution,
            LineageError::UnresolvedLineage { .. } => ErrorKind::UnresolvedLineage,
            LineageError::DomainSaturation { .. } => ErrorKind::DomainSaturation,
            LineageError::EmptyPointSet => ErrorKind::EmptyPointSet,
            LineageError::DegenerateVariance { .. } => ErrorKind::DegenerateVariance,
            LineageError::Config(_) => ErrorKind::Config,
            LineageError::Io(_) => ErrorKind::Io,
            LineageError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// True for failures caused by the sample's data rather than the
    /// environment or configuration.
    pub fn is_data_error(&self) -> bool {
        !matches!(
            self,
            LineageError::Config(_) | LineageError::Io(_) | LineageError::Serialization(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LineageError>;
