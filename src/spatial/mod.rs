//! Spatial mapping of a genealogy and its spatial statistics.

pub mod diffuser;
pub mod metrics;
pub mod weights;

pub use diffuser::{SpatialDiffuser, SpatialPoint};
pub use metrics::{LineageBreakdown, SpatialMetricsEngine, SpatialMetricsReport};
