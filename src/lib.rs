//! Subclonal lineage reconstruction and spatial mapping for tumor samples.
//!
//! Somatic mutations are clustered by VAF, a coalescent genealogy with
//! per-interval N_e is built from the clusters, and the genealogy is diffused
//! into a 2-D domain where Moran's I, within-lineage spread (α) and founder
//! separation (β) are measured. All randomness is derived from sample ids, so
//! every run is reproducible.

pub mod cluster;
pub mod coalescent;
pub mod config;
pub mod distance;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod seed;
pub mod spatial;
pub mod stats;
pub mod tree;

#[cfg(feature = "python")]
mod python;

pub use cluster::{cluster_mutations, MutationCluster, MutationRecord};
pub use coalescent::{CoalescentInterval, CoalescentTreeBuilder, NeEstimator};
pub use config::PipelineConfig;
pub use error::{ErrorKind, LineageError, Result};
pub use pipeline::{
    process_batch, process_sample, BatchReport, BatchSummary, NeutralityResult, SampleInput,
    SampleOutcome, SampleResult,
};
pub use seed::{DeterministicSeedProvider, SeedStream};
pub use spatial::{SpatialDiffuser, SpatialMetricsEngine, SpatialMetricsReport, SpatialPoint};
pub use tree::{Genealogy, GenealogyNode, NodeId};
