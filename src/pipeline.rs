//! Per-sample pipeline and batch reduction.
//!
//! A sample runs clustering → coalescent tree → diffusion → metrics with
//! seeds derived from its id. Batches run one rayon task per sample; each
//! task yields a [`SampleOutcome`], and the outcomes are reduced on the
//! calling thread once all tasks have finished. A failing sample is recorded
//! with its [`ErrorKind`] and never affects its siblings.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cluster::{cluster_mutations, MutationRecord};
use crate::coalescent::CoalescentTreeBuilder;
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, LineageError, Result};
use crate::seed::{DeterministicSeedProvider, SeedStream};
use crate::spatial::{SpatialDiffuser, SpatialMetricsEngine, SpatialMetricsReport, SpatialPoint};
use crate::stats::MetricSummary;
use crate::tree::Genealogy;

/// Outcome of the external 1/f neutrality test.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeutralityResult {
    pub passed: bool,
    pub r_squared: Option<f64>,
}

impl NeutralityResult {
    /// Gate on R² alone: passes when `r_squared >= threshold`.
    pub fn from_r_squared(r_squared: f64, threshold: f64) -> Self {
        Self {
            passed: r_squared.is_finite() && r_squared >= threshold,
            r_squared: Some(r_squared),
        }
    }
}

/// One sample's filtered mutations and its neutrality verdict.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleInput {
    pub sample_id: String,
    pub mutations: Vec<MutationRecord>,
    pub neutrality: NeutralityResult,
}

impl SampleInput {
    /// Build an input whose neutrality verdict is derived from R² with the
    /// configured `neutrality_r2_threshold`.
    pub fn with_r_squared(
        sample_id: impl Into<String>,
        mutations: Vec<MutationRecord>,
        r_squared: f64,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            sample_id: sample_id.into(),
            mutations,
            neutrality: NeutralityResult::from_r_squared(
                r_squared,
                config.coalescent.neutrality_r2_threshold,
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleResult {
    pub sample_id: String,
    pub genealogy: Genealogy,
    pub points: Vec<SpatialPoint>,
    pub metrics: SpatialMetricsReport,
    pub tree_seed: u64,
    pub diffusion_seed: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleOutcome {
    Success(Box<SampleResult>),
    Failed {
        sample_id: String,
        kind: ErrorKind,
        message: String,
    },
}

impl SampleOutcome {
    pub fn from_result(sample_id: &str, result: Result<SampleResult>) -> Self {
        match result {
            Ok(sample) => SampleOutcome::Success(Box::new(sample)),
            Err(err) => {
                if err.is_data_error() {
                    log::warn!("sample {} failed: {}", sample_id, err);
                } else {
                    log::error!("sample {} failed: {}", sample_id, err);
                }
                SampleOutcome::Failed {
                    sample_id: sample_id.to_string(),
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        }
    }

    pub fn sample_id(&self) -> &str {
        match self {
            SampleOutcome::Success(result) => &result.sample_id,
            SampleOutcome::Failed { sample_id, .. } => sample_id,
        }
    }

    pub fn result(&self) -> Option<&SampleResult> {
        match self {
            SampleOutcome::Success(result) => Some(result.as_ref()),
            SampleOutcome::Failed { .. } => None,
        }
    }
}

/// Aggregates over the successful samples of a batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub n_samples: usize,
    pub n_succeeded: usize,
    pub n_failed: usize,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
    pub moran_i: MetricSummary,
    pub alpha: MetricSummary,
    pub beta: MetricSummary,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[SampleOutcome]) -> Self {
        let mut failures_by_kind: BTreeMap<ErrorKind, usize> = BTreeMap::new();
        let mut moran = Vec::new();
        let mut alpha = Vec::new();
        let mut beta = Vec::new();

        for outcome in outcomes {
            match outcome {
                SampleOutcome::Success(result) => {
                    moran.push(result.metrics.moran_i);
                    alpha.push(result.metrics.alpha);
                    beta.push(result.metrics.beta);
                }
                SampleOutcome::Failed { kind, .. } => {
                    *failures_by_kind.entry(*kind).or_insert(0) += 1;
                }
            }
        }

        let n_failed: usize = failures_by_kind.values().sum();
        Self {
            n_samples: outcomes.len(),
            n_succeeded: outcomes.len() - n_failed,
            n_failed,
            failures_by_kind,
            moran_i: MetricSummary::from_values(&moran),
            alpha: MetricSummary::from_values(&alpha),
            beta: MetricSummary::from_values(&beta),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<SampleOutcome>,
    pub summary: BatchSummary,
}

/// Run the full pipeline for one sample.
///
/// The returned error is the first stage failure; nothing partial is kept.
pub fn process_sample(input: &SampleInput, config: &PipelineConfig) -> Result<SampleResult> {
    config.validate()?;

    let seeds = DeterministicSeedProvider::new(config.seed_salt);
    let tree_seed = seeds.seed_for(&input.sample_id, SeedStream::Tree);
    let diffusion_seed = seeds.seed_for(&input.sample_id, SeedStream::Diffusion);

    let clusters = cluster_mutations(&input.mutations, &config.clustering)?;
    log::debug!("sample {}: {} clusters", input.sample_id, clusters.len());

    let genealogy = CoalescentTreeBuilder::new(&config.coalescent, tree_seed)
        .build_tree(&clusters, input.neutrality.passed)
        .map_err(|err| match err {
            LineageError::NonNeutralEvolution { .. } => LineageError::NonNeutralEvolution {
                r_squared: input.neutrality.r_squared,
            },
            other => other,
        })?;

    let (points, metrics) = diffuse_and_measure(&genealogy, config, diffusion_seed)?;

    log::info!(
        "sample {}: {} leaves, {} points, I={:.3}",
        input.sample_id,
        genealogy.n_leaves(),
        points.len(),
        metrics.moran_i
    );

    Ok(SampleResult {
        sample_id: input.sample_id.clone(),
        genealogy,
        points,
        metrics,
        tree_seed,
        diffusion_seed,
    })
}

/// Re-run the diffusion of an existing genealogy as a numbered trial.
///
/// Trial 0 reproduces the points of [`process_sample`].
pub fn rerun_diffusion(
    sample_id: &str,
    genealogy: &Genealogy,
    config: &PipelineConfig,
    trial: u64,
) -> Result<(Vec<SpatialPoint>, SpatialMetricsReport)> {
    let seed = DeterministicSeedProvider::new(config.seed_salt).trial_seed(
        sample_id,
        SeedStream::Diffusion,
        trial,
    );
    diffuse_and_measure(genealogy, config, seed)
}

fn diffuse_and_measure(
    genealogy: &Genealogy,
    config: &PipelineConfig,
    seed: u64,
) -> Result<(Vec<SpatialPoint>, SpatialMetricsReport)> {
    let points =
        SpatialDiffuser::new(&config.spatial).diffuse(genealogy, config.spatial.domain_size, seed)?;
    let metrics = SpatialMetricsEngine::new(&config.metrics).compute_metrics(&points)?;
    Ok((points, metrics))
}

/// Process samples in parallel and summarise the batch.
pub fn process_batch(inputs: &[SampleInput], config: &PipelineConfig) -> BatchReport {
    log::info!("processing batch of {} samples", inputs.len());

    let outcomes: Vec<SampleOutcome> = inputs
        .par_iter()
        .map(|input| SampleOutcome::from_result(&input.sample_id, process_sample(input, config)))
        .collect();

    let summary = BatchSummary::from_outcomes(&outcomes);
    log::info!(
        "batch done: {} succeeded, {} failed",
        summary.n_succeeded,
        summary.n_failed
    );

    BatchReport { outcomes, summary }
}
