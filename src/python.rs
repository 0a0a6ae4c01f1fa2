//! Python bindings (`subclone` module).
//!
//! Data failures of a sample come back as a `{"status": "failed", ...}` dict
//! so that a Python driver can keep going; invalid arguments raise
//! `ValueError`.

use numpy::{PyArray1, PyReadonlyArray1};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::wrap_pyfunction;

use crate::cluster::MutationRecord;
use crate::config::{AdjacencyMethod, MetricsConfig, PipelineConfig};
use crate::error::LineageError;
use crate::pipeline::{self, NeutralityResult, SampleInput};
use crate::spatial::{SpatialMetricsEngine, SpatialPoint};

fn value_error(err: impl std::fmt::Display) -> PyErr {
    PyErr::new::<PyValueError, _>(err.to_string())
}

/// Run clustering, tree building, diffusion and metrics for one sample.
///
/// # Arguments
/// * `sample_id` - Sample identifier (also the seed key)
/// * `mutation_ids` - Mutation identifiers, one per VAF
/// * `vafs` - Variant allele frequencies
/// * `neutrality_passed` - Verdict of the 1/f neutrality test; when omitted it
///   is derived from `r_squared` and the configured `neutrality_r2_threshold`
/// * `r_squared` - R² of the neutrality fit, if known
/// * `config_json` - Optional JSON configuration; defaults otherwise
///
/// # Returns
/// * Dict with `status`, `spatial_metrics`, point arrays and the genealogy
///   as parent indices (-1 for the root)
#[pyfunction]
#[pyo3(signature = (sample_id, mutation_ids, vafs, neutrality_passed=None, r_squared=None, config_json=None))]
fn process_sample<'py>(
    py: Python<'py>,
    sample_id: String,
    mutation_ids: Vec<String>,
    vafs: PyReadonlyArray1<f64>,
    neutrality_passed: Option<bool>,
    r_squared: Option<f64>,
    config_json: Option<&str>,
) -> PyResult<&'py PyDict> {
    let vafs = vafs.as_array();
    if vafs.len() != mutation_ids.len() {
        return Err(value_error(format!(
            "{} mutation ids but {} VAFs",
            mutation_ids.len(),
            vafs.len()
        )));
    }

    let config = match config_json {
        Some(json) => PipelineConfig::from_json_str(json).map_err(value_error)?,
        None => PipelineConfig::default(),
    };

    let mutations = mutation_ids
        .into_iter()
        .zip(vafs.iter())
        .map(|(id, &vaf)| MutationRecord::new(id, vaf, sample_id.as_str()))
        .collect();
    let input = match (neutrality_passed, r_squared) {
        (Some(passed), r_squared) => SampleInput {
            sample_id: sample_id.clone(),
            mutations,
            neutrality: NeutralityResult { passed, r_squared },
        },
        (None, Some(r2)) => SampleInput::with_r_squared(sample_id.as_str(), mutations, r2, &config),
        (None, None) => {
            return Err(value_error(
                "either neutrality_passed or r_squared must be given",
            ))
        }
    };

    let dict = PyDict::new(py);
    dict.set_item("sample_id", &sample_id)?;

    let result = match pipeline::process_sample(&input, &config) {
        Ok(result) => result,
        Err(err @ LineageError::Config(_)) => return Err(value_error(err)),
        Err(err) => {
            dict.set_item("status", "failed")?;
            dict.set_item("error_kind", err.kind().as_str())?;
            dict.set_item("error", err.to_string())?;
            return Ok(dict);
        }
    };

    dict.set_item("status", "success")?;

    let metrics = PyDict::new(py);
    metrics.set_item("morans_i", result.metrics.moran_i)?;
    metrics.set_item("within_lineage_spread_alpha", result.metrics.alpha)?;
    metrics.set_item("founder_separation_beta", result.metrics.beta)?;
    dict.set_item("spatial_metrics", metrics)?;

    let xs: Vec<f64> = result.points.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = result.points.iter().map(|p| p.y).collect();
    let labels: Vec<i64> = result.points.iter().map(|p| p.lineage_label as i64).collect();
    let founders: Vec<i64> = result.points.iter().map(|p| p.founder_id as i64).collect();
    dict.set_item("x", PyArray1::from_vec(py, xs))?;
    dict.set_item("y", PyArray1::from_vec(py, ys))?;
    dict.set_item("lineage_label", PyArray1::from_vec(py, labels))?;
    dict.set_item("founder_id", PyArray1::from_vec(py, founders))?;

    let genealogy = &result.genealogy;
    let parents: Vec<i64> = genealogy
        .nodes
        .iter()
        .map(|n| n.parent.map_or(-1, |p| p as i64))
        .collect();
    let branch_lengths: Vec<f64> = genealogy.nodes.iter().map(|n| n.branch_length).collect();
    let node_vafs: Vec<f64> = genealogy.nodes.iter().map(|n| n.vaf).collect();
    let ne: Vec<f64> = genealogy.intervals.iter().map(|iv| iv.ne_estimate).collect();
    dict.set_item("parent_indices", PyArray1::from_vec(py, parents))?;
    dict.set_item("branch_lengths", PyArray1::from_vec(py, branch_lengths))?;
    dict.set_item("node_vaf", PyArray1::from_vec(py, node_vafs))?;
    dict.set_item("interval_ne", PyArray1::from_vec(py, ne))?;

    let cluster_ids: Vec<String> = genealogy
        .clusters
        .iter()
        .map(|c| c.cluster_id.clone())
        .collect();
    dict.set_item("cluster_ids", cluster_ids)?;

    Ok(dict)
}

/// Pooled Moran's I of lineage labels over a point set.
///
/// # Arguments
/// * `xs`, `ys` - Point coordinates
/// * `labels` - Non-negative lineage label per point
/// * `method` - `"knn"` or `"distance_band"`
/// * `parameter` - k or band radius
#[pyfunction]
#[pyo3(signature = (xs, ys, labels, method="knn", parameter=8.0))]
fn moran_i(
    xs: PyReadonlyArray1<f64>,
    ys: PyReadonlyArray1<f64>,
    labels: PyReadonlyArray1<i64>,
    method: &str,
    parameter: f64,
) -> PyResult<f64> {
    let (xs, ys, labels) = (xs.as_array(), ys.as_array(), labels.as_array());
    if xs.len() != ys.len() || xs.len() != labels.len() {
        return Err(value_error("xs, ys and labels must have the same length"));
    }

    let spatial_adjacency_method = match method {
        "knn" => AdjacencyMethod::Knn,
        "distance_band" => AdjacencyMethod::DistanceBand,
        other => return Err(value_error(format!("unknown adjacency method '{}'", other))),
    };

    let points = xs
        .iter()
        .zip(ys.iter())
        .zip(labels.iter())
        .map(|((&x, &y), &label)| {
            let label = usize::try_from(label)
                .map_err(|_| value_error(format!("negative lineage label {}", label)))?;
            Ok(SpatialPoint {
                x,
                y,
                lineage_label: label,
                founder_id: label,
            })
        })
        .collect::<PyResult<Vec<SpatialPoint>>>()?;

    let engine = SpatialMetricsEngine::new(&MetricsConfig {
        spatial_adjacency_method,
        adjacency_parameter: parameter,
    });
    let report = engine.compute_metrics(&points).map_err(value_error)?;
    Ok(report.moran_i)
}

#[pymodule]
fn subclone(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(process_sample, m)?)?;
    m.add_function(wrap_pyfunction!(moran_i, m)?)?;
    Ok(())
}
