//! Serialisable output rows and JSON writers.
//!
//! Each sample writes `<dir>/<sample_id>/{genealogy,spatial_points,metrics}.json`.
//! A batch writes a results list (one [`SampleRecord`] per sample) and a
//! summary file next to it.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};
use crate::pipeline::{BatchReport, SampleOutcome, SampleResult};
use crate::spatial::{LineageBreakdown, SpatialMetricsReport, SpatialPoint};
use crate::tree::{Genealogy, NodeId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenealogyRow {
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    pub vaf: f64,
    /// N_e of the interval the node merged in; empty for leaves.
    pub ne_of_interval: Option<f64>,
    pub branch_length: f64,
    pub cluster_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialRow {
    pub x: f64,
    pub y: f64,
    pub lineage_label: NodeId,
    pub founder_id: NodeId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsExport {
    pub moran_i: f64,
    pub alpha: f64,
    pub beta: f64,
    pub per_lineage_breakdown: BTreeMap<NodeId, LineageBreakdown>,
}

impl From<&SpatialMetricsReport> for MetricsExport {
    fn from(report: &SpatialMetricsReport) -> Self {
        Self {
            moran_i: report.moran_i,
            alpha: report.alpha,
            beta: report.beta,
            per_lineage_breakdown: report.per_lineage_breakdown.clone(),
        }
    }
}

/// Headline metrics under the names used in the batch results file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialMetricsRecord {
    pub morans_i: f64,
    pub within_lineage_spread_alpha: f64,
    pub founder_separation_beta: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Failed,
}

/// One entry of the batch results list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample_id: String,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub spatial_metrics: Option<SpatialMetricsRecord>,
}

impl From<&SampleOutcome> for SampleRecord {
    fn from(outcome: &SampleOutcome) -> Self {
        match outcome {
            SampleOutcome::Success(result) => SampleRecord {
                sample_id: result.sample_id.clone(),
                status: RecordStatus::Success,
                error_kind: None,
                error: None,
                spatial_metrics: Some(SpatialMetricsRecord {
                    morans_i: result.metrics.moran_i,
                    within_lineage_spread_alpha: result.metrics.alpha,
                    founder_separation_beta: result.metrics.beta,
                }),
            },
            SampleOutcome::Failed {
                sample_id,
                kind,
                message,
            } => SampleRecord {
                sample_id: sample_id.clone(),
                status: RecordStatus::Failed,
                error_kind: Some(*kind),
                error: Some(message.clone()),
                spatial_metrics: None,
            },
        }
    }
}

/// Genealogy table ordered by node id.
pub fn genealogy_rows(genealogy: &Genealogy) -> Vec<GenealogyRow> {
    genealogy
        .nodes
        .iter()
        .map(|node| GenealogyRow {
            node_id: node.node_id,
            parent_id: node.parent,
            vaf: node.vaf,
            ne_of_interval: genealogy.ne_of(node.node_id),
            branch_length: node.branch_length,
            cluster_id: genealogy
                .cluster_of(node.node_id)
                .map(|c| c.cluster_id.clone()),
        })
        .collect()
}

pub fn spatial_rows(points: &[SpatialPoint]) -> Vec<SpatialRow> {
    points
        .iter()
        .map(|p| SpatialRow {
            x: p.x,
            y: p.y,
            lineage_label: p.lineage_label,
            founder_id: p.founder_id,
        })
        .collect()
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Write one sample's genealogy, points and metrics under `dir/<sample_id>/`.
///
/// # Returns
/// The sample directory
pub fn write_sample_outputs(dir: impl AsRef<Path>, result: &SampleResult) -> Result<PathBuf> {
    let sample_dir = dir.as_ref().join(&result.sample_id);
    fs::create_dir_all(&sample_dir)?;

    write_json(&sample_dir.join("genealogy.json"), &genealogy_rows(&result.genealogy))?;
    write_json(&sample_dir.join("spatial_points.json"), &spatial_rows(&result.points))?;
    write_json(&sample_dir.join("metrics.json"), &MetricsExport::from(&result.metrics))?;

    log::debug!("wrote outputs for {} to {}", result.sample_id, sample_dir.display());
    Ok(sample_dir)
}

/// Path of the summary written alongside a results file.
pub fn summary_path(results_path: &Path) -> PathBuf {
    let stem = results_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    results_path.with_file_name(format!("{}_summary.json", stem))
}

/// Write the batch results list to `path` and the summary next to it.
pub fn write_results_json(path: impl AsRef<Path>, report: &BatchReport) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let records: Vec<SampleRecord> = report.outcomes.iter().map(SampleRecord::from).collect();
    write_json(path, &records)?;
    write_json(&summary_path(path), &report.summary)?;

    log::info!(
        "wrote {} sample records to {}",
        records.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MutationRecord;
    use crate::config::PipelineConfig;
    use crate::pipeline::{process_batch, process_sample, BatchSummary, NeutralityResult, SampleInput};

    fn input(sample_id: &str, n_per_level: usize) -> SampleInput {
        let mutations = [0.8, 0.4, 0.1]
            .iter()
            .flat_map(|&vaf| {
                (0..n_per_level).map(move |i| {
                    MutationRecord::new(format!("{}_{}_{}", sample_id, vaf, i), vaf, sample_id)
                })
            })
            .collect();
        SampleInput {
            sample_id: sample_id.to_string(),
            mutations,
            neutrality: NeutralityResult {
                passed: true,
                r_squared: Some(0.99),
            },
        }
    }

    #[test]
    fn test_genealogy_rows() {
        let result = process_sample(&input("P1", 6), &PipelineConfig::default()).unwrap();
        let rows = genealogy_rows(&result.genealogy);
        assert_eq!(rows.len(), result.genealogy.n_nodes());
        assert!(rows.iter().enumerate().all(|(i, r)| r.node_id == i));

        let root = rows.iter().find(|r| r.parent_id.is_none()).unwrap();
        assert_eq!(root.branch_length, 0.0);
        assert!(root.ne_of_interval.is_some());
        assert!(rows[0].cluster_id.is_some() && rows[0].ne_of_interval.is_none());
    }

    #[test]
    fn test_write_sample_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let result = process_sample(&input("P2", 6), &PipelineConfig::default()).unwrap();
        let sample_dir = write_sample_outputs(dir.path(), &result).unwrap();

        assert_eq!(sample_dir, dir.path().join("P2"));
        let points: Vec<SpatialRow> =
            serde_json::from_str(&fs::read_to_string(sample_dir.join("spatial_points.json")).unwrap())
                .unwrap();
        assert_eq!(points.len(), 18);

        let metrics: MetricsExport =
            serde_json::from_str(&fs::read_to_string(sample_dir.join("metrics.json")).unwrap())
                .unwrap();
        assert_eq!(metrics, MetricsExport::from(&result.metrics));
        assert!(sample_dir.join("genealogy.json").exists());
    }

    #[test]
    fn test_results_json_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spatial_mapping_results.json");
        let report = process_batch(&[input("ok", 6), input("tiny", 1)], &PipelineConfig::default());
        write_results_json(&path, &report).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let records = raw.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["status"], "success");
        assert!(records[0]["spatial_metrics"]["morans_i"].is_number());
        assert!(records[0]["spatial_metrics"]["within_lineage_spread_alpha"].is_number());
        assert_eq!(records[1]["status"], "failed");
        assert_eq!(records[1]["error_kind"], "insufficient_data");

        let summary: BatchSummary = serde_json::from_str(
            &fs::read_to_string(dir.path().join("spatial_mapping_results_summary.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(summary.n_succeeded, 1);
        assert_eq!(summary.failures_by_kind[&ErrorKind::InsufficientData], 1);
    }
}
