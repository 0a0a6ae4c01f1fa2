//! VAF clustering of filtered somatic mutations.
//!
//! Mutations are binned by variant allele frequency into discrete clusters,
//! one per putative lineage. The output is sorted by descending VAF, which is
//! the coalescence order used by the tree builder.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::{BinningPolicy, ClusteringConfig};
use crate::error::{LineageError, Result};

/// One row of the cleaned mutation table.
///
/// `chromosome` and `position` identify the mutation only; clustering uses
/// nothing but the VAF.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub mutation_id: String,
    pub vaf: f64,
    pub sample_id: String,
    #[serde(default)]
    pub chromosome: Option<String>,
    #[serde(default)]
    pub position: Option<u64>,
}

impl MutationRecord {
    pub fn new(mutation_id: impl Into<String>, vaf: f64, sample_id: impl Into<String>) -> Self {
        Self {
            mutation_id: mutation_id.into(),
            vaf,
            sample_id: sample_id.into(),
            chromosome: None,
            position: None,
        }
    }
}

/// A group of mutations sharing an allele-frequency band.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationCluster {
    pub cluster_id: String,
    /// Mean member VAF.
    pub vaf: f64,
    pub mutation_count: usize,
    pub member_mutation_ids: BTreeSet<String>,
}

impl MutationCluster {
    /// Build a cluster directly from a VAF and a member count.
    ///
    /// Member ids are synthesised as `<cluster_id>:<index>`.
    pub fn synthetic(cluster_id: impl Into<String>, vaf: f64, mutation_count: usize) -> Self {
        let cluster_id = cluster_id.into();
        let member_mutation_ids = (0..mutation_count)
            .map(|i| format!("{}:{}", cluster_id, i))
            .collect();
        Self {
            cluster_id,
            vaf,
            mutation_count,
            member_mutation_ids,
        }
    }
}

/// Sort clusters by descending VAF, ties broken by cluster id.
pub fn sort_by_coalescence_order(clusters: &mut [MutationCluster]) {
    clusters.sort_by(|a, b| {
        b.vaf
            .total_cmp(&a.vaf)
            .then_with(|| a.cluster_id.cmp(&b.cluster_id))
    });
}

/// Group a sample's mutations into VAF clusters.
///
/// Rows with a non-finite VAF or a VAF outside `(0, 1]` are dropped, as are
/// repeated mutation ids. Fails with [`LineageError::InsufficientData`] when
/// fewer than `max(min_mutation_count, 1)` rows survive.
pub fn cluster_mutations(
    records: &[MutationRecord],
    config: &ClusteringConfig,
) -> Result<Vec<MutationCluster>> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut usable: Vec<&MutationRecord> = Vec::with_capacity(records.len());
    for record in records {
        if !(record.vaf.is_finite() && record.vaf > 0.0 && record.vaf <= 1.0) {
            log::debug!(
                "dropping mutation {} with VAF {} outside (0, 1]",
                record.mutation_id,
                record.vaf
            );
            continue;
        }
        if !seen.insert(record.mutation_id.as_str()) {
            log::debug!("dropping duplicate mutation id {}", record.mutation_id);
            continue;
        }
        usable.push(record);
    }

    let required = config.min_mutation_count.max(1);
    if usable.len() < required {
        return Err(LineageError::InsufficientData {
            found: usable.len(),
            required,
        });
    }

    usable.sort_by(|a, b| {
        b.vaf
            .total_cmp(&a.vaf)
            .then_with(|| a.mutation_id.cmp(&b.mutation_id))
    });

    let groups = match config.binning {
        BinningPolicy::Greedy => greedy_bins(&usable, config.vaf_cluster_tolerance),
        BinningPolicy::FixedWidth => fixed_width_bins(&usable, config.vaf_cluster_tolerance),
    };

    let mut clusters: Vec<MutationCluster> = groups
        .into_iter()
        .enumerate()
        .map(|(i, members)| {
            let vaf = members.iter().map(|r| r.vaf).sum::<f64>() / members.len() as f64;
            MutationCluster {
                cluster_id: format!("C{:04}", i),
                vaf,
                mutation_count: members.len(),
                member_mutation_ids: members.iter().map(|r| r.mutation_id.clone()).collect(),
            }
        })
        .collect();
    sort_by_coalescence_order(&mut clusters);

    log::debug!(
        "clustered {} mutations into {} clusters",
        usable.len(),
        clusters.len()
    );
    Ok(clusters)
}

/// Records must already be sorted by descending VAF.
fn greedy_bins<'a>(sorted: &[&'a MutationRecord], tolerance: f64) -> Vec<Vec<&'a MutationRecord>> {
    let mut groups: Vec<Vec<&MutationRecord>> = Vec::new();
    let mut anchor = f64::NAN;
    for &record in sorted {
        match groups.last_mut() {
            Some(group) if anchor - record.vaf <= tolerance => group.push(record),
            _ => {
                anchor = record.vaf;
                groups.push(vec![record]);
            }
        }
    }
    groups
}

/// Records must already be sorted by descending VAF.
fn fixed_width_bins<'a>(
    sorted: &[&'a MutationRecord],
    width: f64,
) -> Vec<Vec<&'a MutationRecord>> {
    let mut groups: Vec<Vec<&MutationRecord>> = Vec::new();
    let mut current_bin: Option<i64> = None;
    for &record in sorted {
        // VAF 1.0 belongs to the top bin, not a bin of its own.
        let bin = (record.vaf.min(1.0 - 1e-12) / width).floor() as i64;
        if current_bin == Some(bin) {
            if let Some(group) = groups.last_mut() {
                group.push(record);
                continue;
            }
        }
        current_bin = Some(bin);
        groups.push(vec![record]);
    }
    groups
}
