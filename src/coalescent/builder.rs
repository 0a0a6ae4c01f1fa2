//! Coalescent genealogy reconstruction from VAF clusters.
//!
//! Clusters are sampled at the present and sorted by VAF (descending, ties by
//! cluster id). Under the neutral 1/f clock the coalescent height of a VAF
//! level is `1/v_min - 1/v`, so the lowest-VAF level sits at the present and
//! higher VAF is older. Every cluster except those at the lowest level marks
//! one merger at its own level:
//!
//! - intervals run between consecutive VAF levels and partition the sample's
//!   VAF range;
//! - interval `j` sees as many mergers as clusters sit at its upper level and
//!   starts (backward in time) with `1 + Σ_{i≤j} m_i` lineages;
//! - N_e is fitted per interval by a swappable [`NeEstimator`].
//!
//! Topology is assembled bottom-up: each merging cluster's leaf coalesces with
//! the closest lineage derived from it.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::bootstrap::{ne_confidence_interval, BootstrapConfig};
use super::estimator::{estimator_for, unit_rates, NeEstimator};
use super::CoalescentInterval;
use crate::cluster::{sort_by_coalescence_order, MutationCluster};
use crate::config::{CoalescentConfig, TieBreak};
use crate::error::{LineageError, Result};
use crate::tree::{Genealogy, GenealogyNode, NodeId};

/// Builds one sample's genealogy.
pub struct CoalescentTreeBuilder {
    estimator: Box<dyn NeEstimator>,
    tie_break: TieBreak,
    bootstrap_replicates: usize,
    confidence_level: f64,
    seed: u64,
}

impl CoalescentTreeBuilder {
    /// Create a builder from configuration and the sample's tree seed.
    pub fn new(config: &CoalescentConfig, seed: u64) -> Self {
        Self {
            estimator: estimator_for(config.ne_estimator),
            tie_break: config.tie_break,
            bootstrap_replicates: config.ne_bootstrap_replicates,
            confidence_level: config.confidence_level,
            seed,
        }
    }

    /// Replace the interval-fitting step.
    pub fn with_estimator(mut self, estimator: Box<dyn NeEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Reconstruct the genealogy.
    ///
    /// Fails with [`LineageError::NonNeutralEvolution`] when the neutrality
    /// gate did not pass, [`LineageError::InsufficientData`] when no cluster
    /// carries mutations, and [`LineageError::UnresolvedLineage`] when several
    /// clusters share the lowest VAF. No partial tree is ever returned.
    pub fn build_tree(
        &self,
        clusters: &[MutationCluster],
        neutrality_passed: bool,
    ) -> Result<Genealogy> {
        if !neutrality_passed {
            return Err(LineageError::NonNeutralEvolution { r_squared: None });
        }

        let mut clusters: Vec<MutationCluster> = clusters
            .iter()
            .filter(|c| {
                let usable = c.mutation_count > 0 && c.vaf.is_finite() && c.vaf > 0.0 && c.vaf <= 1.0;
                if !usable {
                    log::warn!(
                        "ignoring cluster {} (VAF {}, {} mutations)",
                        c.cluster_id,
                        c.vaf,
                        c.mutation_count
                    );
                }
                usable
            })
            .cloned()
            .collect();
        if clusters.is_empty() {
            return Err(LineageError::InsufficientData {
                found: 0,
                required: 1,
            });
        }
        sort_by_coalescence_order(&mut clusters);

        let levels = vaf_levels(&clusters);
        let lowest = &levels[levels.len() - 1];
        if lowest.len() > 1 {
            return Err(LineageError::UnresolvedLineage {
                remaining: lowest.len(),
                vaf: clusters[lowest.start].vaf,
            });
        }

        let v_min = clusters[clusters.len() - 1].vaf;
        let intervals = self.fit_intervals(&clusters, &levels, v_min);
        let genealogy = self.assemble(clusters, &levels, intervals);

        log::debug!(
            "built genealogy: {} leaves, {} nodes, {} intervals ({} estimator)",
            genealogy.n_leaves(),
            genealogy.n_nodes(),
            genealogy.intervals.len(),
            self.estimator.name()
        );
        Ok(genealogy)
    }

    /// Fit one interval per pair of consecutive levels, highest VAF first.
    fn fit_intervals(
        &self,
        clusters: &[MutationCluster],
        levels: &[Range<usize>],
        v_min: f64,
    ) -> Vec<CoalescentInterval> {
        let bootstrap = BootstrapConfig {
            replicates: self.bootstrap_replicates,
            confidence_level: self.confidence_level,
            seed: self.seed,
        };

        let mut lineages = 1;
        levels
            .windows(2)
            .enumerate()
            .map(|(j, pair)| {
                let mergers = pair[0].len();
                lineages += mergers;
                let vaf_upper = clusters[pair[0].start].vaf;
                let vaf_lower = clusters[pair[1].start].vaf;
                let height_upper = coalescent_height(vaf_upper, v_min);
                let height_lower = coalescent_height(vaf_lower, v_min);
                let duration = 1.0 / vaf_lower - 1.0 / vaf_upper;
                let ne_estimate = self.estimator.estimate(lineages, mergers, duration);
                let ne_confidence = ne_confidence_interval(
                    self.estimator.as_ref(),
                    j,
                    lineages,
                    mergers,
                    ne_estimate,
                    &bootstrap,
                );

                CoalescentInterval {
                    interval_id: j,
                    vaf_upper,
                    vaf_lower,
                    height_upper,
                    height_lower,
                    lineages,
                    mergers,
                    duration,
                    ne_estimate,
                    ne_confidence,
                }
            })
            .collect()
    }

    /// Link leaves and merger nodes bottom-up.
    fn assemble(
        &self,
        clusters: Vec<MutationCluster>,
        levels: &[Range<usize>],
        intervals: Vec<CoalescentInterval>,
    ) -> Genealogy {
        let mut nodes: Vec<GenealogyNode> = clusters
            .iter()
            .enumerate()
            .map(|(i, c)| GenealogyNode {
                node_id: i,
                parent: None,
                children: Vec::new(),
                cluster: Some(i),
                vaf: c.vaf,
                height: 0.0,
                branch_length: 0.0,
                interval: None,
            })
            .collect();
        let leaves: Vec<NodeId> = (0..clusters.len()).collect();

        let mut rng = StdRng::seed_from_u64(self.seed);
        // The single lineage anchored below the level being processed.
        let mut derived: NodeId = clusters.len() - 1;

        for j in (0..intervals.len()).rev() {
            let interval = &intervals[j];
            let mut members: Vec<usize> = levels[j].clone().collect();

            if self.tie_break == TieBreak::Polytomy {
                let mut children = members;
                children.push(derived);
                derived = attach(&mut nodes, children, interval.vaf_upper, interval.height_upper, j);
                continue;
            }

            if self.tie_break == TieBreak::Seeded {
                members.shuffle(&mut rng);
            }

            let heights = merger_heights(interval);
            // Later-ranked clusters merge first (closer to the present).
            for (r, &member) in members.iter().rev().enumerate() {
                derived = attach(&mut nodes, vec![member, derived], interval.vaf_upper, heights[r], j);
            }
        }

        Genealogy {
            nodes,
            root: derived,
            leaves,
            clusters,
            intervals,
        }
    }
}

/// Coalescent height of a VAF level under the 1/f clock.
pub fn coalescent_height(vaf: f64, v_min: f64) -> f64 {
    (1.0 / v_min - 1.0 / vaf).max(0.0)
}

/// Contiguous ranges of equal-VAF clusters in a sorted slice.
fn vaf_levels(sorted: &[MutationCluster]) -> Vec<Range<usize>> {
    let mut levels: Vec<Range<usize>> = Vec::new();
    let mut start = 0;
    for i in 1..=sorted.len() {
        if i == sorted.len() || sorted[i].vaf != sorted[start].vaf {
            levels.push(start..i);
            start = i;
        }
    }
    levels
}

/// Heights of the interval's successive mergers, placed at the cumulative
/// expected Kingman waiting times and scaled to end at the upper level.
fn merger_heights(interval: &CoalescentInterval) -> Vec<f64> {
    let waits: Vec<f64> = unit_rates(interval.lineages, interval.mergers)
        .into_iter()
        .map(|rate| interval.ne_estimate / rate)
        .collect();
    let total: f64 = waits.iter().sum();
    let span = interval.height_upper - interval.height_lower;

    let mut cumulative = 0.0;
    waits
        .iter()
        .enumerate()
        .map(|(r, wait)| {
            cumulative += wait;
            if r + 1 == waits.len() {
                interval.height_upper
            } else {
                interval.height_lower + span * cumulative / total
            }
        })
        .collect()
}

/// Push an internal node over `children` and link them to it.
fn attach(
    nodes: &mut Vec<GenealogyNode>,
    children: Vec<NodeId>,
    vaf: f64,
    height: f64,
    interval: usize,
) -> NodeId {
    let id = nodes.len();
    for &child in &children {
        nodes[child].parent = Some(id);
        nodes[child].branch_length = height - nodes[child].height;
    }
    nodes.push(GenealogyNode {
        node_id: id,
        parent: None,
        children,
        cluster: None,
        vaf,
        height,
        branch_length: 0.0,
        interval: Some(interval),
    });
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NeEstimatorKind;

    fn scenario() -> Vec<MutationCluster> {
        vec![
            MutationCluster::synthetic("A", 0.9, 5),
            MutationCluster::synthetic("B", 0.5, 10),
            MutationCluster::synthetic("C", 0.2, 20),
        ]
    }

    fn builder(tie_break: TieBreak) -> CoalescentTreeBuilder {
        let config = CoalescentConfig {
            tie_break,
            ..Default::default()
        };
        CoalescentTreeBuilder::new(&config, 42)
    }

    #[test]
    fn test_three_cluster_scenario() {
        let tree = builder(TieBreak::ClusterId).build_tree(&scenario(), true).unwrap();

        assert!(tree.validate().is_ok());
        assert_eq!(tree.n_leaves(), 3);
        assert_eq!(tree.n_nodes(), 5);
        assert_eq!(tree.merge_events(), 2);
        assert_eq!(tree.intervals.len(), 2);
        assert!(tree.intervals.iter().all(|iv| iv.ne_estimate > 0.0));

        // Root coalesces at the highest VAF
        let root = tree.node(tree.root);
        assert_eq!(root.vaf, 0.9);
        assert!((root.height - (1.0 / 0.2 - 1.0 / 0.9)).abs() < 1e-12);
        assert!(root.children.contains(&0));
    }

    #[test]
    fn test_intervals_partition_vaf_range() {
        let tree = builder(TieBreak::ClusterId).build_tree(&scenario(), true).unwrap();
        let iv = &tree.intervals;
        assert_eq!(iv[0].vaf_upper, 0.9);
        assert_eq!(iv[iv.len() - 1].vaf_lower, 0.2);
        for pair in iv.windows(2) {
            assert_eq!(pair[0].vaf_lower, pair[1].vaf_upper);
        }
        // Lineage count grows towards the present
        assert_eq!(iv[0].lineages, 2);
        assert_eq!(iv[1].lineages, 3);
    }

    #[test]
    fn test_skyline_values() {
        let tree = builder(TieBreak::ClusterId).build_tree(&scenario(), true).unwrap();
        // Top interval: k=2, T = 1/0.5 - 1/0.9
        let t0 = 1.0 / 0.5 - 1.0 / 0.9;
        assert!((tree.intervals[0].ne_estimate - t0).abs() < 1e-12);
        // Bottom interval: k=3, T = 1/0.2 - 1/0.5 = 3, N = 3·3
        assert!((tree.intervals[1].ne_estimate - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_neutral_rejected() {
        let result = builder(TieBreak::ClusterId).build_tree(&scenario(), false);
        assert!(matches!(result, Err(LineageError::NonNeutralEvolution { .. })));
    }

    #[test]
    fn test_empty_clusters_rejected() {
        let empty = vec![MutationCluster::synthetic("A", 0.5, 0)];
        let result = builder(TieBreak::ClusterId).build_tree(&empty, true);
        assert!(matches!(result, Err(LineageError::InsufficientData { .. })));
    }

    #[test]
    fn test_tied_lowest_vaf_unresolved() {
        let clusters = vec![
            MutationCluster::synthetic("A", 0.8, 3),
            MutationCluster::synthetic("B", 0.3, 3),
            MutationCluster::synthetic("C", 0.3, 3),
        ];
        match builder(TieBreak::ClusterId).build_tree(&clusters, true) {
            Err(LineageError::UnresolvedLineage { remaining, vaf }) => {
                assert_eq!(remaining, 2);
                assert_eq!(vaf, 0.3);
            }
            other => panic!("expected UnresolvedLineage, got {:?}", other),
        }
    }

    #[test]
    fn test_single_cluster_is_root_leaf() {
        let clusters = vec![MutationCluster::synthetic("A", 0.4, 7)];
        let tree = builder(TieBreak::ClusterId).build_tree(&clusters, true).unwrap();
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.root, 0);
        assert!(tree.node(0).is_leaf() && tree.node(0).is_root());
        assert!(tree.intervals.is_empty());
        assert_eq!(tree.founders(), vec![0]);
    }

    #[test]
    fn test_tied_level_binary_by_cluster_id() {
        let clusters = vec![
            MutationCluster::synthetic("B", 0.6, 2),
            MutationCluster::synthetic("A", 0.6, 2),
            MutationCluster::synthetic("C", 0.9, 2),
            MutationCluster::synthetic("D", 0.1, 2),
        ];
        let tree = builder(TieBreak::ClusterId).build_tree(&clusters, true).unwrap();
        assert!(tree.validate().is_ok());
        assert_eq!(tree.merge_events(), 3);
        assert_eq!(tree.n_nodes(), 7);

        // Sorted: C, A, B, D. B merges with D first, then A joins.
        let ids: Vec<&str> = tree.clusters.iter().map(|c| c.cluster_id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B", "D"]);
        let first = tree.node(tree.node(3).parent.unwrap());
        assert!(first.children.contains(&2));
        let second = tree.node(first.parent.unwrap());
        assert!(second.children.contains(&1));
        assert!(second.height > first.height);

        // One interval with two mergers starting from four lineages
        assert_eq!(tree.intervals[1].mergers, 2);
        assert_eq!(tree.intervals[1].lineages, 4);
    }

    #[test]
    fn test_polytomy_tie_break() {
        let clusters = vec![
            MutationCluster::synthetic("A", 0.9, 2),
            MutationCluster::synthetic("B", 0.5, 2),
            MutationCluster::synthetic("C", 0.5, 2),
            MutationCluster::synthetic("D", 0.2, 2),
        ];
        let tree = builder(TieBreak::Polytomy).build_tree(&clusters, true).unwrap();
        assert!(tree.validate().is_ok());
        assert_eq!(tree.merge_events(), 3);
        let parent = tree.node(tree.node(3).parent.unwrap());
        assert_eq!(parent.children.len(), 3);
    }

    #[test]
    fn test_deterministic_rebuild() {
        let clusters = vec![
            MutationCluster::synthetic("A", 0.9, 2),
            MutationCluster::synthetic("B", 0.5, 2),
            MutationCluster::synthetic("C", 0.5, 2),
            MutationCluster::synthetic("E", 0.5, 2),
            MutationCluster::synthetic("D", 0.2, 2),
        ];
        for tie_break in [TieBreak::ClusterId, TieBreak::Seeded, TieBreak::Polytomy] {
            let a = builder(tie_break).build_tree(&clusters, true).unwrap();
            let b = builder(tie_break).build_tree(&clusters, true).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_input_order_irrelevant() {
        let mut shuffled = scenario();
        shuffled.reverse();
        let a = builder(TieBreak::ClusterId).build_tree(&scenario(), true).unwrap();
        let b = builder(TieBreak::ClusterId).build_tree(&shuffled, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_median_estimator_and_bootstrap() {
        let config = CoalescentConfig {
            ne_estimator: NeEstimatorKind::MedianMatching,
            ne_bootstrap_replicates: 200,
            ..Default::default()
        };
        let tree = CoalescentTreeBuilder::new(&config, 7)
            .build_tree(&scenario(), true)
            .unwrap();
        for iv in &tree.intervals {
            let (lo, hi) = iv.ne_confidence.unwrap();
            assert!(lo > 0.0 && lo <= hi);
            assert!(iv.ne_estimate > 0.0);
        }
    }

    struct DurationOnly;

    impl NeEstimator for DurationOnly {
        fn estimate(&self, _lineages: usize, _mergers: usize, duration: f64) -> f64 {
            duration
        }

        fn name(&self) -> &'static str {
            "duration_only"
        }
    }

    #[test]
    fn test_custom_estimator_replaces_skyline() {
        let tree = builder(TieBreak::ClusterId)
            .with_estimator(Box::new(DurationOnly))
            .build_tree(&scenario(), true)
            .unwrap();
        assert_eq!(tree.intervals.len(), 2);
        for iv in &tree.intervals {
            let duration = 1.0 / iv.vaf_lower - 1.0 / iv.vaf_upper;
            assert!((iv.ne_estimate - duration).abs() < 1e-12);
        }
        // Skyline would give 9 for the bottom interval
        assert!((tree.intervals[1].ne_estimate - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_node_heights_increase_towards_root() {
        let clusters: Vec<MutationCluster> = [0.95, 0.7, 0.7, 0.4, 0.25, 0.1]
            .iter()
            .enumerate()
            .map(|(i, &v)| MutationCluster::synthetic(format!("K{}", i), v, 3))
            .collect();
        let tree = builder(TieBreak::ClusterId).build_tree(&clusters, true).unwrap();
        assert!(tree.validate().is_ok());
        assert_eq!(tree.merge_events(), clusters.len() - 1);
        for node in &tree.nodes {
            if let Some(parent) = node.parent {
                assert!(tree.node(parent).height > node.height);
            }
        }
    }
}
