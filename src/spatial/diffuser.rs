//! Gaussian diffusion of a genealogy into a 2-D domain.
//!
//! Founders (the root's children) are dropped uniformly into the domain with a
//! minimum separation. Each founder's subtree is then walked depth-first:
//! nested lineages are offset from their parent by a Gaussian whose variance
//! shrinks geometrically with nesting, and each leaf scatters one point per
//! mutation around its centre.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::config::SpatialConfig;
use crate::error::{LineageError, Result};
use crate::tree::{Genealogy, NodeId};

/// One simulated cell carrying a lineage label.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialPoint {
    pub x: f64,
    pub y: f64,
    /// Leaf node the point was emitted from.
    pub lineage_label: NodeId,
    /// Founder node whose subtree contains the leaf.
    pub founder_id: NodeId,
}

pub struct SpatialDiffuser {
    variance_scale: f64,
    offset_ratio: f64,
    min_separation: f64,
    retry_limit: usize,
}

impl SpatialDiffuser {
    pub fn new(config: &SpatialConfig) -> Self {
        Self {
            variance_scale: config.gaussian_variance_scale,
            offset_ratio: config.secondary_offset_ratio,
            min_separation: config.min_founder_separation,
            retry_limit: config.retry_limit.max(1),
        }
    }

    /// Generate the labelled point set for one genealogy.
    ///
    /// The same genealogy, domain and seed always give bit-identical points.
    /// Fails with [`LineageError::DomainSaturation`] when a founder cannot be
    /// placed clear of the others within the retry budget.
    pub fn diffuse(
        &self,
        genealogy: &Genealogy,
        domain_size: (f64, f64),
        seed: u64,
    ) -> Result<Vec<SpatialPoint>> {
        let (width, height) = domain_size;
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(LineageError::config(format!(
                "domain_size must be positive, got ({}, {})",
                width, height
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let founders = genealogy.founders();
        let positions = self.place_founders(&founders, domain_size, &mut rng)?;

        let n_points: usize = genealogy.clusters.iter().map(|c| c.mutation_count).sum();
        let mut points = Vec::with_capacity(n_points);

        for (&founder, &position) in founders.iter().zip(&positions) {
            let walk = FounderWalk {
                founder,
                founder_depth: genealogy.depth_in_intervals(founder) as f64,
            };
            self.spread(genealogy, &walk, founder, position, 0, &mut rng, &mut points);
        }

        log::debug!(
            "diffused {} points from {} founders (seed {})",
            points.len(),
            founders.len(),
            seed
        );
        Ok(points)
    }

    /// Uniform founder placement with rejection of near collisions.
    fn place_founders(
        &self,
        founders: &[NodeId],
        (width, height): (f64, f64),
        rng: &mut StdRng,
    ) -> Result<Vec<(f64, f64)>> {
        let mut placed: Vec<(f64, f64)> = Vec::with_capacity(founders.len());

        for &founder in founders {
            let mut attempts = 0;
            loop {
                if attempts == self.retry_limit {
                    return Err(LineageError::DomainSaturation { founder, attempts });
                }
                attempts += 1;

                let candidate = (rng.gen_range(0.0..width), rng.gen_range(0.0..height));
                let collides = placed.iter().any(|&(px, py)| {
                    let (dx, dy) = (candidate.0 - px, candidate.1 - py);
                    (dx * dx + dy * dy).sqrt() <= self.min_separation
                });
                if !collides {
                    placed.push(candidate);
                    break;
                }
            }
            if attempts > 1 {
                log::debug!("founder {} placed after {} attempts", founder, attempts);
            }
        }

        Ok(placed)
    }

    /// Depth-first walk below a founder; children are visited in order.
    #[allow(clippy::too_many_arguments)]
    fn spread(
        &self,
        genealogy: &Genealogy,
        walk: &FounderWalk,
        node: NodeId,
        centre: (f64, f64),
        generation: i32,
        rng: &mut StdRng,
        points: &mut Vec<SpatialPoint>,
    ) {
        let shrink = self.offset_ratio.powi(generation);

        if genealogy.node(node).is_leaf() {
            let sigma = (self.variance_scale * walk.founder_depth * shrink).sqrt();
            let count = genealogy.cluster_of(node).map_or(0, |c| c.mutation_count);
            for _ in 0..count {
                let (dx, dy) = gaussian_offset(sigma, rng);
                points.push(SpatialPoint {
                    x: centre.0 + dx,
                    y: centre.1 + dy,
                    lineage_label: node,
                    founder_id: walk.founder,
                });
            }
            return;
        }

        let child_shrink = shrink * self.offset_ratio;
        for &child in genealogy.children(node) {
            let depth = genealogy.depth_in_intervals(child) as f64;
            let sigma = (self.variance_scale * depth * child_shrink).sqrt();
            let (dx, dy) = gaussian_offset(sigma, rng);
            let child_centre = (centre.0 + dx, centre.1 + dy);
            self.spread(genealogy, walk, child, child_centre, generation + 1, rng, points);
        }
    }
}

struct FounderWalk {
    founder: NodeId,
    founder_depth: f64,
}

/// Two standard normals scaled by `sigma`.
fn gaussian_offset(sigma: f64, rng: &mut StdRng) -> (f64, f64) {
    let zx: f64 = StandardNormal.sample(rng);
    let zy: f64 = StandardNormal.sample(rng);
    (sigma * zx, sigma * zy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::cluster::MutationCluster;
    use crate::coalescent::CoalescentTreeBuilder;
    use crate::config::CoalescentConfig;

    fn scenario_tree() -> Genealogy {
        let clusters = vec![
            MutationCluster::synthetic("A", 0.9, 5),
            MutationCluster::synthetic("B", 0.5, 10),
            MutationCluster::synthetic("C", 0.2, 20),
        ];
        CoalescentTreeBuilder::new(&CoalescentConfig::default(), 1)
            .build_tree(&clusters, true)
            .unwrap()
    }

    fn diffuser_with_scale(scale: f64) -> SpatialDiffuser {
        SpatialDiffuser::new(&SpatialConfig {
            gaussian_variance_scale: scale,
            ..Default::default()
        })
    }

    #[test]
    fn test_one_point_per_mutation() {
        let tree = scenario_tree();
        let points = diffuser_with_scale(0.001).diffuse(&tree, (1.0, 1.0), 42).unwrap();
        assert_eq!(points.len(), 35);

        let mut counts: BTreeMap<NodeId, usize> = BTreeMap::new();
        for p in &points {
            *counts.entry(p.lineage_label).or_default() += 1;
        }
        let expected: BTreeMap<NodeId, usize> = [(0, 5), (1, 10), (2, 20)].into_iter().collect();
        assert_eq!(counts, expected);

        // Every point belongs to a founder's subtree
        let founders = tree.founders();
        for p in &points {
            assert!(founders.contains(&p.founder_id));
            assert!(tree.leaves_under(p.founder_id).contains(&p.lineage_label));
        }
    }

    #[test]
    fn test_same_seed_same_points() {
        let tree = scenario_tree();
        let diffuser = diffuser_with_scale(0.001);
        let a = diffuser.diffuse(&tree, (1.0, 1.0), 7).unwrap();
        let b = diffuser.diffuse(&tree, (1.0, 1.0), 7).unwrap();
        assert_eq!(a, b);

        let c = diffuser.diffuse(&tree, (1.0, 1.0), 8).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_displacements_scale_with_sigma() {
        let tree = scenario_tree();
        let small = diffuser_with_scale(0.001).diffuse(&tree, (1.0, 1.0), 3).unwrap();
        let large = diffuser_with_scale(0.004).diffuse(&tree, (1.0, 1.0), 3).unwrap();

        // 4x variance doubles every within-lineage distance
        let within = |pts: &[SpatialPoint], i: usize, j: usize| {
            let (dx, dy) = (pts[i].x - pts[j].x, pts[i].y - pts[j].y);
            (dx * dx + dy * dy).sqrt()
        };
        for (i, j) in [(0, 1), (5, 9), (20, 30)] {
            assert_eq!(small[i].lineage_label, small[j].lineage_label);
            let ratio = within(&large, i, j) / within(&small, i, j);
            assert!((ratio - 2.0).abs() < 1e-9, "ratio {}", ratio);
        }
    }

    #[test]
    fn test_single_cluster_single_founder() {
        let clusters = vec![MutationCluster::synthetic("A", 0.3, 12)];
        let tree = CoalescentTreeBuilder::new(&CoalescentConfig::default(), 0)
            .build_tree(&clusters, true)
            .unwrap();
        let points = diffuser_with_scale(0.001).diffuse(&tree, (1.0, 1.0), 1).unwrap();
        assert_eq!(points.len(), 12);
        assert!(points.iter().all(|p| p.founder_id == 0 && p.lineage_label == 0));
    }

    #[test]
    fn test_domain_saturation() {
        let tree = scenario_tree();
        let diffuser = SpatialDiffuser::new(&SpatialConfig {
            min_founder_separation: 10.0,
            retry_limit: 5,
            ..Default::default()
        });
        match diffuser.diffuse(&tree, (1.0, 1.0), 42) {
            Err(LineageError::DomainSaturation { founder, attempts }) => {
                assert_eq!(founder, tree.founders()[1]);
                assert_eq!(attempts, 5);
            }
            other => panic!("expected DomainSaturation, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_domain_rejected() {
        let tree = scenario_tree();
        let result = diffuser_with_scale(0.001).diffuse(&tree, (0.0, 1.0), 1);
        assert!(matches!(result, Err(LineageError::Config(_))));
    }
}
