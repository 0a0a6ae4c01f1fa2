//! Genealogy arena for one sample.
//!
//! Nodes are indexed 0..n_nodes with leaves first (one per cluster, in
//! coalescence order), then internal nodes in the order they were merged.
//! Parent/child links are indices into the arena, so a frozen genealogy can
//! be traversed from many threads without shared ownership.

use serde::{Deserialize, Serialize};

use crate::cluster::MutationCluster;
use crate::coalescent::CoalescentInterval;

/// Index of a node in [`Genealogy::nodes`].
pub type NodeId = usize;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenealogyNode {
    pub node_id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Index into [`Genealogy::clusters`]; set on leaves only.
    pub cluster: Option<usize>,
    /// Leaf: the cluster VAF. Internal node: the VAF level it coalesced at.
    pub vaf: f64,
    /// Coalescent time before present.
    pub height: f64,
    /// Height difference to the parent; zero at the root.
    pub branch_length: f64,
    /// Interval in which this node's merger happened (internal nodes only).
    pub interval: Option<usize>,
}

impl GenealogyNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A rooted, acyclic genealogy with per-interval N_e.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Genealogy {
    pub nodes: Vec<GenealogyNode>,
    pub root: NodeId,
    /// Leaf node per cluster, `leaves[i]` holds `clusters[i]`.
    pub leaves: Vec<NodeId>,
    pub clusters: Vec<MutationCluster>,
    pub intervals: Vec<CoalescentInterval>,
}

impl Genealogy {
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn n_leaves(&self) -> usize {
        self.leaves.len()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &GenealogyNode {
        &self.nodes[id]
    }

    #[inline]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// Cluster carried by a leaf.
    pub fn cluster_of(&self, id: NodeId) -> Option<&MutationCluster> {
        self.nodes[id].cluster.map(|c| &self.clusters[c])
    }

    /// Number of merge events, counting a k-way merger as k - 1.
    pub fn merge_events(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| !n.is_leaf())
            .map(|n| n.children.len() - 1)
            .sum()
    }

    /// Top-level lineages: the root's children, or the root itself when it
    /// has none.
    pub fn founders(&self) -> Vec<NodeId> {
        let root = &self.nodes[self.root];
        if root.is_leaf() {
            vec![self.root]
        } else {
            root.children.clone()
        }
    }

    /// Leaves below `node` in pre-order.
    pub fn leaves_under(&self, node: NodeId) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let children = &self.nodes[current].children;
            if children.is_empty() {
                leaves.push(current);
            } else {
                stack.extend(children.iter().rev());
            }
        }
        leaves
    }

    /// Number of coalescent intervals between a node's height and the
    /// present, at least 1.
    pub fn depth_in_intervals(&self, node: NodeId) -> usize {
        let height = self.nodes[node].height;
        let crossed = self
            .intervals
            .iter()
            .filter(|iv| iv.height_lower < height - 1e-12)
            .count();
        crossed.max(1)
    }

    /// N_e of the interval a node's merger belongs to.
    pub fn ne_of(&self, node: NodeId) -> Option<f64> {
        self.nodes[node]
            .interval
            .map(|i| self.intervals[i].ne_estimate)
    }

    /// Post-order traversal of nodes (leaves to root).
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = vec![false; self.nodes.len()];

        fn visit(
            node: NodeId,
            genealogy: &Genealogy,
            visited: &mut Vec<bool>,
            order: &mut Vec<NodeId>,
        ) {
            if visited[node] {
                return;
            }

            for &child in &genealogy.nodes[node].children {
                visit(child, genealogy, visited, order);
            }

            visited[node] = true;
            order.push(node);
        }

        visit(self.root, self, &mut visited, &mut order);
        order
    }

    /// Check the structural invariants: one root, reciprocal links, every
    /// node reachable from the root, non-negative branch lengths.
    pub fn validate(&self) -> Result<(), String> {
        let roots: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.is_root())
            .map(|n| n.node_id)
            .collect();
        if roots != vec![self.root] {
            return Err(format!("expected single root {}, found {:?}", self.root, roots));
        }

        for node in &self.nodes {
            if let Some(parent) = node.parent {
                if !self.nodes[parent].children.contains(&node.node_id) {
                    return Err(format!(
                        "node {} lists parent {} which does not list it as a child",
                        node.node_id, parent
                    ));
                }
                if node.branch_length < 0.0 {
                    return Err(format!("node {} has negative branch length", node.node_id));
                }
            }
            for &child in &node.children {
                if self.nodes[child].parent != Some(node.node_id) {
                    return Err(format!(
                        "child {} of node {} has a different parent",
                        child, node.node_id
                    ));
                }
            }
        }

        if self.post_order().len() != self.nodes.len() {
            return Err("not every node is reachable from the root".to_string());
        }

        for (i, &leaf) in self.leaves.iter().enumerate() {
            if !self.nodes[leaf].is_leaf() || self.nodes[leaf].cluster != Some(i) {
                return Err(format!("leaf slot {} does not hold cluster {}", leaf, i));
            }
        }

        Ok(())
    }
}
