use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::{Debug, Display};

use anyhow::bail;
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::tree::NodeIdx::{Internal as Int, Leaf};
use crate::{f64_h, Result};

pub mod tree_parser;

mod tree_node;
pub use tree_node::*;

#[derive(PartialEq, Clone, Copy, PartialOrd, Eq, Ord, Hash)]
pub enum NodeIdx {
    Internal(usize),
    Leaf(usize),
}

impl Display for NodeIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Int(idx) => write!(f, "internal node {}", idx),
            Leaf(idx) => write!(f, "leaf node {}", idx),
        }
    }
}

impl Debug for NodeIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Int(idx) => write!(f, "Int({})", idx),
            Leaf(idx) => write!(f, "Leaf({})", idx),
        }
    }
}

impl From<&NodeIdx> for usize {
    fn from(node_idx: &NodeIdx) -> usize {
        Self::from(*node_idx)
    }
}

impl From<NodeIdx> for usize {
    fn from(node_idx: NodeIdx) -> usize {
        match node_idx {
            Int(idx) => idx,
            Leaf(idx) => idx,
        }
    }
}

/// Rooted binary tree over a flat node arena. Node indices are stable for
/// the lifetime of the tree; internal nodes come first in the index space,
/// then the leaves.
#[derive(Debug, Clone)]
pub struct Tree {
    pub root: NodeIdx,
    pub(crate) nodes: Vec<Node>,
    postorder: Vec<NodeIdx>,
    pub n: usize,
}

impl Tree {
    pub(crate) fn from_nodes(nodes: Vec<Node>, root: NodeIdx, n: usize) -> Self {
        debug_assert!(nodes
            .iter()
            .enumerate()
            .all(|(i, node)| usize::from(node.idx) == i));
        let mut tree = Self {
            root,
            nodes,
            postorder: Vec::new(),
            n,
        };
        tree.compute_postorder();
        tree
    }

    /// Builds a tree with a uniformly shuffled leaf set and random nested
    /// bipartitions, all branch lengths set to 1.
    pub fn random<R: Rng>(labels: &[&str], rng: &mut R) -> Result<Tree> {
        if labels.is_empty() {
            bail!("cannot build a tree without taxa");
        }
        let mut shuffled = labels.to_vec();
        shuffled.shuffle(rng);
        let newick = format!("{};", random_subtree(&shuffled, rng));
        let mut trees = tree_parser::from_newick(&newick)?;
        Ok(trees.pop().expect("a generated newick string holds one tree"))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node(&self, node_idx: &NodeIdx) -> &Node {
        &self.nodes[usize::from(node_idx)]
    }

    pub fn node_mut(&mut self, node_idx: &NodeIdx) -> &mut Node {
        &mut self.nodes[usize::from(node_idx)]
    }

    /// Node lookup by flat arena index.
    pub fn node_at(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn inner_node_count(&self) -> usize {
        self.nodes.len() - self.n
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.is_leaf())
    }

    pub fn postorder(&self) -> &[NodeIdx] {
        &self.postorder
    }

    pub(crate) fn compute_postorder(&mut self) {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(self.node(&idx).children.iter().copied());
        }
        order.reverse();
        self.postorder = order;
    }

    pub fn preorder_subroot(&self, subroot: &NodeIdx) -> Vec<NodeIdx> {
        let mut order = Vec::new();
        let mut stack = vec![*subroot];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(self.node(&idx).children.iter().rev());
        }
        order
    }

    pub fn subtree_leaf_ids(&self, subroot: &NodeIdx) -> Vec<&str> {
        self.preorder_subroot(subroot)
            .iter()
            .filter(|idx| matches!(idx, Leaf(_)))
            .map(|idx| self.node(idx).id.as_str())
            .collect()
    }

    pub fn try_idx(&self, id: &str) -> Result<NodeIdx> {
        match self.nodes.iter().find(|node| node.id == id) {
            Some(node) => Ok(node.idx),
            None => bail!("No node with id {} in the tree.", id),
        }
    }

    pub fn equalize_branch_lengths(&mut self, blen: f64) {
        for node in self.nodes.iter_mut() {
            node.blen = blen;
        }
    }

    /// Internal nodes ordered by their distance from the root (cumulative
    /// branch lengths), parents always before children, followed by the
    /// leaves. This is the branch-length-derived dating order.
    pub fn ordered_speciations(&self) -> Vec<NodeIdx> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((f64_h::from(0.0), self.root)));
        while let Some(Reverse((depth, idx))) = heap.pop() {
            if matches!(idx, Int(_)) {
                order.push(idx);
                for &child in &self.node(&idx).children {
                    let child_depth = depth + f64_h::from(self.node(&child).blen);
                    heap.push(Reverse((child_depth, child)));
                }
            }
        }
        order.extend(self.leaves().map(|node| node.idx));
        order
    }

    pub fn can_change_root(&self, direction: u32) -> bool {
        let root = self.node(&self.root);
        if root.children.len() != 2 {
            return false;
        }
        let pivot = if direction % 2 == 1 {
            root.children[0]
        } else {
            root.children[1]
        };
        matches!(pivot, Int(_))
    }

    /// Moves the root onto one of its four grandchild branches. The pivot
    /// child keeps its node and inherits the displaced sibling; orientation
    /// is preserved so that `change_root(3 - d)` undoes `change_root(d)`.
    pub(crate) fn change_root(&mut self, direction: u32) {
        assert!(
            self.can_change_root(direction),
            "cannot change root in direction {}",
            direction
        );
        let left1 = direction % 2 == 1;
        let left2 = direction / 2 == 1;
        let root = self.root;
        let children = self.node(&root).children.clone();
        let (pivot, displaced) = if left1 {
            (children[0], children[1])
        } else {
            (children[1], children[0])
        };
        let pivot_children = self.node(&pivot).children.clone();
        let (promoted, kept) = if left2 {
            (pivot_children[0], pivot_children[1])
        } else {
            (pivot_children[1], pivot_children[0])
        };
        self.node_mut(&root).children = if left1 {
            vec![promoted, pivot]
        } else {
            vec![pivot, promoted]
        };
        self.node_mut(&pivot).children = if left2 {
            vec![kept, displaced]
        } else {
            vec![displaced, kept]
        };
        self.node_mut(&promoted).parent = Some(root);
        self.node_mut(&displaced).parent = Some(pivot);
        self.compute_postorder();
    }

    pub fn to_newick(&self) -> String {
        format!("{};", self.newick_subtree(&self.root))
    }

    fn newick_subtree(&self, idx: &NodeIdx) -> String {
        let node = self.node(idx);
        match idx {
            Leaf(_) => format!("{}:{}", node.id, node.blen),
            Int(_) => {
                let children = node
                    .children
                    .iter()
                    .map(|child| self.newick_subtree(child))
                    .join(",");
                format!("({}){}:{}", children, node.id, node.blen)
            }
        }
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_newick())
    }
}

fn random_subtree<R: Rng>(labels: &[&str], rng: &mut R) -> String {
    if labels.len() == 1 {
        return format!("{}:1", labels[0]);
    }
    let split = rng.gen_range(1..labels.len());
    format!(
        "({},{}):1",
        random_subtree(&labels[..split], rng),
        random_subtree(&labels[split..], rng)
    )
}
