use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rand::Rng;

use crate::tree::{
    NodeIdx::{self, Internal as Int, Leaf},
    Tree,
};

/// Snapshot of a dating: the rank vector alone is enough to rebuild the
/// speciation order on restore.
pub type DatedBackup = Vec<usize>;

/// Total order over the speciation events of a rooted binary tree,
/// consistent with the parent-before-child partial order.
///
/// `order` holds every node, the internal nodes first (the root at
/// position 0, then speciations from oldest to youngest) and the leaves
/// after them; `ranks` maps flat node indices back to positions. Rank
/// moves, randomization and the transfer predicate are only available in
/// dated mode (`from_bl`).
#[derive(Debug, Clone)]
pub struct DatedTree {
    from_bl: bool,
    order: Vec<NodeIdx>,
    ranks: Vec<usize>,
}

impl DatedTree {
    pub fn new(tree: &Tree, use_bls: bool) -> Self {
        let mut dated = Self {
            from_bl: use_bls,
            order: Vec::new(),
            ranks: vec![0; tree.node_count()],
        };
        dated.update_order_and_ranks(tree);
        dated
    }

    pub fn is_dated(&self) -> bool {
        self.from_bl
    }

    pub fn order(&self) -> &[NodeIdx] {
        &self.order
    }

    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    pub fn rank(&self, idx: &NodeIdx) -> usize {
        self.ranks[usize::from(idx)]
    }

    /// Rebuilds the speciation order: reverse postorder when undated,
    /// branch-length-derived order otherwise.
    pub fn update_order_and_ranks(&mut self, tree: &Tree) {
        if !self.from_bl {
            self.order = tree.postorder().iter().rev().copied().collect();
        } else {
            self.order = tree.ordered_speciations();
        }
        for (rank, idx) in self.order.iter().enumerate() {
            self.ranks[usize::from(idx)] = rank;
        }
    }

    /// Standardizes branch lengths: a shared constant when undated,
    /// rank-difference lengths when dated (the root keeps length 1 and
    /// leaves reach one rank past the most recent speciation).
    pub fn rescale_branch_lengths(&self, tree: &mut Tree) {
        self.check_ranks(tree);
        if !self.from_bl {
            tree.equalize_branch_lengths(1.0);
            return;
        }
        let mut tree_height = 0.0;
        for &idx in &self.order {
            let node = tree.node(&idx);
            if node.parent.is_none() || node.is_leaf() {
                tree.node_mut(&idx).blen = 1.0;
                continue;
            }
            let parent = node.parent.expect("non-root node");
            let blen = (self.rank(&idx) - self.rank(&parent)) as f64;
            tree_height = self.rank(&idx) as f64;
            tree.node_mut(&idx).blen = blen;
        }
        tree_height += 1.0;
        let leaves: Vec<NodeIdx> = tree.leaves().map(|leaf| leaf.idx).collect();
        for idx in leaves {
            let parent = tree.node(&idx).parent.expect("a leaf has a parent");
            tree.node_mut(&idx).blen = tree_height - self.rank(&parent) as f64;
        }
    }

    /// Moves the node at `rank` one position towards the root. Inverse of
    /// itself on success.
    pub fn move_up(&mut self, tree: &Tree, rank: usize) -> bool {
        assert!(self.from_bl, "rank moves require a dated tree");
        if rank == 0 {
            return false;
        }
        self.move_down(tree, rank - 1)
    }

    /// Swaps the nodes at `rank` and `rank + 1` provided both are internal
    /// and not in a parent-child relation.
    pub fn move_down(&mut self, tree: &Tree, rank: usize) -> bool {
        assert!(self.from_bl, "rank moves require a dated tree");
        if rank + 1 >= self.order.len() - 1 {
            return false;
        }
        let n1 = self.order[rank];
        let n2 = self.order[rank + 1];
        if !matches!(n1, Int(_)) || !matches!(n2, Int(_)) || tree.node(&n2).parent == Some(n1) {
            return false;
        }
        self.order[rank] = n2;
        self.order[rank + 1] = n1;
        self.ranks[usize::from(n1)] += 1;
        self.ranks[usize::from(n2)] -= 1;
        true
    }

    /// Draws a random dating consistent with the topology by repeatedly
    /// picking from the frontier of nodes whose parents are already ranked.
    pub fn randomize<R: Rng>(&mut self, tree: &Tree, rng: &mut R) {
        assert!(self.from_bl, "randomize requires a dated tree");
        let mut to_add = vec![tree.root];
        let mut current_rank = 0;
        while !to_add.is_empty() {
            let i = rng.gen_range(0..to_add.len());
            let idx = to_add[i];
            match idx {
                Int(_) => {
                    self.order[current_rank] = idx;
                    self.ranks[usize::from(idx)] = current_rank;
                    current_rank += 1;
                    let node = tree.node(&idx);
                    to_add[i] = node.left().expect("internal node");
                    to_add.push(node.right().expect("internal node"));
                }
                Leaf(_) => {
                    to_add.swap_remove(i);
                }
            }
        }
    }

    pub fn backup(&self) -> DatedBackup {
        self.ranks.clone()
    }

    pub fn restore(&mut self, backup: &DatedBackup) {
        self.ranks.clone_from(backup);
        let speciations = self.order.clone();
        for idx in speciations {
            self.order[self.ranks[usize::from(idx)]] = idx;
        }
    }

    /// A transfer from branch `e` to branch `d` is feasible under the
    /// relative dating exactly when the receiver is strictly younger than
    /// the donor's parent speciation.
    pub fn can_transfer_under_rel_dated(&self, tree: &Tree, e: usize, d: usize) -> bool {
        assert!(self.from_bl, "the transfer predicate requires a dated tree");
        if e == d {
            return false;
        }
        match tree.node_at(e).parent {
            None => true,
            Some(parent) => self.ranks[d] > self.ranks[usize::from(parent)],
        }
    }

    /// Hash of the current speciation order. Advisory only: the combiner
    /// has a high collision rate, do not key caches with it.
    pub fn ordering_hash(&self, seed: u64) -> u64 {
        assert!(self.from_bl, "the ordering hash requires a dated tree");
        let mut hash = seed;
        for &rank in &self.ranks {
            hash = hash_combine(rank as u64, hash);
        }
        hash
    }

    pub fn check_ranks(&self, tree: &Tree) {
        for i in 0..self.order.len() - 1 {
            assert_eq!(
                self.rank(&self.order[i]) + 1,
                self.rank(&self.order[i + 1]),
                "speciation order and ranks disagree"
            );
        }
        for node in tree.iter() {
            if let Some(parent) = node.parent {
                assert!(
                    self.rank(&parent) < self.rank(&node.idx),
                    "child ranked before its parent"
                );
            }
        }
    }

    /// Makes the dating consistent again after a root change re-parented
    /// nodes. Stable priority topological sort keyed by the previous
    /// ranks: the old dating survives wherever it is still valid.
    pub(crate) fn repair_after_topology_change(&mut self, tree: &Tree) {
        let old_ranks = self.ranks.clone();
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((old_ranks[usize::from(tree.root)], tree.root)));
        let mut position = 0;
        while let Some(Reverse((_, idx))) = heap.pop() {
            self.order[position] = idx;
            self.ranks[usize::from(idx)] = position;
            position += 1;
            for &child in &tree.node(&idx).children {
                heap.push(Reverse((old_ranks[usize::from(child)], child)));
            }
        }
        debug_assert_eq!(position, self.order.len());
    }
}

fn hash_combine(lhs: u64, rhs: u64) -> u64 {
    lhs ^ rhs
        .wrapping_add(0x9e3779b9)
        .wrapping_add(lhs << 6)
        .wrapping_add(lhs >> 2)
}
