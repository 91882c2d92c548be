use std::cell::RefCell;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::rc::{Rc, Weak};

use anyhow::bail;
use hashbrown::{HashMap, HashSet};
use log::info;
use rand::Rng;

use crate::tree::{tree_parser, Node, NodeIdx, Tree};
use crate::Result;

mod dated_tree;
pub use dated_tree::*;

/// Observer notified whenever the species tree dates or topology change.
pub trait SpeciesTreeListener {
    fn on_species_dates_change(&mut self);
    fn on_species_tree_change(&mut self, nodes_to_invalidate: Option<&HashSet<NodeIdx>>);
}

/// A rooted binary species tree together with its dating. Owns the
/// topology and the speciation order; never copied once constructed, all
/// searches mutate it in place and restore through backups.
pub struct SpeciesTree {
    tree: Tree,
    dated: DatedTree,
    listeners: Vec<Weak<RefCell<dyn SpeciesTreeListener>>>,
}

impl SpeciesTree {
    pub fn from_newick(newick: &str, use_bls: bool) -> Result<Self> {
        let mut trees = tree_parser::from_newick(newick)?;
        if trees.len() != 1 {
            bail!("Expected exactly one newick tree, found {}.", trees.len());
        }
        Ok(Self::from_tree(
            trees.pop().expect("one tree is present"),
            use_bls,
        ))
    }

    pub fn from_file(path: &Path, use_bls: bool) -> Result<Self> {
        info!("Reading species tree from file {}", path.display());
        let newick = fs::read_to_string(path)?;
        Self::from_newick(&newick, use_bls)
    }

    /// Builds a species tree with a random topology over the given taxa.
    pub fn from_taxa<R: Rng>(labels: &[&str], use_bls: bool, rng: &mut R) -> Result<Self> {
        Ok(Self::from_tree(Tree::random(labels, rng)?, use_bls))
    }

    fn from_tree(mut tree: Tree, use_bls: bool) -> Self {
        let dated = DatedTree::new(&tree, use_bls);
        dated.rescale_branch_lengths(&mut tree);
        Self {
            tree,
            dated,
            listeners: Vec::new(),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn dated(&self) -> &DatedTree {
        &self.dated
    }

    pub fn root(&self) -> &Node {
        self.tree.node(&self.tree.root)
    }

    pub fn node(&self, index: usize) -> &Node {
        self.tree.node_at(index)
    }

    /// Maps every labelled node to its flat index.
    pub fn label_to_id(&self) -> HashMap<String, usize> {
        self.tree
            .iter()
            .filter(|node| !node.id.is_empty())
            .map(|node| (node.id.clone(), usize::from(node.idx)))
            .collect()
    }

    pub fn to_newick(&self) -> String {
        self.tree.to_newick()
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        info!("Writing species tree to file {}", path.display());
        fs::write(path, format!("{}\n", self.to_newick()))?;
        Ok(())
    }

    // Listener registration is idempotent, deregistration is by identity;
    // the registry never owns an observer.

    pub fn add_listener(&mut self, listener: &Rc<RefCell<dyn SpeciesTreeListener>>) {
        let weak = Rc::downgrade(listener);
        if self.listeners.iter().any(|known| known.ptr_eq(&weak)) {
            return;
        }
        self.listeners.push(weak);
    }

    pub fn remove_listener(&mut self, listener: &Rc<RefCell<dyn SpeciesTreeListener>>) {
        let weak = Rc::downgrade(listener);
        self.listeners.retain(|known| !known.ptr_eq(&weak));
    }

    /// Must be called after every change to the node dates.
    pub fn on_species_dates_change(&mut self) {
        for listener in self.live_listeners() {
            listener.borrow_mut().on_species_dates_change();
        }
    }

    /// Must be called after every change to the tree topology.
    pub fn on_species_tree_change(&mut self, nodes_to_invalidate: Option<&HashSet<NodeIdx>>) {
        for listener in self.live_listeners() {
            listener
                .borrow_mut()
                .on_species_tree_change(nodes_to_invalidate);
        }
    }

    // Strong refs are collected before dispatch so a listener may touch the
    // registry reentrantly; dead weak refs are pruned on the way.
    fn live_listeners(&mut self) -> Vec<Rc<RefCell<dyn SpeciesTreeListener>>> {
        let live: Vec<_> = self
            .listeners
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        self.listeners.retain(|weak| weak.strong_count() > 0);
        live
    }

    pub fn move_up(&mut self, rank: usize) -> bool {
        self.dated.move_up(&self.tree, rank)
    }

    pub fn move_down(&mut self, rank: usize) -> bool {
        self.dated.move_down(&self.tree, rank)
    }

    pub fn randomize<R: Rng>(&mut self, rng: &mut R) {
        self.dated.randomize(&self.tree, rng);
    }

    pub fn dating_backup(&self) -> DatedBackup {
        self.dated.backup()
    }

    /// Restores a dating backup and notifies the listeners.
    pub fn restore_dates(&mut self, backup: &DatedBackup) {
        self.dated.restore(backup);
        self.on_species_dates_change();
    }

    pub fn can_transfer_under_rel_dated(&self, e: usize, d: usize) -> bool {
        self.dated.can_transfer_under_rel_dated(&self.tree, e, d)
    }

    pub fn can_change_root(&self, direction: u32) -> bool {
        self.tree.can_change_root(direction)
    }

    /// Moves the root to the neighboring branch described by `direction`
    /// in `0..4`, repairs the dating and notifies the listeners.
    pub fn change_root(&mut self, direction: u32) {
        self.tree.change_root(direction);
        self.dated.repair_after_topology_change(&self.tree);
        self.on_species_tree_change(None);
    }

    pub fn revert_change_root(&mut self, direction: u32) {
        self.change_root(3 - direction);
    }
}

impl Display for SpeciesTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tree)
    }
}
