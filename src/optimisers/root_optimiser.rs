use hashbrown::HashMap;
use log::info;
use rand::Rng;

use crate::likelihood::{PerFamilyLl, SpeciesTreeScorer};
use crate::optimisers::{optimize_dates, SpeciesSearchState};
use crate::species_tree::{DatedBackup, SpeciesTree};

/// Per-family likelihood vectors of every evaluated tree, keyed by its
/// newick string.
pub type TreePerFamilyLl = Vec<(String, PerFamilyLl)>;

/// Likelihoods of the evaluated root positions, keyed by the canonical
/// root split signature.
#[derive(Debug, Default)]
pub struct RootLikelihoods {
    pub root_ll: HashMap<String, f64>,
    pub per_family_ll: HashMap<String, PerFamilyLl>,
}

impl RootLikelihoods {
    fn record(&mut self, tree: &SpeciesTree, ll: f64, per_fam: &PerFamilyLl) {
        let signature = root_signature(tree);
        self.root_ll.insert(signature.clone(), ll);
        self.per_family_ll.insert(signature, per_fam.clone());
    }

    pub fn is_empty(&self) -> bool {
        self.root_ll.is_empty()
    }
}

/// Canonical identity of a root position: the lexicographically smaller
/// side of the root bipartition, as sorted leaf labels.
pub fn root_signature(tree: &SpeciesTree) -> String {
    let topology = tree.tree();
    let mut sides: Vec<String> = tree
        .root()
        .children
        .iter()
        .map(|child| {
            let mut ids = topology.subtree_leaf_ids(child);
            ids.sort_unstable();
            ids.join(",")
        })
        .collect();
    sides.sort_unstable();
    sides.swap_remove(0)
}

#[allow(clippy::too_many_arguments)]
fn root_search_aux<R: Rng>(
    tree: &mut SpeciesTree,
    scorer: &mut dyn SpeciesTreeScorer,
    state: &mut SpeciesSearchState,
    history: &mut Vec<u32>,
    best_history: &mut Vec<u32>,
    best_backup: &mut DatedBackup,
    best_ll: &mut f64,
    mut best_ll_stack: f64,
    max_depth: usize,
    root_likelihoods: &mut Option<&mut RootLikelihoods>,
    tree_per_fam: &mut Option<&mut TreePerFamilyLl>,
    rng: &mut R,
) {
    if history.len() > max_depth {
        return;
    }
    // never move back over the branch we just came from: only the two
    // other neighbors of the new root are candidates
    let last = *history.last().expect("the history is seeded");
    for direction in [last % 2, 2 + last % 2] {
        if !tree.can_change_root(direction) {
            continue;
        }
        history.push(direction);
        scorer.push_rollback();
        let backup = tree.dating_backup();
        tree.change_root(direction);
        let thorough = !state.far_from_plausible;
        optimize_dates(tree, scorer, state, thorough, rng);
        let mut per_fam = PerFamilyLl::new();
        let ll = scorer.compute_likelihood(tree, Some(&mut per_fam));
        if let Some(recorder) = tree_per_fam.as_deref_mut() {
            recorder.push((tree.to_newick(), per_fam.clone()));
        }
        if let Some(recorder) = root_likelihoods.as_deref_mut() {
            recorder.record(tree, ll, &per_fam);
        }
        let mut new_max_depth = max_depth;
        if ll > best_ll_stack {
            // the frontier improved: allow the stack to explore deeper
            best_ll_stack = ll;
            new_max_depth = history.len() + 2;
        }
        if ll > *best_ll {
            *best_ll = ll;
            best_history.clone_from(history);
            *best_backup = tree.dating_backup();
            info!("  better root: ll={}", ll);
        }
        root_search_aux(
            tree,
            scorer,
            state,
            history,
            best_history,
            best_backup,
            best_ll,
            best_ll_stack,
            new_max_depth,
            root_likelihoods,
            tree_per_fam,
            rng,
        );
        tree.revert_change_root(direction);
        tree.restore_dates(&backup);
        scorer.pop_and_apply_rollback();
        history.pop();
    }
}

/// Explores the neighboring root positions with a bounded-depth DFS,
/// re-dating after every root change. On return the tree carries the best
/// root and dating found; the return value is their score.
///
/// The DFS unwinds every frame through the rollback brackets, so only the
/// final best-history replay distinguishes the exit state from the entry
/// state.
pub fn root_search<R: Rng>(
    tree: &mut SpeciesTree,
    scorer: &mut dyn SpeciesTreeScorer,
    state: &mut SpeciesSearchState,
    max_depth: usize,
    mut root_likelihoods: Option<&mut RootLikelihoods>,
    mut tree_per_fam: Option<&mut TreePerFamilyLl>,
    rng: &mut R,
) -> f64 {
    info!("[Species search] Root search with depth={}", max_depth);
    let mut per_fam = PerFamilyLl::new();
    let initial_ll = scorer.compute_likelihood(tree, Some(&mut per_fam));
    if let Some(recorder) = tree_per_fam.as_deref_mut() {
        recorder.clear();
        recorder.push((tree.to_newick(), per_fam.clone()));
    }
    if let Some(recorder) = root_likelihoods.as_deref_mut() {
        recorder.record(tree, initial_ll, &per_fam);
    }
    let mut best_ll = initial_ll;
    let mut best_history = Vec::new();
    let mut best_backup = tree.dating_backup();
    // two seeded starts cover both root-side branches of the initial root
    let mut history = vec![1];
    root_search_aux(
        tree,
        scorer,
        state,
        &mut history,
        &mut best_history,
        &mut best_backup,
        &mut best_ll,
        initial_ll,
        max_depth,
        &mut root_likelihoods,
        &mut tree_per_fam,
        rng,
    );
    history[0] = 0;
    root_search_aux(
        tree,
        scorer,
        state,
        &mut history,
        &mut best_history,
        &mut best_backup,
        &mut best_ll,
        initial_ll,
        max_depth,
        &mut root_likelihoods,
        &mut tree_per_fam,
        rng,
    );
    for &direction in best_history.iter().skip(1) {
        tree.change_root(direction);
    }
    tree.restore_dates(&best_backup);
    info!("[Species search] After root search: ll={}", best_ll);
    best_ll
}
