use hashbrown::HashSet;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::likelihood::{PerFamilyLl, SpeciesTreeScorer, TransferInformation};
use crate::optimisers::{
    root_search, root_signature, RootLikelihoods, SpeciesSearchState, TreePerFamilyLl,
};
use crate::species_tree::SpeciesTree;
use crate::tree::NodeIdx;

fn six_leaf_tree() -> SpeciesTree {
    SpeciesTree::from_newick("(((A:1,B:1)u:1,(C:1,D:1)v:1)w:1,(E:1,F:1)x:1)r:1;", true).unwrap()
}

// Deterministic score per root identity, independent of the dating.
fn score_of(signature: &str) -> f64 {
    let hash = signature
        .bytes()
        .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)));
    1000.0 - (hash % 1000) as f64
}

#[derive(Default)]
struct FixedRootScorer {
    visited: Vec<String>,
    pushes: usize,
    pops: usize,
}

impl SpeciesTreeScorer for FixedRootScorer {
    fn compute_likelihood(
        &mut self,
        tree: &SpeciesTree,
        per_fam: Option<&mut PerFamilyLl>,
    ) -> f64 {
        let signature = root_signature(tree);
        let score = score_of(&signature);
        self.visited.push(signature);
        if let Some(per_fam) = per_fam {
            per_fam.clear();
            per_fam.push(score);
        }
        score
    }

    fn compute_likelihood_fast(&mut self, tree: &SpeciesTree) -> f64 {
        score_of(&root_signature(tree))
    }

    fn is_dated(&self) -> bool {
        false
    }

    fn push_rollback(&mut self) {
        self.pushes += 1;
    }

    fn pop_and_apply_rollback(&mut self) {
        self.pops += 1;
        assert!(self.pops <= self.pushes, "rollbacks must unwind in pairs");
    }

    fn transfer_information(&mut self, _tree: &SpeciesTree) -> TransferInformation {
        unimplemented!("not a reconciliation scorer")
    }

    fn on_species_dates_change(&mut self) {}

    fn on_species_tree_change(&mut self, _nodes_to_invalidate: Option<&HashSet<NodeIdx>>) {}

    fn prune_species_tree(&mut self) -> bool {
        false
    }

    fn optimize_model_rates(&mut self, _thorough: bool) -> f64 {
        0.0
    }
}

fn distinct(visited: &[String]) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for signature in visited {
        if !seen.contains(&signature.as_str()) {
            seen.push(signature);
        }
    }
    seen
}

#[test]
fn dfs_visits_every_reachable_root_and_keeps_the_best() {
    let mut tree = six_leaf_tree();
    let initial_ll = score_of(&root_signature(&tree));
    let mut scorer = FixedRootScorer::default();
    let mut state = SpeciesSearchState::new(f64::NEG_INFINITY);
    let mut rng = StdRng::seed_from_u64(17);
    let best_ll = root_search(&mut tree, &mut scorer, &mut state, 3, None, None, &mut rng);
    // all nine root positions of a six-leaf tree are within reach
    assert_eq!(distinct(&scorer.visited).len(), 9);
    let best_visited = scorer
        .visited
        .iter()
        .map(|signature| score_of(signature))
        .fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(best_ll, best_visited);
    assert!(best_ll >= initial_ll);
    // the tree ends on the root that produced the returned score
    assert_eq!(score_of(&root_signature(&tree)), best_ll);
    tree.dated().check_ranks(tree.tree());
    assert_eq!(scorer.pushes, scorer.pops);
    assert!(scorer.pushes > 0);
}

#[test]
fn root_search_is_deterministic() {
    let run = || {
        let mut tree = six_leaf_tree();
        let mut scorer = FixedRootScorer::default();
        let mut state = SpeciesSearchState::new(f64::NEG_INFINITY);
        let mut rng = StdRng::seed_from_u64(17);
        let best_ll = root_search(&mut tree, &mut scorer, &mut state, 3, None, None, &mut rng);
        (best_ll, scorer.visited, tree.to_newick())
    };
    assert_eq!(run(), run());
}

#[test]
fn zero_depth_keeps_the_current_root() {
    let mut tree = six_leaf_tree();
    let newick = tree.to_newick();
    let initial_ll = score_of(&root_signature(&tree));
    let backup = tree.dating_backup();
    let mut scorer = FixedRootScorer::default();
    let mut state = SpeciesSearchState::new(f64::NEG_INFINITY);
    let mut rng = StdRng::seed_from_u64(23);
    let best_ll = root_search(&mut tree, &mut scorer, &mut state, 0, None, None, &mut rng);
    assert_eq!(best_ll, initial_ll);
    assert_eq!(scorer.visited.len(), 1);
    assert_eq!(tree.to_newick(), newick);
    assert_eq!(tree.dating_backup(), backup);
}

#[test]
fn recorders_capture_every_evaluated_root() {
    let mut tree = six_leaf_tree();
    let initial_signature = root_signature(&tree);
    let mut scorer = FixedRootScorer::default();
    let mut state = SpeciesSearchState::new(f64::NEG_INFINITY);
    let mut root_lls = RootLikelihoods::default();
    let mut per_tree: TreePerFamilyLl = Vec::new();
    let mut rng = StdRng::seed_from_u64(31);
    root_search(
        &mut tree,
        &mut scorer,
        &mut state,
        3,
        Some(&mut root_lls),
        Some(&mut per_tree),
        &mut rng,
    );
    assert!(!root_lls.is_empty());
    assert_eq!(root_lls.root_ll.len(), 9);
    for (signature, ll) in &root_lls.root_ll {
        assert_eq!(*ll, score_of(signature));
        assert_eq!(root_lls.per_family_ll[signature], vec![*ll]);
    }
    assert!(root_lls.root_ll.contains_key(&initial_signature));
    // one newick entry for the initial tree plus one per evaluated root
    assert_eq!(per_tree.len(), (scorer.visited.len() - 1) / 2 + 1);
}

#[test]
fn root_signature_is_side_independent() {
    let tree = six_leaf_tree();
    assert_eq!(root_signature(&tree), "A,B,C,D");
}
