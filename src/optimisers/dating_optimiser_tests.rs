use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::likelihood::{
    PerFamilyLl, PerSpeciesEvents, PotentialTransfers, SpeciesTreeScorer, TransferFrequencies,
    TransferInformation,
};
use crate::optimisers::{
    best_datings_from_reconciliation, optimize_dates, optimize_dates_local, perturbate_dates,
    SpeciesSearchState,
};
use crate::species_tree::SpeciesTree;
use crate::tree::NodeIdx;

fn eight_leaf_tree() -> SpeciesTree {
    SpeciesTree::from_newick(
        "((((A:1,B:1)e:1,(C:1,D:1)f:1)c:1,(E:1,F:1)g:1)a:1,(G:1,H:1)h:1)r:1;",
        true,
    )
    .unwrap()
}

fn taxa_tree(count: usize, seed: u64) -> SpeciesTree {
    let labels: Vec<String> = (0..count).map(|i| format!("t{}", i)).collect();
    let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    SpeciesTree::from_taxa(&refs, true, &mut rng).unwrap()
}

// A valid speciation order reachable from the current one, as ranks of the
// internal nodes. The tree dating is left as found.
fn scrambled_target(tree: &mut SpeciesTree, seed: u64) -> Vec<usize> {
    let initial = tree.dating_backup();
    let inner = tree.tree().inner_node_count();
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..200 {
        let rank = rng.gen_range(0..inner);
        if rng.gen_bool(0.5) {
            tree.move_up(rank);
        } else {
            tree.move_down(rank);
        }
    }
    let target = tree.dating_backup()[..inner].to_vec();
    tree.restore_dates(&initial);
    target
}

// Scores a dating by its squared rank distance to a fixed target order,
// negated; the target itself scores 0.
struct TargetDatingScorer {
    target: Vec<usize>,
}

impl TargetDatingScorer {
    fn score(&self, tree: &SpeciesTree) -> f64 {
        -self
            .target
            .iter()
            .enumerate()
            .map(|(idx, &target)| {
                let diff = tree.dated().ranks()[idx] as f64 - target as f64;
                diff * diff
            })
            .sum::<f64>()
    }
}

impl SpeciesTreeScorer for TargetDatingScorer {
    fn compute_likelihood(
        &mut self,
        tree: &SpeciesTree,
        per_fam: Option<&mut PerFamilyLl>,
    ) -> f64 {
        let score = self.score(tree);
        if let Some(per_fam) = per_fam {
            per_fam.clear();
            per_fam.push(score);
        }
        score
    }

    fn compute_likelihood_fast(&mut self, tree: &SpeciesTree) -> f64 {
        self.score(tree)
    }

    fn is_dated(&self) -> bool {
        true
    }

    fn push_rollback(&mut self) {}

    fn pop_and_apply_rollback(&mut self) {}

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

// Target scorer that also hands out canned transfer frequencies, standing
// in for a full reconciliation evaluator.
struct ReconciliationStub {
    frequencies: TransferFrequencies,
    target: Vec<usize>,
}

impl SpeciesTreeScorer for ReconciliationStub {
    fn compute_likelihood(
        &mut self,
        tree: &SpeciesTree,
        per_fam: Option<&mut PerFamilyLl>,
    ) -> f64 {
        let mut scorer = TargetDatingScorer {
            target: self.target.clone(),
        };
        scorer.compute_likelihood(tree, per_fam)
    }

    fn compute_likelihood_fast(&mut self, tree: &SpeciesTree) -> f64 {
        self.compute_likelihood(tree, None)
    }

    fn is_dated(&self) -> bool {
        true
    }

    fn push_rollback(&mut self) {}

    fn pop_and_apply_rollback(&mut self) {}

    fn transfer_information(&mut self, _tree: &SpeciesTree) -> TransferInformation {
        TransferInformation {
            frequencies: self.frequencies.clone(),
            per_species_events: PerSpeciesEvents::default(),
            potential_transfers: PotentialTransfers::default(),
        }
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

struct UndatedScorer {}

impl SpeciesTreeScorer for UndatedScorer {
    fn compute_likelihood(
        &mut self,
        _tree: &SpeciesTree,
        per_fam: Option<&mut PerFamilyLl>,
    ) -> f64 {
        if let Some(per_fam) = per_fam {
            per_fam.clear();
            per_fam.push(42.0);
        }
        42.0
    }

    fn compute_likelihood_fast(&mut self, _tree: &SpeciesTree) -> f64 {
        42.0
    }

    fn is_dated(&self) -> bool {
        false
    }

    fn push_rollback(&mut self) {}

    fn pop_and_apply_rollback(&mut self) {}

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

#[test]
fn local_search_reaches_a_reachable_target() {
    let mut tree = eight_leaf_tree();
    let target = scrambled_target(&mut tree, 99);
    let mut scorer = TargetDatingScorer {
        target: target.clone(),
    };
    let ll = optimize_dates_local(&mut tree, &mut scorer, None);
    assert_eq!(ll, 0.0);
    assert_eq!(&tree.dating_backup()[..target.len()], target.as_slice());
    tree.dated().check_ranks(tree.tree());
}

#[test]
fn local_search_never_worsens() {
    let mut tree = taxa_tree(11, 13);
    let target = scrambled_target(&mut tree, 5);
    let mut scorer = TargetDatingScorer { target };
    let entry = scorer.compute_likelihood(&tree, None);
    let result = optimize_dates_local(&mut tree, &mut scorer, None);
    assert!(result >= entry);
    assert_eq!(result, scorer.compute_likelihood(&tree, None));
}

#[test]
fn better_trees_are_reported_in_increasing_order() {
    let mut tree = eight_leaf_tree();
    let target = scrambled_target(&mut tree, 31);
    let mut scorer = TargetDatingScorer { target };
    let reports = Rc::new(RefCell::new(Vec::new()));
    let sink = reports.clone();
    let mut state = SpeciesSearchState::with_callback(f64::NEG_INFINITY, move |ll, per_fam| {
        sink.borrow_mut().push((ll, per_fam.to_vec()));
    });
    let mut rng = StdRng::seed_from_u64(3);
    let ll = optimize_dates(&mut tree, &mut scorer, &mut state, true, &mut rng);
    assert_eq!(state.best_ll, ll);
    let reports = reports.borrow();
    assert!(!reports.is_empty());
    assert!(reports.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert_eq!(reports.last().unwrap().0, ll);
}

#[test]
fn repeated_thorough_optimization_is_monotone() {
    let mut tree = eight_leaf_tree();
    let target = scrambled_target(&mut tree, 53);
    let mut scorer = TargetDatingScorer { target };
    let mut state = SpeciesSearchState::new(f64::NEG_INFINITY);
    let mut rng = StdRng::seed_from_u64(8);
    let first = optimize_dates(&mut tree, &mut scorer, &mut state, true, &mut rng);
    let second = optimize_dates(&mut tree, &mut scorer, &mut state, true, &mut rng);
    assert!(second >= first);
}

#[test]
fn undated_scorers_skip_the_search() {
    let mut tree = eight_leaf_tree();
    let before = tree.dating_backup();
    let mut scorer = UndatedScorer {};
    let mut state = SpeciesSearchState::new(f64::NEG_INFINITY);
    let mut rng = StdRng::seed_from_u64(2);
    let ll = optimize_dates(&mut tree, &mut scorer, &mut state, true, &mut rng);
    assert_eq!(ll, 42.0);
    assert_eq!(tree.dating_backup(), before);
}

#[test]
fn perturbation_leaves_a_valid_dating() {
    let mut tree = taxa_tree(17, 19);
    assert_eq!(tree.tree().inner_node_count(), 16);
    let mut rng = StdRng::seed_from_u64(21);
    perturbate_dates(&mut tree, 1.0, &mut rng);
    tree.dated().check_ranks(tree.tree());
    for (position, idx) in tree.dated().order().iter().enumerate() {
        assert_eq!(tree.dated().rank(idx), position);
    }
}

#[test]
#[should_panic]
fn perturbation_must_be_positive() {
    let mut tree = eight_leaf_tree();
    let mut rng = StdRng::seed_from_u64(1);
    perturbate_dates(&mut tree, 0.0, &mut rng);
}

#[test]
fn best_datings_are_ranked_and_the_tree_is_restored() {
    let mut tree = eight_leaf_tree();
    let target = scrambled_target(&mut tree, 71);
    let labels = ["A", "B", "C", "D", "E", "F", "G", "H"];
    let mut frequencies =
        TransferFrequencies::new(labels.iter().map(|l| l.to_string()).collect());
    frequencies.count[(0, 5)] = 4;
    frequencies.count[(3, 1)] = 2;
    frequencies.count[(6, 2)] = 5;
    let mut scorer = ReconciliationStub {
        frequencies,
        target,
    };
    let before = tree.dating_backup();
    let mut rng = StdRng::seed_from_u64(4);
    let scored = best_datings_from_reconciliation(&mut tree, &mut scorer, 4, 2, &mut rng);
    assert_eq!(scored.len(), 2);
    assert!(scored[0].score >= scored[1].score);
    // the input dating is back in place
    assert_eq!(tree.dating_backup(), before);
    // the reported scores are the real likelihoods of the kept backups
    for scored_backup in &scored {
        tree.restore_dates(&scored_backup.backup);
        assert_eq!(
            scorer.compute_likelihood(&tree, None),
            scored_backup.score
        );
        tree.restore_dates(&before);
    }
}

#[test]
#[should_panic]
fn best_datings_cannot_keep_more_than_tested() {
    let mut tree = eight_leaf_tree();
    let target = scrambled_target(&mut tree, 7);
    let mut scorer = ReconciliationStub {
        frequencies: TransferFrequencies::new(Vec::new()),
        target,
    };
    let mut rng = StdRng::seed_from_u64(6);
    best_datings_from_reconciliation(&mut tree, &mut scorer, 1, 2, &mut rng);
}
