use std::cmp::Reverse;

use log::info;
use rand::Rng;

use crate::f64_h;
use crate::likelihood::{PerFamilyLl, SpeciesTreeScorer, TransferScorer};
use crate::optimisers::SpeciesSearchState;
use crate::species_tree::{DatedBackup, SpeciesTree};

/// A dating snapshot together with its score, ordered best-first.
#[derive(Debug, Clone)]
pub struct ScoredBackup {
    pub backup: DatedBackup,
    pub score: f64,
}

/// Hill-climbs the speciation order with local rank swaps until a full
/// round gains less than 1.0. On return the tree carries the best dating
/// encountered; the return value is its score.
///
/// When a search state is passed, every score better than its global best
/// triggers the better-tree callback.
pub fn optimize_dates_local(
    tree: &mut SpeciesTree,
    scorer: &mut dyn SpeciesTreeScorer,
    mut search_state: Option<&mut SpeciesSearchState>,
) -> f64 {
    let verbose = scorer.is_verbose();
    let mut best_ll = scorer.compute_likelihood(tree, None);
    if verbose {
        info!("Starting new naive dating search from ll={}", best_ll);
    }
    let max_rank = tree.tree().inner_node_count();
    loop {
        let initial_round_ll = best_ll;
        let mut rank = 0;
        while rank < max_rank {
            if !tree.move_up(rank) {
                rank += 1;
                continue;
            }
            tree.on_species_dates_change();
            let mut per_fam = PerFamilyLl::new();
            let ll = scorer.compute_likelihood(tree, Some(&mut per_fam));
            if let Some(state) = search_state.as_deref_mut() {
                if ll > state.best_ll {
                    state.better_tree(ll, &per_fam);
                }
            }
            if ll > best_ll {
                best_ll = ll;
                // re-probe the just-perturbed neighborhood
                rank -= rank.min(2);
            } else {
                tree.move_up(rank);
            }
            rank += 1;
        }
        if verbose {
            info!("  end of round, ll={}", best_ll);
        }
        if best_ll - initial_round_ll <= 1.0 {
            break;
        }
    }
    tree.on_species_dates_change();
    if verbose {
        info!("End of naive dating search, ll={}", best_ll);
    }
    best_ll
}

/// Randomly perturbs the speciation order. The number of perturbations and
/// the maximum displacement grow with `perturbation`, typically in (0, 1].
pub fn perturbate_dates<R: Rng>(tree: &mut SpeciesTree, perturbation: f64, rng: &mut R) {
    assert!(perturbation > 0.0);
    let n = tree.tree().inner_node_count();
    let perturbations = (n as f64 * 2.0 * perturbation) as usize;
    let max_displacement = (((n as f64).sqrt() * 2.0 * perturbation) as usize).max(2);
    for _ in 0..perturbations {
        let is_up = rng.gen_bool(0.5);
        let rank = rng.gen_range(0..n);
        let displacement = 1 + rng.gen_range(0..max_displacement);
        let nodes_to_move = 1 + rng.gen_range(0..10);
        'next_perturbation: for k in 0..nodes_to_move {
            for j in 0..displacement {
                let ok = if is_up {
                    match (rank + k).checked_sub(j) {
                        Some(r) => tree.move_up(r),
                        None => false,
                    }
                } else {
                    match (rank + j).checked_sub(k) {
                        Some(r) => tree.move_down(r),
                        None => false,
                    }
                };
                if !ok {
                    break 'next_perturbation;
                }
            }
        }
    }
    tree.on_species_dates_change();
}

/// Optimizes the dating of the species tree. Scores better than the search
/// state's best are reported through its callback, so the tree on return
/// may still score below `state.best_ll` (wanted during root search).
///
/// One local round unless `thorough`, which adds perturbation-restart
/// cycles until two consecutive failures.
pub fn optimize_dates<R: Rng>(
    tree: &mut SpeciesTree,
    scorer: &mut dyn SpeciesTreeScorer,
    state: &mut SpeciesSearchState,
    thorough: bool,
    rng: &mut R,
) -> f64 {
    let mut per_fam = PerFamilyLl::new();
    let initial_ll = scorer.compute_likelihood(tree, Some(&mut per_fam));
    if initial_ll > state.best_ll {
        state.better_tree(initial_ll, &per_fam);
    }
    if !scorer.is_dated() {
        return initial_ll;
    }
    info!("[Species search] Optimizing dates, ll={}", initial_ll);
    let mut best_ll = optimize_dates_local(tree, scorer, Some(state));
    const PERTURBATION: f64 = 0.1;
    const MAX_TRIALS: usize = 2;
    let mut unsuccessful_trials = 0;
    while thorough && unsuccessful_trials < MAX_TRIALS {
        let backup = tree.dating_backup();
        perturbate_dates(tree, PERTURBATION, rng);
        let ll = optimize_dates_local(tree, scorer, Some(state));
        if ll > best_ll {
            best_ll = ll;
            unsuccessful_trials = 0;
            info!("[Species search]   better ll={}", best_ll);
        } else {
            tree.restore_dates(&backup);
            unsuccessful_trials += 1;
        }
    }
    info!("[Species search]   After date opt, ll={}", best_ll);
    best_ll
}

/// Generates `to_test` datings from random starts, ranks them with the
/// transfer-score surrogate and returns the `to_take` best rescored with
/// the real likelihood, best first. The input dating is left untouched.
pub fn best_datings_from_reconciliation<R: Rng>(
    tree: &mut SpeciesTree,
    scorer: &mut dyn SpeciesTreeScorer,
    to_test: usize,
    to_take: usize,
    rng: &mut R,
) -> Vec<ScoredBackup> {
    assert!(to_take <= to_test);
    let verbose = scorer.is_verbose();
    let reconciliation_backup = tree.dating_backup();
    let transfer_information = scorer.transfer_information(tree);
    let mut surrogate = TransferScorer::new(&transfer_information.frequencies);
    let mut scored_backups = Vec::with_capacity(to_test);
    for iteration in 0..to_test {
        tree.randomize(rng);
        // local search first to reach a good starting dating
        let mut best_score = optimize_dates_local(tree, &mut surrogate, None);
        // then perturbation-restart rounds: every failure grows the next
        // perturbation, every success restarts the counter
        const MAX_TRIALS: usize = 20;
        let mut unsuccessful_trials = 0;
        while unsuccessful_trials < MAX_TRIALS {
            let backup = tree.dating_backup();
            let perturbation = (unsuccessful_trials + 1) as f64 / MAX_TRIALS as f64;
            perturbate_dates(tree, perturbation, rng);
            let score = optimize_dates_local(tree, &mut surrogate, None);
            if score > best_score {
                best_score = score;
                unsuccessful_trials = 0;
            } else {
                tree.restore_dates(&backup);
                unsuccessful_trials += 1;
            }
        }
        scored_backups.push(ScoredBackup {
            backup: tree.dating_backup(),
            score: best_score,
        });
        if verbose {
            info!("End of iteration {}, score={}", iteration, best_score);
        }
    }
    // keep the datings with the best surrogate scores and rescore them
    // with the real likelihood
    scored_backups.sort_by_key(|sb| Reverse(f64_h::from(sb.score)));
    scored_backups.truncate(to_take);
    for scored in scored_backups.iter_mut() {
        tree.restore_dates(&scored.backup);
        let ll = scorer.compute_likelihood(tree, None);
        if verbose {
            info!("score={}, ll={}", scored.score, ll);
        }
        scored.score = ll;
    }
    scored_backups.sort_by_key(|sb| Reverse(f64_h::from(sb.score)));
    tree.restore_dates(&reconciliation_backup);
    scored_backups
}
