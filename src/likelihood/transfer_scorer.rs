use hashbrown::HashSet;
use rayon::prelude::*;

use crate::likelihood::{PerFamilyLl, SpeciesTreeScorer, TransferFrequencies, TransferInformation};
use crate::species_tree::SpeciesTree;
use crate::tree::NodeIdx;

/// Surrogate scorer over precomputed transfer frequencies: the score of a
/// dating is the number of recorded transfers it permits. Cheap enough to
/// drive thousands of hill-climbing steps while exploring random datings.
///
/// Only the likelihood entry points and the verbosity flag are served;
/// every other capability is outside this scorer's usage pattern and
/// aborts.
pub struct TransferScorer<'a> {
    frequencies: &'a TransferFrequencies,
}

impl<'a> TransferScorer<'a> {
    pub fn new(frequencies: &'a TransferFrequencies) -> Self {
        Self { frequencies }
    }

    fn transfer_score(&self, tree: &SpeciesTree) -> u64 {
        let label_to_id = tree.label_to_id();
        let topology = tree.tree();
        let dated = tree.dated();
        let frequencies = self.frequencies;
        let n = frequencies.species_count();
        // parallelize across source species for less computational redundancy;
        // workers accumulate locally and the results are reduce-summed
        (0..n)
            .into_par_iter()
            .map(|from| {
                let mut local = 0u64;
                for to in 0..n {
                    let count = frequencies.count[(from, to)];
                    if count == 0 {
                        continue;
                    }
                    let src = label_to_id[&frequencies.ids_to_labels[from]];
                    let dest = label_to_id[&frequencies.ids_to_labels[to]];
                    if dated.can_transfer_under_rel_dated(topology, src, dest) {
                        local += u64::from(count);
                    }
                }
                local
            })
            .sum()
    }
}

impl SpeciesTreeScorer for TransferScorer<'_> {
    fn compute_likelihood(
        &mut self,
        tree: &SpeciesTree,
        _per_fam: Option<&mut PerFamilyLl>,
    ) -> f64 {
        self.compute_likelihood_fast(tree)
    }

    fn compute_likelihood_fast(&mut self, tree: &SpeciesTree) -> f64 {
        self.transfer_score(tree) as f64
    }

    fn is_verbose(&self) -> bool {
        false
    }

    fn is_dated(&self) -> bool {
        unimplemented!("the transfer surrogate never reports datedness")
    }

    fn push_rollback(&mut self) {
        unimplemented!("the transfer surrogate has no rollback state")
    }

    fn pop_and_apply_rollback(&mut self) {
        unimplemented!("the transfer surrogate has no rollback state")
    }

    fn transfer_information(&mut self, _tree: &SpeciesTree) -> TransferInformation {
        unimplemented!("the transfer surrogate does not reconcile gene families")
    }

    fn on_species_dates_change(&mut self) {
        unimplemented!("the transfer surrogate keeps no caches to invalidate")
    }

    fn on_species_tree_change(&mut self, _nodes_to_invalidate: Option<&HashSet<NodeIdx>>) {
        unimplemented!("the transfer surrogate keeps no caches to invalidate")
    }

    fn prune_species_tree(&mut self) -> bool {
        unimplemented!("the transfer surrogate does not prune")
    }

    fn optimize_model_rates(&mut self, _thorough: bool) -> f64 {
        unimplemented!("the transfer surrogate has no model rates")
    }
}
