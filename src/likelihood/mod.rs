use hashbrown::HashSet;
use nalgebra::DMatrix;

use crate::species_tree::SpeciesTree;
use crate::tree::NodeIdx;

mod transfer_scorer;
pub use transfer_scorer::*;

/// Per-gene-family log-likelihoods of the current species tree.
pub type PerFamilyLl = Vec<f64>;

/// Dense transfer counts between species branches, indexed by the local
/// id space of `ids_to_labels`. Immutable once extracted.
#[derive(Debug, Clone)]
pub struct TransferFrequencies {
    pub count: DMatrix<u32>,
    pub ids_to_labels: Vec<String>,
}

impl TransferFrequencies {
    pub fn new(ids_to_labels: Vec<String>) -> Self {
        let n = ids_to_labels.len();
        Self {
            count: DMatrix::zeros(n, n),
            ids_to_labels,
        }
    }

    pub fn species_count(&self) -> usize {
        self.ids_to_labels.len()
    }
}

/// Reconciliation event counts per species branch, indexed by flat node
/// index.
#[derive(Debug, Clone, Default)]
pub struct PerSpeciesEvents {
    pub speciations: Vec<u32>,
    pub duplications: Vec<u32>,
    pub transfers: Vec<u32>,
    pub losses: Vec<u32>,
}

/// Transfer opportunities aggregated over the gene families, regardless of
/// the current dating.
#[derive(Debug, Clone, Default)]
pub struct PotentialTransfers {
    pub per_species: Vec<u32>,
    pub total: u64,
}

/// One-shot extraction of dated-transfer statistics from a scorer.
#[derive(Debug, Clone)]
pub struct TransferInformation {
    pub frequencies: TransferFrequencies,
    pub per_species_events: PerSpeciesEvents,
    pub potential_transfers: PotentialTransfers,
}

/// Likelihood-style evaluator of a species tree and its dating, the
/// capability the dating and root searches are driven by.
///
/// The tree is lent for the duration of each call; implementations keep
/// caches, not tree references. Rollback checkpoints bracket speculative
/// root changes and unwind in LIFO order.
pub trait SpeciesTreeScorer {
    /// Total score of the current tree and dating; fills the per-family
    /// vector when one is passed.
    fn compute_likelihood(&mut self, tree: &SpeciesTree, per_fam: Option<&mut PerFamilyLl>)
        -> f64;

    /// Cheaper, possibly approximate score.
    fn compute_likelihood_fast(&mut self, tree: &SpeciesTree) -> f64;

    /// Whether the score depends on the dating at all.
    fn is_dated(&self) -> bool;

    fn is_verbose(&self) -> bool {
        false
    }

    fn push_rollback(&mut self);

    fn pop_and_apply_rollback(&mut self);

    fn transfer_information(&mut self, tree: &SpeciesTree) -> TransferInformation;

    /// Invalidation hook, to be wired after every change to the node dates.
    fn on_species_dates_change(&mut self);

    /// Invalidation hook, to be wired after every change to the topology.
    fn on_species_tree_change(&mut self, nodes_to_invalidate: Option<&HashSet<NodeIdx>>);

    fn prune_species_tree(&mut self) -> bool;

    fn optimize_model_rates(&mut self, thorough: bool) -> f64;
}
