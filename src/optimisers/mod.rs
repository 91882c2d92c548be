use crate::likelihood::PerFamilyLl;

pub mod dating_optimiser;
pub mod root_optimiser;

#[cfg(test)]
mod dating_optimiser_tests;
#[cfg(test)]
mod root_optimiser_tests;

pub use dating_optimiser::*;
pub use root_optimiser::*;

/// Shared state of an ongoing species tree search: the best score seen so
/// far across all moves, and whether the search is still far from the
/// plausible region (in which case re-dating stays cheap).
pub struct SpeciesSearchState {
    pub best_ll: f64,
    pub far_from_plausible: bool,
    on_better_tree: Option<Box<dyn FnMut(f64, &PerFamilyLl)>>,
}

impl SpeciesSearchState {
    pub fn new(best_ll: f64) -> Self {
        Self {
            best_ll,
            far_from_plausible: true,
            on_better_tree: None,
        }
    }

    /// The callback fires every time a strictly better tree than the
    /// current best is observed, e.g. to checkpoint it to disk.
    pub fn with_callback(
        best_ll: f64,
        on_better_tree: impl FnMut(f64, &PerFamilyLl) + 'static,
    ) -> Self {
        Self {
            best_ll,
            far_from_plausible: true,
            on_better_tree: Some(Box::new(on_better_tree)),
        }
    }

    pub(crate) fn better_tree(&mut self, ll: f64, per_fam: &PerFamilyLl) {
        self.best_ll = ll;
        if let Some(callback) = self.on_better_tree.as_mut() {
            callback(ll, per_fam);
        }
    }
}
