//! Configuration surface for a spectrum-slicing solve.
//!
//! All knobs are plain scalars read once at setup. The heuristic constants
//! (`leap_budget`, `early_exit_margin`, `keep` and the completion budgets)
//! ship with the empirically chosen defaults of the classical restarted
//! Lanczos slicing strategy; they are exposed as fields rather than hard
//! invariants so that pathological spectra can be accommodated without
//! touching solver code.

use serde::Serialize;

/// Minimum admissible value for [`SliceOptions::nev`] in slicing runs.
///
/// Below this the per-shift subspaces are too small for the inertia-driven
/// completion tests to be meaningful.
pub const MIN_NEV: usize = 10;

/// Options controlling a spectrum-slicing solve.
#[derive(Debug, Clone, Serialize)]
pub struct SliceOptions {
    /// Number of eigenvalues targeted by each local Krylov-Schur run.
    /// This is a per-shift working quantity; the total number of computed
    /// eigenvalues is dictated by the interval's inertia difference.
    pub nev: usize,
    /// Maximum dimension of the Krylov basis. `None` applies the defaulting
    /// rule `min(n, max(2 * nev, nev + 15))`.
    pub ncv: Option<usize>,
    /// Maximum projected-problem dimension. `None` defaults to `ncv`.
    pub mpd: Option<usize>,
    /// Relative residual tolerance for Ritz-pair acceptance.
    pub tol: f64,
    /// Global restart-iteration budget per shift.
    pub max_it: usize,
    /// Number of independent sub-interval partitions.
    pub npart: usize,
    /// Seed for start-vector generation. Fixed by default so that repeated
    /// solves of the same problem are bit-identical.
    pub seed: u64,
    /// Maximum number of consecutive ×10 geometric expansions allowed on an
    /// open-ended interval before the solve aborts.
    pub leap_budget: usize,
    /// Early-exit margin: a run stops once `k > nev` and fewer than this
    /// many basis columns remain.
    pub early_exit_margin: usize,
    /// Fraction of the unconverged subspace retained at each restart.
    pub keep: f64,
}

impl Default for SliceOptions {
    fn default() -> Self {
        Self {
            nev: 20,
            ncv: None,
            mpd: None,
            // Spectrum slicing uses a tighter tolerance than a plain
            // Krylov-Schur run: misclassified values corrupt the bracket
            // bookkeeping, not just the accuracy of one pair.
            tol: 1e-10,
            max_it: 100,
            npart: 1,
            seed: 0x5_11CE,
            leap_budget: 5,
            early_exit_margin: 5,
            keep: 0.5,
        }
    }
}

impl SliceOptions {
    /// Basis size after applying the defaulting rule for a problem of
    /// dimension `n`.
    pub(crate) fn ncv_for(&self, n: usize) -> usize {
        let ncv = self
            .ncv
            .unwrap_or_else(|| usize::max(2 * self.nev, self.nev + 15));
        ncv.min(n)
    }

    /// Projected-problem dimension after defaulting.
    pub(crate) fn mpd_for(&self, n: usize) -> usize {
        self.mpd.unwrap_or(usize::MAX).min(self.ncv_for(n))
    }

    /// Number of eigenvalues a completion phase may still chase per side.
    pub(crate) fn n_max_compl(&self) -> usize {
        self.nev / 4
    }

    /// Iteration budget of one completion phase.
    pub(crate) fn iter_compl(&self) -> usize {
        self.max_it / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ncv_defaulting_rule() {
        let opts = SliceOptions::default();
        // max(2*20, 20+15) = 40, clamped by n.
        assert_eq!(opts.ncv_for(1000), 40);
        assert_eq!(opts.ncv_for(25), 25);
        assert_eq!(opts.mpd_for(25), 25);
    }

    #[test]
    fn completion_budgets_follow_dimensions() {
        let opts = SliceOptions {
            nev: 40,
            max_it: 200,
            ..Default::default()
        };
        assert_eq!(opts.n_max_compl(), 10);
        assert_eq!(opts.iter_compl(), 50);
    }
}
