//! Per-solve state of a spectrum-slicing run.
//!
//! [`SlicingContext`] is the single owner of everything that outlives one
//! local Krylov-Schur run: the shift chain, the pending-shift stack, the
//! global sorted eigenvalue storage and the rational-Krylov carryover. It is
//! constructed at the start of a solve and dropped at the end; nothing here
//! is process-global.
//!
//! Shifts form a doubly linked chain ordered by value in the traversal
//! direction. The chain is stored as an arena indexed by [`ShiftId`] so that
//! neighbor relations are plain indices and records live until teardown:
//! a shift's cached `value`/`inertia` feed scheduling decisions long after
//! the local iteration that created it has finished.

use faer::Mat;

/// Index of a [`Shift`] in the context arena.
pub(crate) type ShiftId = usize;

/// A single evaluation point on the real line.
///
/// Side indices follow the traversal direction: side 0 is behind the shift
/// (towards `int0`), side 1 is ahead (towards `int1`).
#[derive(Debug, Clone)]
pub(crate) struct Shift {
    /// Position of the shift.
    pub value: f64,
    /// Number of pencil eigenvalues below `value`. Cached when the shift is
    /// extracted and immutable afterwards.
    pub inertia: i64,
    /// Neighbors in the ordered chain, `[behind, ahead]`.
    pub neighb: [Option<ShiftId>; 2],
    /// Whether each side has reached its expected count.
    pub comp: [bool; 2],
    /// Eigenvalues still expected on each side, from inertia differences.
    pub nsch: [usize; 2],
    /// Converged values per side in the last local run (by sign of theta).
    pub nconv: [usize; 2],
    /// Acceptance window: values are attributed to this shift only if they
    /// fall strictly inside `(ext[0], ext[1])` (in traversal direction).
    pub ext: [f64; 2],
    /// Index into the global eigenvalue array where this shift's results
    /// begin.
    pub index: usize,
    /// Number of eigenvalues accepted at this shift.
    pub neigs: usize,
}

/// Ritz information retained from the previous shift's run, used to seed the
/// next run when the new shift is a direct neighbor (rational-Krylov
/// continuation).
#[derive(Debug)]
pub(crate) struct RationalCarry {
    /// Diagonal coefficients (retained Ritz values of the transformed
    /// operator).
    pub s_diag: Vec<f64>,
    /// Residual coupling coefficients (`beta * Q[last, i]`).
    pub s_off: Vec<f64>,
    /// Retained basis columns, one per coefficient pair.
    pub basis: Mat<f64>,
    /// The residual direction of the previous factorization.
    pub u: Mat<f64>,
}

impl Default for RationalCarry {
    fn default() -> Self {
        Self {
            s_diag: Vec::new(),
            s_off: Vec::new(),
            basis: Mat::zeros(0, 0),
            u: Mat::zeros(0, 0),
        }
    }
}

impl RationalCarry {
    pub(crate) fn len(&self) -> usize {
        self.s_diag.len()
    }

    pub(crate) fn clear(&mut self) {
        self.s_diag.clear();
        self.s_off.clear();
        self.basis = Mat::zeros(0, 0);
        self.u = Mat::zeros(0, 0);
    }
}

/// Spectrum-slicing context: owns all state shared between the scheduler,
/// the deflation manager and the aggregator for one solve.
pub(crate) struct SlicingContext {
    /// Traversal direction: `+1.0` ascending from `int0`, `-1.0` descending.
    pub dir: f64,
    /// Starting endpoint of the traversal.
    pub int0: f64,
    /// Far endpoint (possibly infinite).
    pub int1: f64,
    /// Whether the far end is finite.
    pub has_end: bool,
    /// Inertia at `int0`.
    pub inertia0: i64,
    /// Inertia at `int1` (`0` or the full dimension for open ends).
    pub inertia1: i64,
    /// Total expected eigenvalue count in the interval.
    pub num_eigs: usize,
    /// Shift arena; records are never freed before teardown.
    pub shifts: Vec<Shift>,
    /// LIFO stack of pending shifts (depth-first bisection).
    pub pending: Vec<ShiftId>,
    /// Shift currently being processed.
    pub s_pres: Option<ShiftId>,
    /// Previously processed shift.
    pub s_prev: Option<ShiftId>,
    /// Accepted eigenvalues, in acceptance order.
    pub eigr: Vec<f64>,
    /// Error estimates aligned with `eigr`.
    pub errest: Vec<f64>,
    /// Permutation sorting `eigr[..index_eig]` in traversal order.
    pub perm: Vec<usize>,
    /// Accepted eigenvectors, column `i` pairs with `eigr[i]`.
    pub vectors: Mat<f64>,
    /// Number of accepted eigenvalues so far.
    pub index_eig: usize,
    /// Consecutive geometric expansions without new eigenvalues.
    pub n_leap: usize,
    /// Total restart iterations over all shifts.
    pub its_ks: usize,
    /// Ritz carryover for rational-Krylov continuation.
    pub carry: RationalCarry,
}

impl SlicingContext {
    /// Creates the context for an interval already resolved into traversal
    /// form (`int0` start, `int1` end, `dir`, `has_end`) with boundary
    /// inertias computed.
    pub(crate) fn new(
        n: usize,
        dir: f64,
        int0: f64,
        int1: f64,
        has_end: bool,
        inertia0: i64,
        inertia1: i64,
    ) -> Self {
        let num_eigs = (dir * (inertia1 - inertia0) as f64).round() as usize;
        Self {
            dir,
            int0,
            int1,
            has_end,
            inertia0,
            inertia1,
            num_eigs,
            shifts: Vec::new(),
            pending: Vec::with_capacity(100),
            s_pres: None,
            s_prev: None,
            eigr: vec![0.0; num_eigs],
            errest: vec![0.0; num_eigs],
            perm: (0..num_eigs).collect(),
            vectors: Mat::zeros(n, num_eigs),
            index_eig: 0,
            n_leap: 0,
            its_ks: 0,
            carry: RationalCarry::default(),
        }
    }

    /// Shift record by id.
    pub(crate) fn shift(&self, id: ShiftId) -> &Shift {
        &self.shifts[id]
    }

    /// The shift currently being processed.
    ///
    /// # Panics
    ///
    /// Panics if no shift is current; callers only reach this inside the
    /// main loop, which is guarded by `s_pres`.
    pub(crate) fn present(&self) -> &Shift {
        &self.shifts[self.s_pres.unwrap()]
    }

    /// `true` if `a` comes strictly before `b` in the traversal direction.
    pub(crate) fn before(&self, a: f64, b: f64) -> bool {
        self.dir * (b - a) > 0.0
    }

    /// Accepted eigenvalue at sorted position `i`.
    pub(crate) fn sorted_eig(&self, i: usize) -> f64 {
        self.eigr[self.perm[i]]
    }

    /// Re-sorts the global permutation over the first `count` accepted
    /// values, keeping traversal order.
    pub(crate) fn resort(&mut self, count: usize) {
        let dir = self.dir;
        let eigr = &self.eigr;
        self.perm[..count].sort_by(|&a, &b| {
            (dir * eigr[a])
                .partial_cmp(&(dir * eigr[b]))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carryover_starts_empty_and_clear_resets_it() {
        let mut carry = RationalCarry::default();
        assert_eq!(carry.len(), 0);
        carry.s_diag = vec![0.8, -0.3];
        carry.s_off = vec![0.1, 0.2];
        carry.basis = Mat::zeros(4, 2);
        carry.u = Mat::zeros(4, 1);
        assert_eq!(carry.len(), 2);
        carry.clear();
        assert_eq!(carry.len(), 0);
        assert_eq!(carry.basis.ncols(), 0);
        assert_eq!(carry.u.ncols(), 0);
    }

    #[test]
    fn descending_context_orders_by_traversal_direction() {
        let mut ctx = SlicingContext::new(4, -1.0, 10.0, 0.0, true, 4, 0);
        assert_eq!(ctx.num_eigs, 4);
        assert!(ctx.before(8.0, 3.0));
        assert!(!ctx.before(3.0, 8.0));
        for (i, v) in [2.0, 9.0, 5.0, 7.0].into_iter().enumerate() {
            ctx.eigr[i] = v;
        }
        ctx.index_eig = 4;
        ctx.resort(4);
        let sorted: Vec<f64> = (0..4).map(|i| ctx.sorted_eig(i)).collect();
        assert_eq!(sorted, vec![9.0, 7.0, 5.0, 2.0]);
    }
}
