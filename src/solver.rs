//! Public solver surface: interval validation, traversal direction, the
//! per-shift driver loop and the multi-partition front end.
//!
//! A solve walks the interval shift by shift. Each extracted shift gets a
//! run setup from the deflation manager, a local Krylov-Schur run from the
//! engine and an acceptance pass from the aggregator; the scheduler then
//! decides where (and whether) to place follow-up shifts. The walk ends when
//! the pending stack drains, at which point the boundary inertias guarantee
//! that every eigenvalue in the interval was found exactly once.

use crate::aggregator;
use crate::context::SlicingContext;
use crate::deflation;
use crate::engine::KrylovEngine;
use crate::error::{SliceError, SliceErrorKind};
use crate::operator::{InertiaOracle, ShiftedOperator};
use crate::options::{SliceOptions, MIN_NEV};
use faer::Mat;
use rayon::prelude::*;
use serde::Serialize;

/// Why a solve (or one of its local runs) stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConvergedReason {
    /// All expected eigenvalues were found to tolerance.
    ConvergedTol,
    /// A local run exhausted its iteration budget before completing its
    /// bracket.
    DivergedIts,
    /// Lanczos breakdown that persisted after regenerating the start vector.
    DivergedBreakdown,
}

/// Outcome of a spectrum-slicing solve.
#[derive(Debug, Clone)]
pub struct SliceResult {
    /// Number of computed eigenpairs.
    pub nconv: usize,
    /// Eigenvalues sorted in traversal order (ascending or descending,
    /// matching the interval's direction).
    pub eigenvalues: Vec<f64>,
    /// Eigenvectors, column `i` pairs with `eigenvalues[i]`.
    pub eigenvectors: Mat<f64>,
    /// Residual error estimates aligned with `eigenvalues`.
    pub errors: Vec<f64>,
    /// Termination reason; partial results are still returned on divergence.
    pub reason: ConvergedReason,
    /// Total restart iterations over all shifts and partitions.
    pub iterations: usize,
}

/// Computes all eigenvalues of a symmetric(-definite) pencil inside a real
/// interval, together with their eigenvectors.
///
/// ```no_run
/// use spectrum_slicing::{ShiftInvert, SliceOptions, SpectrumSlicer};
///
/// # fn main() -> Result<(), spectrum_slicing::SliceError> {
/// let spectrum: Vec<f64> = (1..=100).map(f64::from).collect();
/// let op = ShiftInvert::from_spectrum(&spectrum)?;
/// let slicer = SpectrumSlicer::new(op, 10.5, 40.5, SliceOptions::default())?;
/// let result = slicer.solve()?;
/// assert_eq!(result.nconv, 30);
/// # Ok(())
/// # }
/// ```
pub struct SpectrumSlicer<T> {
    op: T,
    lo: f64,
    hi: f64,
    opts: SliceOptions,
}

impl<T> SpectrumSlicer<T>
where
    T: ShiftedOperator + InertiaOracle + Clone + Send + Sync,
{
    /// Validates the interval and options against the operator.
    ///
    /// The interval must be non-empty with at least one finite end. When it
    /// is split into partitions, both ends must be finite.
    pub fn new(op: T, lo: f64, hi: f64, opts: SliceOptions) -> Result<Self, SliceError> {
        if op.dim() == 0 {
            return Err(SliceErrorKind::EmptyOperator.into());
        }
        if !(lo < hi) || (lo == f64::NEG_INFINITY && hi == f64::INFINITY) {
            return Err(SliceErrorKind::InvalidInterval { lo, hi }.into());
        }
        if opts.nev < MIN_NEV {
            return Err(SliceErrorKind::NevTooSmall {
                nev: opts.nev,
                min: MIN_NEV,
            }
            .into());
        }
        if opts.npart > 1 && (lo == f64::NEG_INFINITY || hi == f64::INFINITY) {
            return Err(SliceErrorKind::UnboundedSplit { npart: opts.npart }.into());
        }
        Ok(Self { op, lo, hi, opts })
    }

    /// Runs the solve. Repeated calls on the same slicer produce identical
    /// results (start vectors are seeded deterministically).
    pub fn solve(&self) -> Result<SliceResult, SliceError> {
        let (dir, int0, int1, has_end) = resolve_direction(self.lo, self.hi);
        if self.opts.npart <= 1 {
            return solve_subinterval(self.op.clone(), dir, int0, int1, has_end, &self.opts);
        }

        // Uniform split; each partition is a bounded sub-interval solved
        // independently with the global traversal direction.
        let npart = self.opts.npart;
        let width = (self.hi - self.lo) / npart as f64;
        let bounds: Vec<(f64, f64)> = (0..npart)
            .map(|p| {
                let a = self.lo + p as f64 * width;
                let b = if p + 1 == npart {
                    self.hi
                } else {
                    self.lo + (p + 1) as f64 * width
                };
                (a, b)
            })
            .collect();
        log::info!("splitting [{}, {}] into {npart} partitions", self.lo, self.hi);
        let parts: Vec<SliceResult> = bounds
            .into_par_iter()
            .map(|(a, b)| {
                let (int0, int1) = if dir > 0.0 { (a, b) } else { (b, a) };
                solve_subinterval(self.op.clone(), dir, int0, int1, true, &self.opts)
            })
            .collect::<Result<_, _>>()?;
        Ok(aggregator::merge_partitions(parts, dir))
    }
}

/// Resolves an interval into traversal form `(dir, int0, int1, has_end)`.
///
/// The traversal ascends from the lower end when that end is finite and
/// nonzero, or when the upper end is open; otherwise it descends from the
/// upper end. A lower end of exactly `0.0` counts as absent here, a
/// convention kept from classical slicing interfaces where zero is the
/// unset placeholder.
fn resolve_direction(lo: f64, hi: f64) -> (f64, f64, f64, bool) {
    if (lo > f64::NEG_INFINITY && lo != 0.0) || hi == f64::INFINITY {
        (1.0, lo, hi, hi < f64::INFINITY)
    } else {
        (-1.0, hi, lo, lo > f64::NEG_INFINITY)
    }
}

/// Solves one (sub-)interval with the shift-and-invert slicing loop.
fn solve_subinterval<T>(
    mut op: T,
    dir: f64,
    int0: f64,
    int1: f64,
    has_end: bool,
    opts: &SliceOptions,
) -> Result<SliceResult, SliceError>
where
    T: ShiftedOperator + InertiaOracle,
{
    let n = op.dim();
    let inertia0 = SlicingContext::boundary_inertia(&mut op, int0)?;
    let inertia1 = SlicingContext::boundary_inertia(&mut op, int1)?;
    let mut ctx = SlicingContext::new(n, dir, int0, int1, has_end, inertia0, inertia1);
    log::info!(
        "slicing from {int0} (inertia {inertia0}) towards {int1} (inertia {inertia1}): {} eigenvalues expected",
        ctx.num_eigs
    );
    if ctx.num_eigs == 0 {
        return Ok(SliceResult {
            nconv: 0,
            eigenvalues: Vec::new(),
            eigenvectors: Mat::zeros(n, 0),
            errors: Vec::new(),
            reason: ConvergedReason::ConvergedTol,
            iterations: 0,
        });
    }

    let ncv = opts.ncv_for(n);
    let mpd = opts.mpd_for(n);
    let mut reason = ConvergedReason::ConvergedTol;

    // The first shift sits on the starting endpoint; its inertia is the
    // boundary inertia already computed.
    let first = ctx.create_shift(int0, None, None);
    ctx.pending.pop();
    ctx.s_pres = Some(first);
    ctx.shifts[first].inertia = inertia0;
    op.set_shift(int0)?;

    loop {
        let Some(id) = ctx.s_pres else { break };
        let setup = deflation::prepare_run(&mut ctx, id)?;
        let mut engine = KrylovEngine::new(n, ncv, mpd, dir, opts, setup);
        let outcome = engine.run(&op)?;
        ctx.its_ks += outcome.its;
        {
            let sh = &mut ctx.shifts[id];
            sh.nconv = outcome.nconv_side;
            sh.comp = outcome.comp;
            log::debug!(
                "shift {:.6}: {} converged in {} its, window counts {}/{} of expected {:?}",
                sh.value,
                outcome.nconv,
                outcome.its,
                outcome.count0,
                outcome.count1,
                sh.nsch
            );
        }
        let feedback = aggregator::store_eigenpairs(&mut ctx, &op, &engine, id, outcome.nconv)?;
        ctx.carry = outcome.carry;
        if !matches!(outcome.reason, ConvergedReason::ConvergedTol) {
            // A failed run leaves its bracket incomplete; retrying at the
            // same shift would repeat the failure, so stop the partition and
            // report what was found.
            log::warn!(
                "run at shift {:.6} stopped with {:?}; aborting this interval",
                ctx.shift(id).value,
                outcome.reason
            );
            reason = outcome.reason;
            break;
        }
        // Depth-first: the ahead-side shift is created first so that the
        // behind-side one (completing an existing bracket) is processed
        // first.
        if !ctx.shift(id).comp[1] {
            let v = ctx.new_shift_value(1, &feedback, opts)?;
            let nb1 = ctx.shift(id).neighb[1];
            ctx.create_shift(v, Some(id), nb1);
        }
        if !ctx.shift(id).comp[0] {
            let v = ctx.new_shift_value(0, &feedback, opts)?;
            let nb0 = ctx.shift(id).neighb[0];
            ctx.create_shift(v, nb0, Some(id));
        }
        ctx.extract_shift(&mut op)?;
    }

    // Emit in traversal order.
    let found = ctx.index_eig;
    let mut eigenvalues = Vec::with_capacity(found);
    let mut errors = Vec::with_capacity(found);
    let mut eigenvectors = Mat::<f64>::zeros(n, found);
    for i in 0..found {
        let src = ctx.perm[i];
        eigenvalues.push(ctx.eigr[src]);
        errors.push(ctx.errest[src]);
        eigenvectors
            .col_mut(i)
            .copy_from(ctx.vectors.as_ref().col(src));
    }
    log::info!(
        "interval done: {found}/{} eigenvalues in {} iterations over {} shifts",
        ctx.num_eigs,
        ctx.its_ks,
        ctx.shifts.len()
    );
    Ok(SliceResult {
        nconv: found,
        eigenvalues,
        eigenvectors,
        errors,
        reason,
        iterations: ctx.its_ks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_rule() {
        // Finite nonzero lower end: ascending.
        assert_eq!(resolve_direction(1.0, 5.0), (1.0, 1.0, 5.0, true));
        // Open upper end: ascending, no far end.
        assert_eq!(
            resolve_direction(1.0, f64::INFINITY),
            (1.0, 1.0, f64::INFINITY, false)
        );
        // Open lower end: descending from the upper end.
        assert_eq!(
            resolve_direction(f64::NEG_INFINITY, 5.0),
            (-1.0, 5.0, f64::NEG_INFINITY, false)
        );
        // A zero lower end counts as unset: descending over [0, 5].
        assert_eq!(resolve_direction(0.0, 5.0), (-1.0, 5.0, 0.0, true));
        // ... unless the upper end is open.
        assert_eq!(
            resolve_direction(0.0, f64::INFINITY),
            (1.0, 0.0, f64::INFINITY, false)
        );
    }
}
