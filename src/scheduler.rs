//! Shift scheduler: pending-shift stack management and placement of new
//! shifts.
//!
//! Shifts are processed in strict depth-first LIFO order: the most recently
//! created pending shift is extracted first. This makes the shift sequence
//! deterministic for a given problem regardless of how many shifts end up
//! being created, which matters for reproducibility of the whole solve.
//!
//! Placement of a new shift combines three sources of information:
//! midpoints when closing a gap between two processed shifts, geometric
//! expansion when probing an open end that yielded nothing, and a local
//! density estimate (average eigenvalue gap from inertia differences) when
//! values were found.

use crate::context::{Shift, ShiftId, SlicingContext};
use crate::error::{SliceError, SliceErrorKind};
use crate::operator::{InertiaOracle, ShiftedOperator};
use crate::options::SliceOptions;

/// Feedback from the last local run, used only when the very first shift
/// accepted nothing: the converged-but-unaccepted Ritz values still tell the
/// scheduler where the spectrum is.
#[derive(Debug, Default)]
pub(crate) struct RunFeedback {
    /// Back-transformed converged values, sorted in traversal order.
    pub lambdas: Vec<f64>,
}

impl SlicingContext {
    /// Allocates a shift, links it into the chain (fixing up neighbor
    /// back-references) and pushes it onto the pending stack.
    pub(crate) fn create_shift(
        &mut self,
        value: f64,
        neighb0: Option<ShiftId>,
        neighb1: Option<ShiftId>,
    ) -> ShiftId {
        let id = self.shifts.len();
        self.shifts.push(Shift {
            value,
            inertia: 0,
            neighb: [neighb0, neighb1],
            comp: [false, false],
            nsch: [0, 0],
            nconv: [0, 0],
            ext: [0.0, 0.0],
            index: 0,
            neigs: 0,
        });
        if let Some(n0) = neighb0 {
            self.shifts[n0].neighb[1] = Some(id);
        }
        if let Some(n1) = neighb1 {
            self.shifts[n1].neighb[0] = Some(id);
        }
        self.pending.push(id);
        id
    }

    /// Pops the most recently pushed pending shift, makes it current, caches
    /// its inertia and installs it in the spectral transform. Returns `false`
    /// once the stack is empty.
    pub(crate) fn extract_shift<T>(&mut self, op: &mut T) -> Result<bool, SliceError>
    where
        T: ShiftedOperator + InertiaOracle,
    {
        match self.pending.pop() {
            Some(id) => {
                self.s_prev = self.s_pres;
                self.s_pres = Some(id);
                let value = self.shifts[id].value;
                op.set_shift(value)?;
                self.shifts[id].inertia = op.inertia_at(value)?;
                Ok(true)
            }
            None => {
                self.s_pres = None;
                Ok(false)
            }
        }
    }

    /// Inertia at a possibly infinite point: open ends resolve to `0` or the
    /// full dimension without consulting the oracle.
    pub(crate) fn boundary_inertia<T>(op: &mut T, value: f64) -> Result<i64, SliceError>
    where
        T: ShiftedOperator + InertiaOracle,
    {
        if value == f64::INFINITY {
            Ok(op.dim() as i64)
        } else if value == f64::NEG_INFINITY {
            Ok(0)
        } else {
            op.inertia_at(value)
        }
    }

    /// Computes where the next shift on `side` of the current shift should
    /// be placed.
    pub(crate) fn new_shift_value(
        &mut self,
        side: usize,
        feedback: &RunFeedback,
        opts: &SliceOptions,
    ) -> Result<f64, SliceError> {
        let s_pres = self.present().clone();
        let dir = self.dir;
        let nev = opts.nev as f64;

        if let Some(nb) = s_pres.neighb[side] {
            // Completing a previous interval. If the neighbor is an extreme
            // probe that found nothing on this side, its position may be far
            // from any eigenvalue; bisect towards the extreme accepted value
            // instead of the neighbor itself.
            let nb = self.shift(nb);
            if nb.neighb[side].is_none() && nb.nconv[side] == 0 && self.index_eig > 0 {
                let extreme = if side == 1 {
                    self.sorted_eig(self.index_eig - 1)
                } else {
                    self.sorted_eig(0)
                };
                return Ok((s_pres.value + extreme) / 2.0);
            }
            return Ok((s_pres.value + nb.value) / 2.0);
        }

        // No neighbor on this side: extending the covered range (side 1 in
        // traversal order by construction).
        let mut new_s;
        if s_pres.neigs == 0 {
            // No value accepted at this shift.
            if let Some(n0) = s_pres.neighb[0] {
                // Multiply the previous gap by 10.
                let gap = (s_pres.value - self.shift(n0).value).abs();
                new_s = s_pres.value + 10.0 * dir * gap;
                self.n_leap += 1;
                // On an open interval there might be no further eigenvalues
                // at all; stop expanding after the budget is spent.
                if !self.has_end && self.n_leap > opts.leap_budget {
                    return Err(SliceErrorKind::LeapBudgetExceeded {
                        leaps: self.n_leap,
                    }
                    .into());
                }
            } else if !feedback.lambdas.is_empty() {
                // First shift: the unaccepted converged values still carry
                // density information.
                let lam = &feedback.lambdas;
                let behind = lam
                    .iter()
                    .take_while(|&&l| self.before(l, s_pres.value))
                    .count();
                let d_prev = if behind > 0 {
                    (s_pres.value - lam[0]).abs() / (behind as f64 + 0.3)
                } else {
                    (s_pres.value - lam[lam.len() - 1]).abs() / (lam.len() as f64 + 0.3)
                };
                new_s = s_pres.value + dir * d_prev * nev / 2.0;
            } else {
                // No values found anywhere: nothing to base a step on.
                return Err(SliceErrorKind::NoFirstShiftInfo.into());
            }
        } else {
            // Values were accepted here; estimate the local density.
            self.n_leap = 0;
            // Walk back to the nearest previous shift with a different
            // inertia (an empty stretch tells us nothing about spacing).
            let mut s = s_pres.neighb[0];
            while let Some(id) = s {
                if self.shift(id).inertia != s_pres.inertia {
                    break;
                }
                s = self.shift(id).neighb[0];
            }
            let d_prev = match s {
                Some(id) => {
                    let sh = self.shift(id);
                    ((s_pres.value - sh.value) / (s_pres.inertia - sh.inertia) as f64).abs()
                }
                None => {
                    // First shift: average distance from the values accepted
                    // at this shift. The shift itself may be far from the
                    // first wanted eigenvalue, so prefer the spread of the
                    // values when they all lie ahead of it.
                    let first = self.eigr[0];
                    let last = self.eigr[self.index_eig - 1];
                    let spread_ahead = self.before(s_pres.value, first)
                        && ((last - first) / first).abs() > opts.tol.sqrt();
                    if spread_ahead {
                        (last - first).abs() / (s_pres.neigs as f64 + 0.3)
                    } else {
                        (last - s_pres.value).abs() / (s_pres.neigs as f64 + 0.3)
                    }
                }
            };
            // Advance by half a subspace worth of average gaps, starting
            // from whichever is further ahead: the last accepted value or
            // the shift itself.
            let last_here = self.eigr[s_pres.index + s_pres.neigs - 1];
            if self.before(s_pres.value, last_here) {
                new_s = last_here + dir * d_prev * nev / 2.0;
            } else {
                new_s = s_pres.value + dir * d_prev * nev / 2.0;
            }
        }
        // The end of the interval cannot be surpassed.
        if self.dir * (self.int1 - new_s) < 0.0 {
            new_s = self.int1;
        }
        Ok(new_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> SlicingContext {
        SlicingContext::new(10, 1.0, 0.0, f64::INFINITY, false, 0, 10)
    }

    #[test]
    fn pending_stack_is_lifo() {
        let mut ctx = test_ctx();
        // Script: five creates interleaved with two pops, asserting strict
        // depth-first order.
        let s0 = ctx.create_shift(1.0, None, None);
        let s1 = ctx.create_shift(2.0, Some(s0), None);
        let s2 = ctx.create_shift(3.0, Some(s1), None);
        assert_eq!(ctx.pending.pop(), Some(s2));
        let s3 = ctx.create_shift(0.5, None, Some(s0));
        let s4 = ctx.create_shift(2.5, Some(s1), None);
        assert_eq!(ctx.pending.pop(), Some(s4));
        assert_eq!(ctx.pending, vec![s0, s1, s3]);
    }

    #[test]
    fn chain_links_are_mutually_consistent() {
        let mut ctx = test_ctx();
        let a = ctx.create_shift(1.0, None, None);
        let b = ctx.create_shift(3.0, Some(a), None);
        let c = ctx.create_shift(2.0, Some(a), Some(b));
        assert_eq!(ctx.shift(a).neighb[1], Some(c));
        assert_eq!(ctx.shift(b).neighb[0], Some(c));
        assert_eq!(ctx.shift(c).neighb, [Some(a), Some(b)]);
    }

    #[test]
    fn leap_budget_fires_exactly_at_sixth_expansion() {
        let mut ctx = test_ctx();
        let opts = SliceOptions::default();
        let feedback = RunFeedback::default();
        let origin = ctx.create_shift(0.5, None, None);
        let first = ctx.create_shift(1.0, Some(origin), None);
        ctx.pending.clear();
        ctx.s_pres = Some(first);
        let mut prev = first;
        // Six consecutive expansions with zero accepted values; the error
        // must fire on the sixth call, not earlier or later.
        for leap in 1..=6 {
            let res = ctx.new_shift_value(1, &feedback, &opts);
            if leap <= 5 {
                let v = res.unwrap_or_else(|_| panic!("leap {leap} should succeed"));
                let id = ctx.create_shift(v, Some(prev), None);
                ctx.pending.pop();
                ctx.s_pres = Some(id);
                prev = id;
            } else {
                let err = res.expect_err("sixth leap must abort");
                assert!(err.to_string().contains("open interval"));
            }
        }
        assert_eq!(ctx.n_leap, 6);
    }

    #[test]
    fn first_shift_without_information_is_fatal() {
        let mut ctx = test_ctx();
        let opts = SliceOptions::default();
        let first = ctx.create_shift(1.0, None, None);
        ctx.pending.pop();
        ctx.s_pres = Some(first);
        let err = ctx
            .new_shift_value(1, &RunFeedback::default(), &opts)
            .expect_err("no information must abort");
        assert_eq!(err.to_string(), "First shift renders no information.");
    }

    #[test]
    fn gap_completion_bisects() {
        let mut ctx = SlicingContext::new(10, 1.0, 0.0, 10.0, true, 0, 10);
        let opts = SliceOptions::default();
        let a = ctx.create_shift(2.0, None, None);
        let b = ctx.create_shift(6.0, Some(a), None);
        // Pretend both have been processed and have values on both sides.
        ctx.shifts[a].nconv = [1, 1];
        ctx.shifts[b].nconv = [1, 1];
        ctx.pending.clear();
        ctx.s_pres = Some(b);
        let v = ctx
            .new_shift_value(0, &RunFeedback::default(), &opts)
            .unwrap();
        assert_eq!(v, 4.0);
    }
}
