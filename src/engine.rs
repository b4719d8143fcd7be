//! Local Krylov-Schur engine: a restarted Lanczos iteration around a fixed
//! shift, adapted to spectrum slicing.
//!
//! The engine searches for a specific number of eigenvalues on each side of
//! the current shift (`nsch[0]`/`nsch[1]`, derived from inertia differences
//! with the neighboring shifts) rather than simply the `nev` closest ones.
//! Each restart cycle extends the basis by Lanczos steps, solves the small
//! projected symmetric eigenproblem, packs converged Ritz pairs to the front
//! and decides between continuing, entering a bounded completion phase for
//! clustered values near the shift, or stopping.
//!
//! When the new shift is a direct neighbor of the previous one, the engine
//! does not restart from scratch: the retained Ritz coefficients from the
//! prior run are translated to the new shift (rational-Krylov continuation)
//! and the carried basis columns are rotated accordingly, so work done near
//! the boundary between the two shifts is reused.

use crate::context::RationalCarry;
use crate::error::{SliceError, SliceErrorKind};
use crate::operator::ShiftedOperator;
use crate::options::SliceOptions;
use crate::solver::ConvergedReason;
use faer::linalg::matmul::matmul;
use faer::prelude::*;
use faer::{Accum, Mat, MatRef, Par, Side};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A Lanczos recurrence coefficient below this threshold means the Krylov
/// subspace is (numerically) invariant.
const BREAKDOWN_TOL: f64 = 1e-14;

/// Ritz information carried into a run that continues from an adjacent
/// shift.
pub(crate) struct RationalSeed {
    /// Retained Ritz values, sign-filtered towards the traversal direction.
    pub s_diag: Vec<f64>,
    /// Matching residual coupling coefficients.
    pub s_off: Vec<f64>,
    /// Retained basis columns plus the previous residual direction appended
    /// as the last column (`n x (k + 1)`).
    pub basis: Mat<f64>,
    /// Shift change `sigma_prev - sigma_pres`; the seed's coefficients are
    /// expressed at the previous shift.
    pub delta: f64,
}

/// Everything the deflation manager prepares for one local run.
pub(crate) struct RunSetup {
    /// Value of the shift the run is centered on.
    pub shift: f64,
    /// Acceptance window around the shift.
    pub ext: [f64; 2],
    /// Expected eigenvalue count per side.
    pub nsch: [usize; 2],
    /// Locked constraint vectors (previously accepted eigenvectors inside
    /// the bracket).
    pub defl: Mat<f64>,
    /// Continuation seed when the previous shift is a direct neighbor.
    pub rational: Option<RationalSeed>,
}

/// Result of one local run, consumed by the aggregator and the scheduler.
pub(crate) struct RunOutcome {
    pub reason: ConvergedReason,
    /// Converged Ritz pairs, packed in `eigr[..nconv]` / basis columns.
    pub nconv: usize,
    /// Converged values inside the window, behind / ahead of the shift.
    pub count0: usize,
    pub count1: usize,
    /// Converged values per side by sign of theta (irrespective of window).
    pub nconv_side: [usize; 2],
    /// Whether each side reached its expected count.
    pub comp: [bool; 2],
    /// Restart iterations spent.
    pub its: usize,
    /// Ritz carryover for a possible continuation at the next shift.
    pub carry: RationalCarry,
}

/// Restarted Krylov-Schur iteration state for one sub-interval run.
pub(crate) struct KrylovEngine {
    n: usize,
    nev: usize,
    ncv: usize,
    mpd: usize,
    tol: f64,
    max_it: usize,
    keep: f64,
    margin: usize,
    n_max_compl: usize,
    iter_compl: usize,
    dir: f64,
    shift: f64,
    ext: [f64; 2],
    nsch: [usize; 2],
    /// Krylov basis, `n x (ncv + 1)`; converged columns packed left.
    pub v: Mat<f64>,
    /// Constraint vectors the basis is kept orthogonal to.
    defl: Mat<f64>,
    /// Ritz values of the transformed operator.
    pub eigr: Vec<f64>,
    /// Residual-based error estimates, aligned with `eigr`.
    pub errest: Vec<f64>,
    /// Compact projected problem: diagonal and off-diagonal coefficients.
    a: Vec<f64>,
    b: Vec<f64>,
    nconv: usize,
    l: usize,
    /// Dense translated block replacing the compact form in the first
    /// restart cycle after a rational continuation.
    dense_block: Option<Mat<f64>>,
    rng: StdRng,
}

impl KrylovEngine {
    pub(crate) fn new(
        n: usize,
        ncv: usize,
        mpd: usize,
        dir: f64,
        opts: &SliceOptions,
        setup: RunSetup,
    ) -> Self {
        let mut engine = Self {
            n,
            nev: opts.nev,
            ncv,
            mpd,
            tol: opts.tol,
            max_it: opts.max_it,
            keep: opts.keep,
            margin: opts.early_exit_margin,
            n_max_compl: opts.n_max_compl(),
            iter_compl: opts.iter_compl(),
            dir,
            shift: setup.shift,
            ext: setup.ext,
            nsch: setup.nsch,
            v: Mat::zeros(n, ncv + 1),
            defl: setup.defl,
            eigr: vec![0.0; ncv + 1],
            errest: vec![0.0; ncv + 1],
            a: vec![0.0; ncv + 1],
            b: vec![0.0; ncv + 1],
            nconv: 0,
            l: 0,
            dense_block: None,
            rng: StdRng::seed_from_u64(opts.seed),
        };
        match setup.rational {
            Some(seed) => engine.translate_continuation(&seed),
            None => {
                if !engine.new_start_vector(0) {
                    // A zero start vector here means the constraints already
                    // span the whole space; the run will converge trivially.
                    log::warn!("start vector fully deflated by constraints");
                }
            }
        }
        engine
    }

    /// Runs the restarted iteration on the current shift until the
    /// sub-interval's expected counts are reached or a budget is exhausted.
    pub(crate) fn run(&mut self, op: &impl ShiftedOperator) -> Result<RunOutcome, SliceError> {
        let mut reason: Option<ConvergedReason> = None;
        let mut compl_iterating = false;
        let mut sch = [true, true];
        let mut iter_compl_left: i64 = 0;
        let (mut count0, mut count1) = (0usize, 0usize);
        let mut its = 0usize;
        let mut last_q = Mat::<f64>::zeros(0, 0);
        let mut last_beta = 0.0;
        let mut last_nv = self.nconv + self.l;
        let mut breakdown = false;

        while reason.is_none() {
            its += 1;
            // Extend the factorization up to the working subspace size.
            let from = self.nconv + self.l;
            let nv_req = (self.nconv + self.mpd).min(self.ncv).max(from + 1);
            let (nv, beta, bd) = self.extend_lanczos(op, from, nv_req.min(self.ncv));
            breakdown = bd;
            last_beta = beta;
            last_nv = nv;

            // Solve the projected problem; Ritz values closest to the shift
            // (largest magnitude in transformed coordinates) come first.
            let q = self.solve_projected(nv)?;
            for i in self.nconv..nv {
                let theta = self.eigr[i];
                self.errest[i] = (beta * q[(nv - 1, i)]).abs() / theta.abs().max(f64::EPSILON);
            }

            // Pack converged Ritz pairs to the front of the active block.
            let q = self.reorder_converged(nv, q);
            let conv = (self.nconv..nv)
                .take_while(|&i| self.errest[i] < self.tol)
                .count();
            let k = self.nconv + conv;

            // Count converged values per side, restricted to the window.
            count0 = 0;
            count1 = 0;
            for i in 0..k {
                let lambda = op.back_transform(self.eigr[i]);
                if self.dir * (self.shift - lambda) > 0.0 && self.dir * (lambda - self.ext[0]) > 0.0
                {
                    count0 += 1;
                }
                if self.dir * (lambda - self.shift) > 0.0 && self.dir * (self.ext[1] - lambda) > 0.0
                {
                    count1 += 1;
                }
            }

            // Completion test.
            if k > self.nev && self.ncv - k < self.margin {
                reason = Some(ConvergedReason::ConvergedTol);
            } else if (!sch[0] || count0 >= self.nsch[0]) && (!sch[1] || count1 >= self.nsch[1]) {
                reason = Some(ConvergedReason::ConvergedTol);
            } else {
                if !compl_iterating && its >= self.max_it {
                    reason = Some(ConvergedReason::DivergedIts);
                }
                if compl_iterating {
                    iter_compl_left -= 1;
                    if iter_compl_left <= 0 {
                        reason = Some(ConvergedReason::DivergedIts);
                    }
                } else if k >= self.nev && reason.is_none() {
                    // The requested count is reached but the bracket is not
                    // complete: a few clustered values near the shift may
                    // still separate with extra iterations.
                    let n0 = self.nsch[0] as i64 - count0 as i64;
                    let n1 = self.nsch[1] as i64 - count1 as i64;
                    let m = self.n_max_compl as i64;
                    if self.iter_compl > 0 && ((n0 > 0 && n0 <= m) || (n1 > 0 && n1 <= m)) {
                        compl_iterating = true;
                        if n0 > m {
                            sch[0] = false;
                        }
                        if n1 > m {
                            sch[1] = false;
                        }
                        iter_compl_left = self.iter_compl as i64;
                    } else {
                        reason = Some(ConvergedReason::ConvergedTol);
                    }
                }
            }

            // Size of the retained subspace.
            self.l = if reason.is_none() {
                (((nv - k) as f64 * self.keep) as usize).max(1)
            } else {
                nv - k
            };
            if breakdown {
                self.l = 0;
            }
            if reason.is_none() && k + self.l >= self.ncv {
                // Do not let the retained part fill the basis completely.
                self.l = self.ncv.saturating_sub(k + 1);
            }

            if reason.is_none() && !breakdown {
                // Rayleigh-quotient restart: retained Ritz values on the
                // diagonal, residual couplings on the off-diagonal.
                for i in k..k + self.l {
                    self.a[i] = self.eigr[i];
                    self.b[i] = beta * q[(nv - 1, i)];
                }
            }

            // Update the basis: V(:, nconv..k+l) = V(:, nconv..nv) * Q.
            self.rotate_basis(self.nconv, nv, k + self.l, &q);
            if reason.is_none() {
                if breakdown {
                    // Restart with a fresh direction orthogonal to
                    // everything converged and deflated so far.
                    log::debug!("breakdown in Krylov-Schur method (it={its} norm={beta:e})");
                    if !self.new_start_vector(k) {
                        log::debug!("unable to generate more start vectors");
                        reason = Some(ConvergedReason::DivergedBreakdown);
                    }
                } else {
                    // Append the residual direction to the retained basis.
                    let u = self.v.as_ref().get(.., nv..nv + 1).to_owned();
                    self.v.col_mut(k + self.l).copy_from(u.as_ref().col(0));
                }
            }
            self.nconv = k;
            self.dense_block = None;
            last_q = q;
        }

        // Per-side tally by the sign of theta and the fatal consistency
        // check tying the numerical results back to the inertia counts.
        let mut nconv_side = [0usize; 2];
        for i in 0..self.nconv {
            if self.dir * self.eigr[i] > 0.0 {
                nconv_side[1] += 1;
            } else {
                nconv_side[0] += 1;
            }
        }
        if count0 > self.nsch[0] {
            return Err(SliceErrorKind::InertiaMismatch {
                shift: self.shift,
                side: "left",
            }
            .into());
        }
        if count1 > self.nsch[1] {
            return Err(SliceErrorKind::InertiaMismatch {
                shift: self.shift,
                side: "right",
            }
            .into());
        }

        let carry = self.harvest_carry(last_nv, last_beta, &last_q, breakdown);
        let reason = reason.unwrap_or(ConvergedReason::ConvergedTol);
        Ok(RunOutcome {
            reason,
            nconv: self.nconv,
            count0,
            count1,
            nconv_side,
            comp: [count0 >= self.nsch[0], count1 >= self.nsch[1]],
            its,
            carry,
        })
    }

    /// Retains the approximate Ritz information for a possible continuation
    /// at the next shift.
    fn harvest_carry(&self, nv: usize, beta: f64, q: &Mat<f64>, breakdown: bool) -> RationalCarry {
        let k = self.nconv;
        let l = if breakdown { 0 } else { self.l.min(nv.saturating_sub(k)) };
        if l == 0 || q.nrows() == 0 {
            return RationalCarry::default();
        }
        let mut s_diag = Vec::with_capacity(l);
        let mut s_off = Vec::with_capacity(l);
        for i in 0..l {
            s_diag.push(self.eigr[k + i]);
            s_off.push(beta * q[(nv - 1, k + i)]);
        }
        let basis = self.v.as_ref().get(.., k..k + l).to_owned();
        let u = self.v.as_ref().get(.., nv..nv + 1).to_owned();
        RationalCarry {
            s_diag,
            s_off,
            basis,
            u,
        }
    }

    /// Extends the Lanczos factorization from column `from` up to `upto`
    /// basis vectors, with full reorthogonalization against the constraint
    /// vectors and the current basis. Returns the reached size, the last
    /// recurrence coefficient and whether breakdown occurred.
    fn extend_lanczos(
        &mut self,
        op: &impl ShiftedOperator,
        from: usize,
        upto: usize,
    ) -> (usize, f64, bool) {
        for j in from..upto {
            let x = self.v.as_ref().get(.., j..j + 1);
            let mut w = op.apply(x);
            let mut alpha = 0.0;
            // Classical Gram-Schmidt with one reorthogonalization pass.
            for _ in 0..2 {
                for c in 0..self.defl.ncols() {
                    let h = col_dot(self.defl.as_ref(), c, w.as_ref());
                    axpy(&mut w, -h, self.defl.as_ref(), c);
                }
                for i in 0..=j {
                    let h = col_dot(self.v.as_ref(), i, w.as_ref());
                    if i == j {
                        alpha += h;
                    }
                    axpy(&mut w, -h, self.v.as_ref(), i);
                }
            }
            self.a[j] = alpha;
            let beta = w.norm_l2();
            self.b[j] = beta;
            if beta <= BREAKDOWN_TOL {
                return (j + 1, beta, true);
            }
            for r in 0..self.n {
                self.v[(r, j + 1)] = w[(r, 0)] / beta;
            }
        }
        (upto, self.b[upto - 1], false)
    }

    /// Assembles and solves the projected problem over the active block,
    /// writing Ritz values into `eigr` (largest magnitude first) and
    /// returning the rotation matrix embedded into an identity of order
    /// `nv`.
    fn solve_projected(&mut self, nv: usize) -> Result<Mat<f64>, SliceError> {
        let off = self.nconv;
        let m = nv - off;
        let kk = self.nconv + self.l;
        let mut t = Mat::<f64>::zeros(m, m);
        if let Some(d) = self.dense_block.take() {
            // First cycle after a rational continuation: the translated
            // block is dense, with the Lanczos extension attached below it.
            let s = d.nrows();
            for i in 0..s {
                for j in 0..s {
                    t[(i, j)] = d[(i, j)];
                }
            }
            t[(s - 1, s - 1)] = self.a[kk];
            for j in kk + 1..nv {
                t[(j, j)] = self.a[j];
                t[(j, j - 1)] = self.b[j - 1];
                t[(j - 1, j)] = self.b[j - 1];
            }
        } else {
            // Compact form: retained Ritz values couple to the first new
            // Lanczos vector (arrowhead), tridiagonal beyond it.
            for i in self.nconv..kk {
                t[(i - off, i - off)] = self.a[i];
                t[(i - off, kk - off)] = self.b[i];
                t[(kk - off, i - off)] = self.b[i];
            }
            for j in kk..nv {
                t[(j - off, j - off)] = self.a[j];
                if j > kk {
                    t[(j - off, j - 1 - off)] = self.b[j - 1];
                    t[(j - 1 - off, j - off)] = self.b[j - 1];
                }
            }
        }
        let evd = t
            .as_ref()
            .self_adjoint_eigen(Side::Lower)
            .map_err(|e| SliceError::from(SliceErrorKind::EvdError(e)))?;
        let theta = evd.S();
        let u = evd.U();
        // Order by distance to the shift: in transformed coordinates this
        // is descending magnitude.
        let mut order: Vec<usize> = (0..m).collect();
        order.sort_by(|&x, &y| {
            theta[y]
                .abs()
                .partial_cmp(&theta[x].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut q = Mat::<f64>::identity(nv, nv);
        for (c_new, &c_old) in order.iter().enumerate() {
            self.eigr[off + c_new] = theta[c_old];
            for r in 0..m {
                q[(off + r, off + c_new)] = u[(r, c_old)];
            }
        }
        Ok(q)
    }

    /// Reorders the active block so converged Ritz pairs come first,
    /// permuting `eigr`, `errest` and the rotation columns consistently.
    fn reorder_converged(&mut self, nv: usize, q: Mat<f64>) -> Mat<f64> {
        let off = self.nconv;
        let mut order: Vec<usize> = (off..nv).filter(|&i| self.errest[i] < self.tol).collect();
        order.extend((off..nv).filter(|&i| self.errest[i] >= self.tol));
        let eigr_old: Vec<f64> = self.eigr[off..nv].to_vec();
        let err_old: Vec<f64> = self.errest[off..nv].to_vec();
        let mut q_new = q.clone();
        for (pos, &src) in order.iter().enumerate() {
            self.eigr[off + pos] = eigr_old[src - off];
            self.errest[off + pos] = err_old[src - off];
            for r in 0..nv {
                q_new[(r, off + pos)] = q[(r, src)];
            }
        }
        q_new
    }

    /// In-place rotation `V(:, lo..hi_dst) = V(:, lo..hi_src) * Q`.
    fn rotate_basis(&mut self, lo: usize, hi_src: usize, hi_dst: usize, q: &Mat<f64>) {
        if hi_dst <= lo {
            return;
        }
        let src = self.v.as_ref().get(.., lo..hi_src).to_owned();
        let block = q.as_ref().get(lo..hi_src, lo..hi_dst).to_owned();
        let mut dst = Mat::<f64>::zeros(self.n, hi_dst - lo);
        matmul(
            dst.as_mut(),
            Accum::Replace,
            src.as_ref(),
            block.as_ref(),
            1.0,
            Par::Seq,
        );
        for j in 0..hi_dst - lo {
            self.v.col_mut(lo + j).copy_from(dst.as_ref().col(j));
        }
    }

    /// Generates a random start vector at column `k`, orthogonal to the
    /// constraints and to the locked basis columns. Returns `false` when the
    /// orthogonalized vector is negligible (regeneration breakdown).
    fn new_start_vector(&mut self, k: usize) -> bool {
        let mut w = Mat::from_fn(self.n, 1, |_, _| self.rng.random::<f64>() - 0.5);
        for _ in 0..2 {
            for c in 0..self.defl.ncols() {
                let h = col_dot(self.defl.as_ref(), c, w.as_ref());
                axpy(&mut w, -h, self.defl.as_ref(), c);
            }
            for i in 0..k {
                let h = col_dot(self.v.as_ref(), i, w.as_ref());
                axpy(&mut w, -h, self.v.as_ref(), i);
            }
        }
        let nrm = w.norm_l2();
        if nrm <= BREAKDOWN_TOL.sqrt() {
            return false;
        }
        for r in 0..self.n {
            self.v[(r, k)] = w[(r, 0)] / nrm;
        }
        true
    }

    /// Translates the retained Krylov-Schur decomposition from the previous
    /// shift to the current one.
    ///
    /// With `Op0 V = [V u] H`, `H = [diag(s); c^T]` and
    /// `Op1 = Op0 (I + delta Op0)^-1` for the shift change `delta`, the QR
    /// factorization `E + delta H = Q R` yields the translated decomposition
    /// `Op1 (W Q)_k = W Q (Q^T H R^-1)` over the rotated basis `W Q`,
    /// `W = [V u]`.
    fn translate_continuation(&mut self, seed: &RationalSeed) {
        let k = seed.s_diag.len();
        let delta = seed.delta;
        let mut h = Mat::<f64>::zeros(k + 1, k);
        for i in 0..k {
            h[(i, i)] = seed.s_diag[i];
            h[(k, i)] = seed.s_off[i];
        }
        let m = Mat::from_fn(k + 1, k, |i, j| {
            ((i == j) as usize as f64) + delta * h[(i, j)]
        });
        let qr = m.qr();
        let q = qr.compute_Q();
        let r = qr.thin_R().to_owned();
        let ht = q.transpose() * &h;
        // X = (Q^T H) R^-1 via the transposed triangular system.
        let xt = r
            .transpose()
            .partial_piv_lu()
            .solve(&ht.transpose().to_owned());
        let x = xt.transpose().to_owned();
        let mut d = Mat::<f64>::zeros(k + 1, k + 1);
        for i in 0..k {
            for j in 0..k {
                d[(i, j)] = 0.5 * (x[(i, j)] + x[(j, i)]);
            }
        }
        for i in 0..k {
            d[(i, k)] = x[(k, i)];
            d[(k, i)] = x[(k, i)];
        }
        // Rotate the carried basis into the translated coordinates.
        let mut rotated = Mat::<f64>::zeros(self.n, k + 1);
        matmul(
            rotated.as_mut(),
            Accum::Replace,
            seed.basis.as_ref(),
            q.as_ref(),
            1.0,
            Par::Seq,
        );
        for j in 0..k + 1 {
            self.v.col_mut(j).copy_from(rotated.as_ref().col(j));
        }
        self.dense_block = Some(d);
        self.l = k;
        self.nconv = 0;
    }
}

fn col_dot(m: MatRef<'_, f64>, col: usize, w: MatRef<'_, f64>) -> f64 {
    let mut s = 0.0;
    for r in 0..m.nrows() {
        s += m[(r, col)] * w[(r, 0)];
    }
    s
}

fn axpy(w: &mut Mat<f64>, alpha: f64, m: MatRef<'_, f64>, col: usize) {
    for r in 0..w.nrows() {
        w[(r, 0)] += alpha * m[(r, col)];
    }
}
