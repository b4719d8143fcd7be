//! Per-shift run preparation: acceptance window, expected counts, locked
//! constraint vectors and the rational-Krylov continuation seed.
//!
//! Before each local run the already-accepted eigenvalues falling between the
//! current shift and its neighbors are looked up. Their eigenvectors become
//! deflation constraints (the run must not rediscover them) and their counts
//! are subtracted from the inertia differences with the neighbors, yielding
//! how many eigenvalues the run is still expected to find on each side. A
//! negative expected count means the inertia information and the computed
//! eigenvalues contradict each other, which is fatal.

use crate::context::{ShiftId, SlicingContext};
use crate::engine::{RationalSeed, RunSetup};
use crate::error::{SliceError, SliceErrorKind};
use faer::Mat;

/// Assembles everything the engine needs to run on shift `id`.
pub(crate) fn prepare_run(ctx: &mut SlicingContext, id: ShiftId) -> Result<RunSetup, SliceError> {
    let s = ctx.shift(id).clone();
    let dir = ctx.dir;

    // First accepted value that can lie inside this shift's bracket: all
    // values behind the rear neighbor are outside it.
    let ini = match s.neighb[0] {
        Some(n0) => (dir * (ctx.shift(n0).inertia - ctx.inertia0) as f64).max(0.0) as usize,
        None => 0,
    };
    let fin = ctx.index_eig;

    // Acceptance window: neighbor shifts where they exist, interval ends
    // (possibly infinite) otherwise.
    let ext0 = match s.neighb[0] {
        Some(n0) => ctx.shift(n0).value,
        None => ctx.int0,
    };
    let ext1 = match s.neighb[1] {
        Some(n1) => ctx.shift(n1).value,
        None if ctx.has_end => ctx.int1,
        None => dir * f64::INFINITY,
    };

    // Count already-accepted values on each side of the shift, within the
    // window. The sorted traversal makes the window a contiguous run.
    let (mut count0, mut count1) = (0usize, 0usize);
    for i in ini..fin {
        let val = ctx.sorted_eig(i);
        if dir * (val - ext1) >= 0.0 {
            break;
        }
        if dir * (val - s.value) < 0.0 {
            count0 += 1;
        } else {
            count1 += 1;
        }
    }

    // Expected counts per side from the inertia differences, net of what is
    // already known.
    let nsch0 = match s.neighb[0] {
        Some(n0) => {
            let expected = (dir * (s.inertia - ctx.shift(n0).inertia) as f64) as i64;
            let missing = expected - count0 as i64;
            if missing < 0 {
                return Err(SliceErrorKind::InertiaMismatch {
                    shift: s.value,
                    side: "left",
                }
                .into());
            }
            missing as usize
        }
        None => 0,
    };
    let nsch1 = match s.neighb[1] {
        Some(n1) => {
            let expected = (dir * (ctx.shift(n1).inertia - s.inertia) as f64) as i64;
            let missing = expected - count1 as i64;
            if missing < 0 {
                return Err(SliceErrorKind::InertiaMismatch {
                    shift: s.value,
                    side: "right",
                }
                .into());
            }
            missing as usize
        }
        None => (dir * (ctx.inertia1 - s.inertia) as f64).max(0.0) as usize,
    };

    // Lock the known eigenvectors inside the window as constraints.
    let ndefl = count0 + count1;
    let n = ctx.vectors.nrows();
    let mut defl = Mat::<f64>::zeros(n, ndefl);
    for (c, i) in (ini..ini + ndefl).enumerate() {
        let src = ctx.perm[i];
        defl.col_mut(c).copy_from(ctx.vectors.as_ref().col(src));
    }

    let rational = prepare_rational(ctx, id);

    {
        let sh = &mut ctx.shifts[id];
        sh.ext = [ext0, ext1];
        sh.nsch = [nsch0, nsch1];
    }

    log::debug!(
        "shift {:.6}: window ({ext0:.6}, {ext1:.6}), expecting {nsch0}+{nsch1}, {ndefl} deflated",
        s.value
    );

    Ok(RunSetup {
        shift: s.value,
        ext: [ext0, ext1],
        nsch: [nsch0, nsch1],
        defl,
        rational,
    })
}

/// Builds the continuation seed from the previous run's Ritz carryover when
/// the previous shift is a direct neighbor of the current one. The retained
/// values are filtered to the half of the transformed spectrum that faces the
/// new shift, capped at half the carried set.
fn prepare_rational(ctx: &mut SlicingContext, id: ShiftId) -> Option<RationalSeed> {
    let ns = ctx.carry.len();
    if ns == 0 {
        return None;
    }
    let prev = ctx.s_prev?;
    let s = ctx.shift(id);
    let towards = if s.neighb[0] == Some(prev) {
        1.0
    } else if s.neighb[1] == Some(prev) {
        -1.0
    } else {
        return None;
    };
    let dir_rk = towards * ctx.dir;
    let delta = ctx.shift(prev).value - s.value;

    let mut s_diag = Vec::new();
    let mut s_off = Vec::new();
    let mut cols = Vec::new();
    for i in 0..ns {
        if dir_rk * ctx.carry.s_diag[i] > 0.0 {
            s_diag.push(ctx.carry.s_diag[i]);
            s_off.push(ctx.carry.s_off[i]);
            cols.push(i);
            if s_diag.len() >= ns / 2 {
                break;
            }
        }
    }
    let k = s_diag.len();
    if k == 0 {
        ctx.carry.clear();
        return None;
    }
    let n = ctx.carry.basis.nrows();
    let mut basis = Mat::<f64>::zeros(n, k + 1);
    for (c, &i) in cols.iter().enumerate() {
        basis.col_mut(c).copy_from(ctx.carry.basis.as_ref().col(i));
    }
    basis.col_mut(k).copy_from(ctx.carry.u.as_ref().col(0));
    ctx.carry.clear();
    Some(RationalSeed {
        s_diag,
        s_off,
        basis,
        delta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RationalCarry;

    // Context over [0, 10] with inertia 0 at the start and 10 at the end.
    fn test_ctx() -> SlicingContext {
        SlicingContext::new(4, 1.0, 0.0, 10.0, true, 0, 10)
    }

    #[test]
    fn fresh_shift_expects_the_whole_interval_ahead() {
        let mut ctx = test_ctx();
        let id = ctx.create_shift(0.0, None, None);
        ctx.pending.pop();
        ctx.s_pres = Some(id);
        ctx.shifts[id].inertia = 0;
        let setup = prepare_run(&mut ctx, id).unwrap();
        assert_eq!(setup.nsch, [0, 10]);
        assert_eq!(setup.ext, [0.0, 10.0]);
        assert_eq!(setup.defl.ncols(), 0);
        assert!(setup.rational.is_none());
    }

    #[test]
    fn accepted_values_reduce_the_expected_count() {
        let mut ctx = test_ctx();
        let a = ctx.create_shift(0.0, None, None);
        ctx.shifts[a].inertia = 0;
        let b = ctx.create_shift(5.0, Some(a), None);
        ctx.shifts[b].inertia = 6;
        ctx.pending.clear();
        ctx.s_pres = Some(b);
        // Four values already accepted behind the shift, inside (0, 5).
        for (i, v) in [1.0, 2.0, 3.0, 4.0].into_iter().enumerate() {
            ctx.eigr[i] = v;
        }
        ctx.index_eig = 4;
        ctx.resort(4);
        let setup = prepare_run(&mut ctx, b).unwrap();
        // Inertia says 6 behind; 4 are known, 2 remain. 4 ahead to the end.
        assert_eq!(setup.nsch, [2, 4]);
        assert_eq!(setup.defl.ncols(), 4);
    }

    #[test]
    fn more_values_than_inertia_allows_is_fatal() {
        let mut ctx = test_ctx();
        let a = ctx.create_shift(0.0, None, None);
        ctx.shifts[a].inertia = 0;
        let b = ctx.create_shift(5.0, Some(a), None);
        ctx.shifts[b].inertia = 1;
        ctx.pending.clear();
        ctx.s_pres = Some(b);
        ctx.eigr[0] = 1.0;
        ctx.eigr[1] = 2.0;
        ctx.index_eig = 2;
        ctx.resort(2);
        let err = prepare_run(&mut ctx, b).err().expect("inertia contradiction");
        assert!(err.to_string().contains("Mismatch between"));
    }

    #[test]
    fn continuation_seed_only_for_direct_neighbors() {
        let mut ctx = test_ctx();
        let a = ctx.create_shift(2.0, None, None);
        ctx.shifts[a].inertia = 3;
        let b = ctx.create_shift(6.0, Some(a), None);
        ctx.shifts[b].inertia = 8;
        ctx.pending.clear();
        ctx.s_prev = Some(a);
        ctx.s_pres = Some(b);
        ctx.carry = RationalCarry {
            s_diag: vec![0.8, -0.5, 0.3, -0.2],
            s_off: vec![0.1, 0.2, 0.3, 0.4],
            basis: Mat::zeros(4, 4),
            u: Mat::zeros(4, 1),
        };
        let setup = prepare_run(&mut ctx, b).unwrap();
        let seed = setup.rational.expect("neighbor continuation");
        // Moving ahead (prev is the rear neighbor): keep positive values,
        // capped at half the carried set.
        assert_eq!(seed.s_diag, vec![0.8, 0.3]);
        assert_eq!(seed.delta, -4.0);
        assert_eq!(seed.basis.ncols(), 3);
        // The carryover is consumed.
        assert_eq!(ctx.carry.len(), 0);
    }
}
