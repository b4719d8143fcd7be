//! Acceptance and global assembly of computed eigenpairs.
//!
//! A local run converges Ritz pairs of the transformed operator; this module
//! back-transforms them, filters them through the owning shift's acceptance
//! window (so a value between two shifts is stored exactly once, by exactly
//! one of them), purifies the eigenvectors and appends everything to the
//! context's global storage in traversal order. It also merges the results
//! of independently solved sub-interval partitions into one sorted solution.

use crate::context::{ShiftId, SlicingContext};
use crate::engine::KrylovEngine;
use crate::error::{SliceError, SliceErrorKind};
use crate::operator::ShiftedOperator;
use crate::scheduler::RunFeedback;
use crate::solver::{ConvergedReason, SliceResult};
use faer::Mat;

/// Stores the converged eigenpairs of the run at shift `id`, accepting only
/// values strictly inside the shift's window. Returns the full converged
/// value set (accepted or not) as scheduler feedback.
pub(crate) fn store_eigenpairs(
    ctx: &mut SlicingContext,
    op: &impl ShiftedOperator,
    engine: &KrylovEngine,
    id: ShiftId,
    nconv: usize,
) -> Result<RunFeedback, SliceError> {
    let dir = ctx.dir;
    let [ext0, ext1] = ctx.shift(id).ext;
    ctx.shifts[id].index = ctx.index_eig;

    let mut pairs: Vec<(f64, usize)> = (0..nconv)
        .map(|i| (op.back_transform(engine.eigr[i]), i))
        .collect();
    pairs.sort_by(|x, y| {
        (dir * x.0)
            .partial_cmp(&(dir * y.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut count = 0usize;
    for &(lambda, i) in &pairs {
        let inside = dir * (lambda - ext0) > 0.0 && dir * (ext1 - lambda) > 0.0;
        if !inside {
            continue;
        }
        if ctx.index_eig >= ctx.num_eigs {
            return Err(SliceErrorKind::StorageOverflow {
                expected: ctx.num_eigs,
            }
            .into());
        }
        // Purification: one extra application of the transform knocks out
        // components outside the operator's range, then renormalize.
        let x = engine.v.as_ref().get(.., i..i + 1);
        let y = op.apply(x);
        let nrm = y.norm_l2();
        let col = ctx.index_eig;
        for r in 0..y.nrows() {
            ctx.vectors[(r, col)] = y[(r, 0)] / nrm;
        }
        ctx.eigr[col] = lambda;
        ctx.errest[col] = engine.errest[i];
        ctx.index_eig += 1;
        count += 1;
    }
    ctx.shifts[id].neigs = count;
    ctx.resort(ctx.index_eig);
    log::debug!(
        "shift {:.6}: accepted {count} of {nconv} converged values",
        ctx.shift(id).value
    );
    Ok(RunFeedback {
        lambdas: pairs.into_iter().map(|(l, _)| l).collect(),
    })
}

/// Merges independently computed partition results into a single solution
/// sorted in traversal order. Each partition is internally sorted and the
/// partition windows are disjoint, so concatenation in traversal order is a
/// global sort.
pub(crate) fn merge_partitions(mut parts: Vec<SliceResult>, dir: f64) -> SliceResult {
    if dir < 0.0 {
        parts.reverse();
    }
    let n = parts.iter().map(|p| p.eigenvectors.nrows()).max().unwrap_or(0);
    let total: usize = parts.iter().map(|p| p.nconv).sum();
    let mut eigenvalues = Vec::with_capacity(total);
    let mut errors = Vec::with_capacity(total);
    let mut eigenvectors = Mat::<f64>::zeros(n, total);
    let mut reason = ConvergedReason::ConvergedTol;
    let mut iterations = 0;
    let mut col = 0;
    for part in parts {
        if !matches!(part.reason, ConvergedReason::ConvergedTol)
            && matches!(reason, ConvergedReason::ConvergedTol)
        {
            reason = part.reason;
        }
        iterations += part.iterations;
        for j in 0..part.nconv {
            eigenvectors
                .col_mut(col)
                .copy_from(part.eigenvectors.as_ref().col(j));
            col += 1;
        }
        eigenvalues.extend_from_slice(&part.eigenvalues);
        errors.extend_from_slice(&part.errors);
    }
    SliceResult {
        nconv: total,
        eigenvalues,
        eigenvectors,
        errors,
        reason,
        iterations,
    }
}
