//! End-to-end tests for the spectrum-slicing solver.
//!
//! All tests run against the dense `ShiftInvert` reference operator over
//! problems with known spectra, so every assertion has an exact expected
//! answer: the set of eigenvalues inside the interval, their order, and the
//! eigenvector residuals.

use anyhow::Result;
use faer::Mat;
use spectrum_slicing::{
    ConvergedReason, InertiaOracle, ShiftInvert, ShiftedOperator, SliceError, SliceOptions,
    SpectrumSlicer,
};

/// Asserts that `computed` matches `expected` elementwise to `tol`.
fn assert_values(computed: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(
        computed.len(),
        expected.len(),
        "expected {:?}, computed {:?}",
        expected,
        computed
    );
    for (c, e) in computed.iter().zip(expected) {
        assert!(
            (c - e).abs() < tol,
            "eigenvalue {c} does not match expected {e}"
        );
    }
}

#[test]
fn closed_interval_finds_exactly_the_bracketed_values() -> Result<()> {
    let eigs: Vec<f64> = (1..=20).map(f64::from).collect();
    let op = ShiftInvert::from_spectrum(&eigs)?;
    let slicer = SpectrumSlicer::new(op, 5.5, 15.5, SliceOptions::default())?;
    let result = slicer.solve()?;

    assert_eq!(result.reason, ConvergedReason::ConvergedTol);
    let expected: Vec<f64> = (6..=15).map(f64::from).collect();
    assert_values(&result.eigenvalues, &expected, 1e-8);

    // Eigenvector residuals against the original matrix.
    let a = Mat::from_fn(20, 20, |i, j| if i == j { eigs[i] } else { 0.0 });
    for k in 0..result.nconv {
        let v = result.eigenvectors.as_ref().get(.., k..k + 1);
        let r = &a * v - v * faer::Scale(result.eigenvalues[k]);
        assert!(
            r.norm_l2() < 1e-7,
            "residual {} for eigenvalue {}",
            r.norm_l2(),
            result.eigenvalues[k]
        );
    }
    Ok(())
}

#[test]
fn wide_interval_needs_multiple_shifts() -> Result<()> {
    let eigs: Vec<f64> = (1..=100).map(f64::from).collect();
    let op = ShiftInvert::from_spectrum(&eigs)?;
    let slicer = SpectrumSlicer::new(op, 10.5, 40.5, SliceOptions::default())?;
    let result = slicer.solve()?;

    assert_eq!(result.reason, ConvergedReason::ConvergedTol);
    assert_eq!(result.nconv, 30);
    // Sorted ascending, no duplicates, all inside the interval.
    for w in result.eigenvalues.windows(2) {
        assert!(w[0] < w[1], "not strictly ascending: {} >= {}", w[0], w[1]);
    }
    let expected: Vec<f64> = (11..=40).map(f64::from).collect();
    assert_values(&result.eigenvalues, &expected, 1e-7);
    Ok(())
}

#[test]
fn generalized_problem_back_transforms_through_b() -> Result<()> {
    // A = diag(1..20), B = 2 I: eigenvalues are i / 2.
    let n = 20;
    let a = Mat::from_fn(n, n, |i, j| if i == j { (i + 1) as f64 } else { 0.0 });
    let b = Mat::from_fn(n, n, |i, j| if i == j { 2.0 } else { 0.0 });
    let op = ShiftInvert::generalized(a, b)?;
    let slicer = SpectrumSlicer::new(op, 1.25, 5.25, SliceOptions::default())?;
    let result = slicer.solve()?;

    let expected: Vec<f64> = (3..=10).map(|i| i as f64 / 2.0).collect();
    assert_values(&result.eigenvalues, &expected, 1e-8);
    Ok(())
}

#[test]
fn open_interval_descends_from_the_upper_end() -> Result<()> {
    let eigs: Vec<f64> = (1..=20).map(f64::from).collect();
    let op = ShiftInvert::from_spectrum(&eigs)?;
    let slicer = SpectrumSlicer::new(op, f64::NEG_INFINITY, 5.5, SliceOptions::default())?;
    let result = slicer.solve()?;

    // Traversal order is descending for a lower-open interval.
    let expected = [5.0, 4.0, 3.0, 2.0, 1.0];
    assert_values(&result.eigenvalues, &expected, 1e-8);
    Ok(())
}

#[test]
fn multiple_eigenvalues_force_start_vector_regeneration() -> Result<()> {
    // Four distinct eigenvalues with multiplicity 5: any single start vector
    // spans a Krylov space of dimension at most 4, so the Lanczos recurrence
    // breaks down long before the basis fills. The run must regenerate start
    // vectors to find the remaining copies, one invariant subspace at a
    // time, until the inertia count is satisfied.
    let mut eigs = Vec::new();
    for v in [1.0, 2.0, 3.0, 10.0] {
        eigs.extend(std::iter::repeat(v).take(5));
    }
    let op = ShiftInvert::from_spectrum(&eigs)?;
    let slicer = SpectrumSlicer::new(op, 0.5, 3.5, SliceOptions::default())?;
    let result = slicer.solve()?;

    assert_eq!(result.reason, ConvergedReason::ConvergedTol);
    let expected: Vec<f64> = [1.0, 2.0, 3.0]
        .into_iter()
        .flat_map(|v| std::iter::repeat(v).take(5))
        .collect();
    assert_values(&result.eigenvalues, &expected, 1e-7);
    Ok(())
}

#[test]
fn empty_interval_returns_no_values() -> Result<()> {
    let eigs: Vec<f64> = (1..=20).map(f64::from).collect();
    let op = ShiftInvert::from_spectrum(&eigs)?;
    let slicer = SpectrumSlicer::new(op, 21.5, 30.0, SliceOptions::default())?;
    let result = slicer.solve()?;

    assert_eq!(result.nconv, 0);
    assert_eq!(result.reason, ConvergedReason::ConvergedTol);
    assert!(result.eigenvalues.is_empty());
    Ok(())
}

#[test]
fn repeated_solves_are_bit_identical() -> Result<()> {
    let eigs: Vec<f64> = (1..=20).map(f64::from).collect();
    let op = ShiftInvert::from_spectrum(&eigs)?;
    let slicer = SpectrumSlicer::new(op, 5.5, 15.5, SliceOptions::default())?;
    let first = slicer.solve()?;
    let second = slicer.solve()?;

    assert_eq!(first.nconv, second.nconv);
    for (x, y) in first.eigenvalues.iter().zip(&second.eigenvalues) {
        assert_eq!(x.to_bits(), y.to_bits());
    }
    Ok(())
}

#[test]
fn partitioned_solve_matches_single_partition() -> Result<()> {
    // Eigenvalues i + 0.5 so the partition boundary at 10 is not an
    // eigenvalue. The lower end 0.0 counts as unset, so both solves run
    // descending.
    let eigs: Vec<f64> = (0..20).map(|i| i as f64 + 0.5).collect();
    let single = {
        let op = ShiftInvert::from_spectrum(&eigs)?;
        SpectrumSlicer::new(op, 0.0, 20.0, SliceOptions::default())?.solve()?
    };
    let split = {
        let op = ShiftInvert::from_spectrum(&eigs)?;
        let opts = SliceOptions {
            npart: 2,
            ..Default::default()
        };
        SpectrumSlicer::new(op, 0.0, 20.0, opts)?.solve()?
    };

    assert_eq!(single.nconv, 20);
    assert_eq!(split.nconv, 20);
    for (x, y) in single.eigenvalues.iter().zip(&split.eigenvalues) {
        assert!((x - y).abs() < 1e-8, "partition mismatch: {x} vs {y}");
    }
    Ok(())
}

/// Wraps the reference operator but reports a biased inertia above a cutoff,
/// simulating a broken factorization.
#[derive(Clone)]
struct BiasedOracle {
    inner: ShiftInvert,
    cutoff: f64,
    bias: i64,
}

impl ShiftedOperator for BiasedOracle {
    fn dim(&self) -> usize {
        self.inner.dim()
    }
    fn shift(&self) -> f64 {
        self.inner.shift()
    }
    fn set_shift(&mut self, sigma: f64) -> Result<(), SliceError> {
        self.inner.set_shift(sigma)
    }
    fn apply(&self, x: faer::MatRef<'_, f64>) -> Mat<f64> {
        self.inner.apply(x)
    }
}

impl InertiaOracle for BiasedOracle {
    fn inertia_at(&mut self, sigma: f64) -> Result<i64, SliceError> {
        let truth = self.inner.inertia_at(sigma)?;
        Ok(if sigma >= self.cutoff {
            truth + self.bias
        } else {
            truth
        })
    }
}

#[test]
fn inconsistent_inertia_aborts_the_solve() -> Result<()> {
    // The oracle undercounts above 15, so the interval claims 8 eigenvalues
    // where the iteration finds 10. The contradiction must be fatal rather
    // than silently dropping values.
    let eigs: Vec<f64> = (1..=20).map(f64::from).collect();
    let op = BiasedOracle {
        inner: ShiftInvert::from_spectrum(&eigs)?,
        cutoff: 15.0,
        bias: -2,
    };
    let err = SpectrumSlicer::new(op, 5.5, 15.5, SliceOptions::default())?
        .solve()
        .expect_err("biased inertia must abort");
    assert!(
        err.to_string().contains("Mismatch between"),
        "unexpected error: {err}"
    );
    Ok(())
}

#[test]
fn invalid_setups_are_rejected() -> Result<()> {
    let eigs: Vec<f64> = (1..=20).map(f64::from).collect();

    // Empty interval bounds.
    let op = ShiftInvert::from_spectrum(&eigs)?;
    assert!(SpectrumSlicer::new(op, 5.0, 2.0, SliceOptions::default()).is_err());

    // Fully open interval.
    let op = ShiftInvert::from_spectrum(&eigs)?;
    assert!(SpectrumSlicer::new(
        op,
        f64::NEG_INFINITY,
        f64::INFINITY,
        SliceOptions::default()
    )
    .is_err());

    // Subspace target below the slicing minimum.
    let op = ShiftInvert::from_spectrum(&eigs)?;
    let small = SliceOptions {
        nev: 5,
        ..Default::default()
    };
    let err = SpectrumSlicer::new(op, 5.5, 15.5, small)
        .err()
        .expect("nev too small");
    assert!(err.to_string().contains("nev cannot be less than"));

    // Partitioning an unbounded interval.
    let op = ShiftInvert::from_spectrum(&eigs)?;
    let parts = SliceOptions {
        npart: 2,
        ..Default::default()
    };
    let err = SpectrumSlicer::new(op, 5.5, f64::INFINITY, parts)
        .err()
        .expect("unbounded partitions");
    assert!(err.to_string().contains("must be bounded"));
    Ok(())
}
