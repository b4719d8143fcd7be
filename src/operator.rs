//! Collaborator boundary of the slicing core: the spectral transform and the
//! inertia oracle.
//!
//! The slicing algorithm never touches matrix storage directly. Its
//! fundamental operations are (a) applying the shifted-and-inverted operator
//! `(A - sigma B)^-1 B` to a vector and (b) counting the eigenvalues of the
//! pencil below a shift from a factorization of `A - sigma B`. Both are
//! formalized as traits so that the same solver runs against dense reference
//! operators in tests and against sparse direct factorizations in production.
//!
//! The separation mirrors the classic design of shift-and-invert eigensolver
//! libraries: the transform is a black box that owns the factorization, and
//! the inertia read-off is a by-product of that factorization. The dense
//! [`ShiftInvert`] implementation provided here exists for testing and small
//! problems; it recomputes an LU factorization per shift and obtains the
//! inertia from the eigenvalues of the shifted matrix.

use crate::error::{SliceError, SliceErrorKind};
use faer::linalg::solvers::PartialPivLu;
use faer::prelude::*;
use faer::{Mat, MatRef, Side};

/// The spectral-transform operator used by the local Krylov-Schur engine.
///
/// Implementations own the factorization of `A - sigma B` for the current
/// shift `sigma` and expose the action of `(A - sigma B)^-1 B` together with
/// the eigenvalue back-transformation `lambda = sigma + 1/theta`.
pub trait ShiftedOperator {
    /// Dimension of the eigenproblem.
    fn dim(&self) -> usize;

    /// Currently installed shift.
    fn shift(&self) -> f64;

    /// Installs a new shift and refactorizes. Called once per extracted
    /// shift, before any [`apply`](Self::apply).
    fn set_shift(&mut self, sigma: f64) -> Result<(), SliceError>;

    /// Applies `(A - sigma B)^-1 B` to a single-column matrix.
    ///
    /// # Panics
    ///
    /// Panics if no shift has been installed or if dimensions mismatch.
    fn apply(&self, x: MatRef<'_, f64>) -> Mat<f64>;

    /// Maps a Ritz value of the transformed operator back to a physical
    /// eigenvalue of the pencil.
    fn back_transform(&self, theta: f64) -> f64 {
        if theta == 0.0 {
            self.shift()
        } else {
            self.shift() + 1.0 / theta
        }
    }
}

/// Counts eigenvalues below a point without computing them.
///
/// `inertia_at(sigma)` is the number of negative eigenvalues of
/// `A - sigma B`, i.e. the number of pencil eigenvalues strictly below
/// `sigma`. The slicing context handles infinite arguments itself, so
/// implementations only ever see finite shifts.
pub trait InertiaOracle {
    /// Inertia of `A - sigma B` at a finite shift.
    fn inertia_at(&mut self, sigma: f64) -> Result<i64, SliceError>;
}

/// Dense reference implementation of the shift-and-invert transform over a
/// symmetric pair `(A, B)`, with `B = I` for standard problems.
///
/// This is the testing/reference oracle: application goes through an LU
/// factorization of `A - sigma B` and the inertia through the eigenvalues of
/// the shifted matrix. Production problems plug a sparse `LDL^T`
/// factorization in through the same two traits.
#[derive(Clone)]
pub struct ShiftInvert {
    a: Mat<f64>,
    b: Option<Mat<f64>>,
    sigma: f64,
    // Shared by clones until one of them installs a new shift; set_shift
    // replaces the Arc wholesale, so clones never see a stale swap.
    #[allow(clippy::type_complexity)]
    lu: Option<std::sync::Arc<PartialPivLu<f64>>>,
}

impl ShiftInvert {
    /// Transform for the standard problem `A x = lambda x`.
    pub fn standard(a: Mat<f64>) -> Result<Self, SliceError> {
        Self::build(a, None)
    }

    /// Transform for the generalized problem `A x = lambda B x`.
    pub fn generalized(a: Mat<f64>, b: Mat<f64>) -> Result<Self, SliceError> {
        Self::build(a, Some(b))
    }

    fn build(a: Mat<f64>, b: Option<Mat<f64>>) -> Result<Self, SliceError> {
        if a.nrows() == 0 || a.nrows() != a.ncols() {
            return Err(SliceErrorKind::EmptyOperator.into());
        }
        if let Some(ref b) = b {
            if b.nrows() != a.nrows() || b.ncols() != a.ncols() {
                return Err(SliceErrorKind::EmptyOperator.into());
            }
        }
        Ok(Self {
            a,
            b,
            sigma: f64::NAN,
            lu: None,
        })
    }

    /// Builds a diagonal standard problem with the given spectrum. Handy for
    /// constructing problems with a known spectrum.
    pub fn from_spectrum(eigs: &[f64]) -> Result<Self, SliceError> {
        let n = eigs.len();
        let a = Mat::from_fn(n, n, |i, j| if i == j { eigs[i] } else { 0.0 });
        Self::build(a, None)
    }

    /// The shifted matrix `A - sigma B`.
    fn shifted(&self, sigma: f64) -> Mat<f64> {
        let n = self.a.nrows();
        Mat::from_fn(n, n, |i, j| {
            let bij = match &self.b {
                Some(b) => b[(i, j)],
                None => (i == j) as usize as f64,
            };
            self.a[(i, j)] - sigma * bij
        })
    }
}

impl ShiftedOperator for ShiftInvert {
    fn dim(&self) -> usize {
        self.a.nrows()
    }

    fn shift(&self) -> f64 {
        self.sigma
    }

    fn set_shift(&mut self, sigma: f64) -> Result<(), SliceError> {
        self.sigma = sigma;
        let shifted = self.shifted(sigma);
        self.lu = Some(std::sync::Arc::new(shifted.partial_piv_lu()));
        Ok(())
    }

    fn apply(&self, x: MatRef<'_, f64>) -> Mat<f64> {
        assert_eq!(
            x.nrows(),
            self.a.nrows(),
            "operator has {} rows but vector has {}",
            self.a.nrows(),
            x.nrows()
        );
        let lu = self
            .lu
            .as_ref()
            .expect("set_shift must be called before apply");
        let rhs = match &self.b {
            Some(b) => b * x,
            None => x.to_owned(),
        };
        lu.solve(&rhs)
    }
}

impl InertiaOracle for ShiftInvert {
    fn inertia_at(&mut self, sigma: f64) -> Result<i64, SliceError> {
        let shifted = self.shifted(sigma);
        let eigs = shifted
            .as_ref()
            .self_adjoint_eigenvalues(Side::Lower)
            .map_err(|e| {
                SliceError::from(SliceErrorKind::Factorization {
                    shift: sigma,
                    reason: format!("{e:?}"),
                })
            })?;
        Ok(eigs.iter().filter(|&&l| l < 0.0).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inertia_counts_eigenvalues_below_shift() {
        let mut op = ShiftInvert::from_spectrum(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(op.inertia_at(0.0).unwrap(), 0);
        assert_eq!(op.inertia_at(2.5).unwrap(), 2);
        assert_eq!(op.inertia_at(10.0).unwrap(), 5);
    }

    #[test]
    fn apply_inverts_the_shifted_matrix() {
        let mut op = ShiftInvert::from_spectrum(&[1.0, 2.0, 4.0]).unwrap();
        op.set_shift(3.0).unwrap();
        // (A - 3I)^-1 e2 = e2 / (4 - 3)
        let e2 = Mat::from_fn(3, 1, |i, _| (i == 2) as usize as f64);
        let y = op.apply(e2.as_ref());
        assert!((y[(2, 0)] - 1.0).abs() < 1e-12);
        assert!(y[(0, 0)].abs() < 1e-12 && y[(1, 0)].abs() < 1e-12);
    }

    #[test]
    fn back_transform_is_shift_plus_reciprocal() {
        let mut op = ShiftInvert::from_spectrum(&[1.0, 2.0]).unwrap();
        op.set_shift(1.5).unwrap();
        let theta = 1.0 / (2.0 - 1.5);
        assert!((op.back_transform(theta) - 2.0).abs() < 1e-14);
    }
}
