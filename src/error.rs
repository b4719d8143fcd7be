//! This module defines the custom error types for the library.
//!
//! All fatal conditions that can arise during a spectrum-slicing solve are
//! centralized in a single enum: [`SliceErrorKind`], wrapped by the public
//! [`SliceError`] type.
//!
//! Using the [`thiserror`] crate allows us to create idiomatic error types with
//! minimal boilerplate. Note that [`faer::linalg::evd::EvdError`] does not
//! implement the standard [`std::error::Error`] trait, so we wrap it manually
//! to provide a compatible error type.
//!
//! Iteration-budget exhaustion and Lanczos breakdown are deliberately *not*
//! errors: they are reported through
//! [`ConvergedReason`](crate::solver::ConvergedReason) in the solve result,
//! while the variants below abort the solve outright.
use thiserror::Error;

/// Represents all fatal errors that can occur during a spectrum-slicing solve.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct SliceError(#[from] SliceErrorKind);

/// Private enum containing the distinct kinds of errors.
/// This separation allows for a clean `Display` implementation via
/// [`thiserror`] while handling non-standard error types manually.
#[derive(Error, Debug, PartialEq)]
pub(crate) enum SliceErrorKind {
    /// The computational interval is empty or unbounded on both ends.
    #[error("Invalid computational interval [{lo}, {hi}]: a slicing run needs a non-empty interval with at least one finite end.")]
    InvalidInterval { lo: f64, hi: f64 },

    /// Uniform sub-interval splitting requires a bounded interval.
    #[error("Global interval must be bounded when splitting it into {npart} uniform subintervals.")]
    UnboundedSplit { npart: usize },

    /// The requested subspace dimension is below the slicing minimum.
    #[error("nev cannot be less than {min} in spectrum slicing runs (got {nev}).")]
    NevTooSmall { nev: usize, min: usize },

    /// The operator has zero rows/columns.
    #[error("The operator must have a positive dimension.")]
    EmptyOperator,

    /// Mismatch between the number of eigenvalues found on one side of a
    /// shift and the count predicted by the inertia difference. Signals a
    /// non-symmetric problem, a faulty factorization, or a logic defect;
    /// never recoverable.
    #[error("Mismatch between number of eigenvalues found and information from inertia at shift {shift} ({side} side).")]
    InertiaMismatch { shift: f64, side: &'static str },

    /// More eigenvalues were accepted than the inertia difference over the
    /// whole interval allows.
    #[error("Eigenvalue storage overflow: more values accepted than predicted by the boundary inertias ({expected}).")]
    StorageOverflow { expected: usize },

    /// Geometric interval expansion exhausted its budget on an open interval.
    #[error("Unable to compute the wanted eigenvalues with open interval: no new eigenvalues after {leaps} geometric expansions.")]
    LeapBudgetExceeded { leaps: usize },

    /// The very first shift converged nothing, so the scheduler has no
    /// spectral density information to place a second shift.
    #[error("First shift renders no information.")]
    NoFirstShiftInfo,

    /// A factorization or linear solve at a shift failed.
    #[error("Factorization failed at shift {shift}: {reason}")]
    Factorization { shift: f64, reason: String },

    /// Wraps an error originating from [`faer`]'s eigendecomposition module.
    #[error("A numerical error occurred during the projected eigensolve: {0:?}")]
    EvdError(faer::linalg::evd::EvdError),
}

// Manually implement PartialEq for the public error type.
// We compare the inner `SliceErrorKind`.
impl PartialEq for SliceError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
