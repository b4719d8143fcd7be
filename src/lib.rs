//! Spectrum slicing for symmetric eigenvalue problems.
//!
//! This crate computes *all* eigenvalues of a symmetric (or symmetric-definite
//! generalized) eigenproblem inside a real interval, together with their
//! eigenvectors. Instead of asking a single Krylov solver for hundreds of
//! interior eigenvalues at once, the interval is sliced: a sequence of
//! shift-and-invert Krylov-Schur runs is performed at automatically chosen
//! shifts, and matrix inertia information ties the runs together so that no
//! eigenvalue in the interval is missed or computed twice.
//!
//! Built on the [`faer`] linear algebra framework for the dense kernels
//! (projected eigensolves, QR translation, basis rotations).
//!
//! ## How it works
//!
//! The inertia of `A - sigma B` (its number of negative eigenvalues) equals
//! the number of pencil eigenvalues below `sigma`. Evaluating it at two
//! shifts therefore tells exactly how many eigenvalues live between them.
//! The solver walks the interval shift by shift:
//!
//! - at each shift, a restarted Lanczos (Krylov-Schur) iteration on the
//!   shift-and-invert operator converges the eigenvalues closest to it;
//! - inertia differences with the neighboring shifts say how many values the
//!   run must find on each side before its bracket is complete;
//! - incomplete brackets spawn new shifts (midpoints inside the covered
//!   range, density-based extrapolation beyond it), processed depth-first;
//! - previously accepted eigenvectors are locked as deflation constraints,
//!   and consecutive neighboring shifts reuse Krylov data through a
//!   rational-Krylov translation.
//!
//! ## Example
//!
//! ```no_run
//! use spectrum_slicing::{ShiftInvert, SliceOptions, SpectrumSlicer};
//!
//! # fn main() -> Result<(), spectrum_slicing::SliceError> {
//! // A diagonal test problem with eigenvalues 1..=100.
//! let spectrum: Vec<f64> = (1..=100).map(f64::from).collect();
//! let op = ShiftInvert::from_spectrum(&spectrum)?;
//!
//! // Every eigenvalue in [10.5, 40.5], sorted ascending.
//! let slicer = SpectrumSlicer::new(op, 10.5, 40.5, SliceOptions::default())?;
//! let result = slicer.solve()?;
//! assert_eq!(result.nconv, 30);
//! assert_eq!(result.eigenvalues[0], 11.0);
//! # Ok(())
//! # }
//! ```
//!
//! Production problems implement [`ShiftedOperator`] and [`InertiaOracle`]
//! over a sparse factorization; the dense [`ShiftInvert`] shipped here is the
//! reference implementation used by the tests.

// Declare the modules that form the crate's API structure.
pub mod error;
pub mod operator;
pub mod options;
pub mod solver;

mod aggregator;
mod context;
mod deflation;
mod engine;
mod scheduler;

// Re-export the main API for convenient access.
pub use error::SliceError;
pub use operator::{InertiaOracle, ShiftInvert, ShiftedOperator};
pub use options::{SliceOptions, MIN_NEV};
pub use solver::{ConvergedReason, SliceResult, SpectrumSlicer};
