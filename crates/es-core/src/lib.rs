//! # es-core
//!
//! Core types for staggered-adoption event-study estimation.
//!
//! This crate provides:
//! - the error taxonomy shared by every component,
//! - panel data types (`Id`, `Cohort`, `Observation`),
//! - the `LinearModelFitter` capability trait that isolates estimation
//!   logic from the regression backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;
/// Fitter capability trait and its request/response types.
pub mod traits;
/// Panel data types.
pub mod types;

pub use error::{Error, PanelIssue, Result};
pub use traits::{ClusterInfluence, FitOutput, FitProblem, LinearModelFitter};
pub use types::{Cohort, Id, Observation};
