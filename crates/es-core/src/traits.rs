//! Core traits for the event-study engine
//!
//! The estimation engine never depends on a particular regression backend.
//! It talks to any type implementing [`LinearModelFitter`], which receives a
//! dense design plus fixed-effect and cluster specifications and hands back
//! coefficients, their covariance, column labels and per-row residuals.

use crate::Result;

/// One linear-model estimation request.
///
/// All matrices are row-major.
#[derive(Debug, Clone, Copy)]
pub struct FitProblem<'a> {
    /// Outcome (length `n`).
    pub y: &'a [f64],
    /// Design matrix, shape `(n, k)`.
    pub x: &'a [f64],
    /// Number of design columns.
    pub k: usize,
    /// Fixed-effect dimensions: each maps observation → 0-based level.
    pub fixed_effects: &'a [Vec<usize>],
    /// Cluster assignment per observation (0-based).
    pub clusters: &'a [usize],
    /// Column labels (length `k`).
    pub labels: &'a [String],
}

impl FitProblem<'_> {
    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }
}

/// Per-cluster estimating-equation contributions.
///
/// `values` is row-major `(n_clusters, k)` with row `g` equal to
/// `ψ_g = (X'X)⁻¹ X_g' e_g`, and `scale` is the small-sample factor such
/// that the reported covariance is `scale · Σ_g ψ_g ψ_gᵗ`.
#[derive(Debug, Clone)]
pub struct ClusterInfluence {
    /// Number of clusters (rows).
    pub n_clusters: usize,
    /// Row-major influence values.
    pub values: Vec<f64>,
    /// Small-sample scale factor.
    pub scale: f64,
}

/// Output of a linear-model fit.
#[derive(Debug, Clone)]
pub struct FitOutput {
    /// Coefficients (length `k`); `NaN` where `estimable[j]` is false.
    pub coefficients: Vec<f64>,
    /// Covariance matrix, row-major `(k, k)`.
    pub covariance: Vec<f64>,
    /// Column labels (length `k`).
    pub labels: Vec<String>,
    /// Whether each column could be estimated.
    pub estimable: Vec<bool>,
    /// Cluster contributions for multiplier bootstrap, if available.
    pub influence: Option<ClusterInfluence>,
    /// Residuals `y − ŷ` of the full model (fixed effects included), row order.
    pub residuals: Vec<f64>,
    /// Fitted values `ŷ` of the full model (fixed effects included), row order.
    pub fitted_values: Vec<f64>,
    /// Number of observations used.
    pub n_obs: usize,
    /// Number of clusters.
    pub n_clusters: usize,
}

/// Capability interface for the external fixed-effects regression routine.
///
/// Implementors must be deterministic for a given problem.
pub trait LinearModelFitter: Send + Sync {
    /// Fit the model; errors signal structural failure (singular design, …).
    fn fit(&self, problem: &FitProblem<'_>) -> Result<FitOutput>;

    /// Backend name (e.g. "hdfe-ols").
    fn name(&self) -> &str;
}
