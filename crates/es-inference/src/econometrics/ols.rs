//! Reference fixed-effects OLS fitter with cluster-robust (CRV1) covariance.
//!
//! Absorbs every fixed-effect dimension with [`FixedEffectsSolver`], drops
//! columns that are collinear with the absorbed effects or with earlier
//! columns, solves OLS on the remaining demeaned design and returns the
//! Liang–Zeger sandwich covariance together with the per-cluster influence
//! contributions that the multiplier bootstrap perturbs.
//!
//! # References
//!
//! - Wooldridge, *Econometric Analysis of Cross Section and Panel Data*, Ch. 10.
//! - Cameron & Miller (2015), "A Practitioner's Guide to Cluster-Robust
//!   Inference." *Journal of Human Resources*.

use std::collections::BTreeMap;

use es_core::{ClusterInfluence, Error, FitOutput, FitProblem, LinearModelFitter, Result};
use nalgebra::{DMatrix, DVector};

use super::hdfe::{self, FixedEffectsSolver};
use super::linalg::collinear_columns;

/// Default relative pivot tolerance for collinearity detection.
const DEFAULT_COLLINEAR_TOL: f64 = 1e-10;

/// OLS on FE-demeaned data with CRV1 standard errors.
#[derive(Debug, Clone)]
pub struct HdfeOls {
    collinear_tol: f64,
    fe_tol: f64,
    fe_max_iter: usize,
}

impl Default for HdfeOls {
    fn default() -> Self {
        Self {
            collinear_tol: DEFAULT_COLLINEAR_TOL,
            fe_tol: hdfe::DEFAULT_TOL,
            fe_max_iter: hdfe::DEFAULT_MAX_ITER,
        }
    }
}

impl HdfeOls {
    /// Fitter with default tolerances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative pivot tolerance for dropping collinear columns.
    pub fn with_collinear_tol(mut self, tol: f64) -> Self {
        self.collinear_tol = tol;
        self
    }

    /// Convergence tolerance of the fixed-effect absorption.
    pub fn with_fe_tol(mut self, tol: f64) -> Self {
        self.fe_tol = tol;
        self
    }

    /// Maximum number of conjugate-gradient steps in the absorption.
    pub fn with_fe_max_iter(mut self, max_iter: usize) -> Self {
        self.fe_max_iter = max_iter;
        self
    }

    fn validate(problem: &FitProblem<'_>) -> Result<()> {
        let n = problem.n_obs();
        if n == 0 {
            return Err(Error::Validation("y must be non-empty".into()));
        }
        if problem.k == 0 {
            return Err(Error::Validation("design must have at least one column".into()));
        }
        if problem.x.len() != n * problem.k {
            return Err(Error::Validation(format!(
                "x length ({}) != n*k ({})",
                problem.x.len(),
                n * problem.k
            )));
        }
        if problem.clusters.len() != n {
            return Err(Error::Validation(format!(
                "clusters length ({}) != n ({n})",
                problem.clusters.len()
            )));
        }
        if problem.labels.len() != problem.k {
            return Err(Error::Validation(format!(
                "labels length ({}) != k ({})",
                problem.labels.len(),
                problem.k
            )));
        }
        Ok(())
    }
}

impl LinearModelFitter for HdfeOls {
    fn fit(&self, problem: &FitProblem<'_>) -> Result<FitOutput> {
        Self::validate(problem)?;
        let n = problem.n_obs();
        let k = problem.k;

        // Absorb fixed effects from y and every design column.
        let (y_dm, x_cols, absorbed) = if problem.fixed_effects.is_empty() {
            let cols = (0..k).map(|j| (0..n).map(|i| problem.x[i * k + j]).collect()).collect();
            (problem.y.to_vec(), cols, 0usize)
        } else {
            let solver = FixedEffectsSolver::new(problem.fixed_effects.to_vec())?
                .with_tol(self.fe_tol)
                .with_max_iter(self.fe_max_iter);
            let nested: Vec<bool> = (0..problem.fixed_effects.len())
                .map(|d| solver.is_nested_in(d, problem.clusters))
                .collect();
            // FE nested within clusters do not count against N − K.
            let absorbed = if nested.iter().any(|&b| b) {
                solver
                    .levels()
                    .iter()
                    .zip(&nested)
                    .filter(|(_, nested)| !**nested)
                    .map(|(levels, _)| levels.saturating_sub(1))
                    .sum()
            } else {
                solver.degrees_of_freedom_absorbed()
            };
            (solver.partial_out(problem.y)?, solver.partial_out_columns(problem.x, k)?, absorbed)
        };

        let x_full = DMatrix::from_fn(n, k, |i, j| x_cols[j][i]);
        let dropped = collinear_columns(&(x_full.transpose() * &x_full), self.collinear_tol);
        let kept: Vec<usize> = (0..k).filter(|j| !dropped.contains(j)).collect();
        if kept.is_empty() {
            return Err(Error::Computation(
                "every design column is collinear with the fixed effects".into(),
            ));
        }
        let p = kept.len();

        let x_mat = x_full.select_columns(kept.iter());
        let y_vec = DVector::from_vec(y_dm);
        let xtx = x_mat.transpose() * &x_mat;
        let xtx_inv = match xtx.clone().cholesky() {
            Some(chol) => chol.inverse(),
            None => xtx
                .try_inverse()
                .ok_or_else(|| Error::Computation("X'X singular after demeaning".into()))?,
        };
        let beta = &xtx_inv * (x_mat.transpose() * &y_vec);
        let resid = &y_vec - &x_mat * &beta;

        let psi = cluster_influence(&x_mat, &resid, &xtx_inv, problem.clusters);
        let g = psi.nrows();
        if g < 2 {
            return Err(Error::Computation(format!(
                "need at least 2 clusters for cluster-robust covariance, got {g}"
            )));
        }
        let big_k = p + absorbed;
        if n <= big_k {
            return Err(Error::Computation(format!(
                "no residual degrees of freedom: n = {n}, K = {big_k} ({p} regressors + \
                 {absorbed} absorbed)"
            )));
        }

        // CRV1: G/(G-1) · (N-1)/(N-K)
        let (g_f, n_f, k_f) = (g as f64, n as f64, big_k as f64);
        let scale = (g_f / (g_f - 1.0)) * ((n_f - 1.0) / (n_f - k_f));
        let vcov = (psi.transpose() * &psi) * scale;

        // Scatter back onto the full column set.
        let mut coefficients = vec![f64::NAN; k];
        let mut covariance = vec![0.0_f64; k * k];
        let mut influence = vec![0.0_f64; g * k];
        let mut estimable = vec![false; k];
        for (a, &ja) in kept.iter().enumerate() {
            coefficients[ja] = beta[a];
            estimable[ja] = true;
            for (b, &jb) in kept.iter().enumerate() {
                covariance[ja * k + jb] = vcov[(a, b)];
            }
            for row in 0..g {
                influence[row * k + ja] = psi[(row, a)];
            }
        }

        // The demeaned-regression residual is the full-model residual.
        let residuals: Vec<f64> = resid.iter().copied().collect();
        let fitted_values = problem.y.iter().zip(&residuals).map(|(y, e)| y - e).collect();

        Ok(FitOutput {
            coefficients,
            covariance,
            labels: problem.labels.to_vec(),
            estimable,
            influence: Some(ClusterInfluence { n_clusters: g, values: influence, scale }),
            residuals,
            fitted_values,
            n_obs: n,
            n_clusters: g,
        })
    }

    fn name(&self) -> &str {
        "hdfe-ols"
    }
}

/// Per-cluster contributions `ψ_g = (X'X)⁻¹ X_g' e_g`, one row per cluster.
///
/// Rows follow ascending cluster id so downstream bootstrap draws line up
/// with clusters deterministically.
pub fn cluster_influence(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    cluster_ids: &[usize],
) -> DMatrix<f64> {
    let p = x.ncols();
    let mut rows: BTreeMap<usize, usize> = BTreeMap::new();
    for &cid in cluster_ids {
        let next = rows.len();
        rows.entry(cid).or_insert(next);
    }
    // Re-rank so row order follows cluster id, not first appearance.
    for (rank, slot) in rows.values_mut().enumerate() {
        *slot = rank;
    }

    let mut scores = DMatrix::<f64>::zeros(rows.len(), p);
    for (i, cid) in cluster_ids.iter().enumerate() {
        let row = rows[cid];
        let e_i = residuals[i];
        for j in 0..p {
            scores[(row, j)] += x[(i, j)] * e_i;
        }
    }
    // ψ = S (X'X)⁻¹ (xtx_inv is symmetric)
    scores * xtx_inv
}

/// Cluster-robust standard errors from an influence matrix and scale.
pub fn cluster_robust_se(psi: &DMatrix<f64>, scale: f64) -> Vec<f64> {
    (0..psi.ncols()).map(|j| (scale * psi.column(j).norm_squared()).max(0.0).sqrt()).collect()
}
