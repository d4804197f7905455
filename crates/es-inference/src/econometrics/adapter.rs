//! Boundary between the saturated design and an external fitter.
//!
//! The adapter materializes the design, hands it to a [`LinearModelFitter`]
//! together with the unit/time fixed effects and unit clusters, checks the
//! shape of whatever comes back and packages it as an immutable
//! [`EstimatedModel`]. Fitter failures are structural, so nothing is retried.

use es_core::{Error, FitProblem, LinearModelFitter, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::design::{DesignColumn, EventWindow, SaturatedDesign};
use super::hdfe::FixedEffectsSolver;
use super::linalg::{collinear_columns, symmetrize};
use super::panel::PanelIndex;

/// Relative pivot tolerance of the diagnostic rank check.
const RANK_CHECK_TOL: f64 = 1e-10;

/// What to do when the fitter reports non-estimable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollinearPolicy {
    /// Warn, keep going and record the columns.
    #[default]
    Drop,
    /// Fail with [`Error::EstimationFailed`].
    Fail,
}

/// Fitted saturated model: coefficients, covariance and column mapping.
#[derive(Debug, Clone)]
pub struct EstimatedModel {
    /// Column → (cohort, rel_time) mapping.
    pub columns: Vec<DesignColumn>,
    /// Coefficients (`NaN` where not estimable).
    pub coefficients: DVector<f64>,
    /// Symmetric covariance matrix.
    pub covariance: DMatrix<f64>,
    /// Whether each column was estimated.
    pub estimable: Vec<bool>,
    /// Columns dropped as collinear.
    pub dropped_columns: Vec<usize>,
    /// Per-cluster influence `(G, k)` and its scale.
    pub influence: Option<(DMatrix<f64>, f64)>,
    /// Full-model residuals in panel row order.
    pub residuals: Vec<f64>,
    /// Full-model fitted values in panel row order.
    pub fitted_values: Vec<f64>,
    /// Observations used in the fit.
    pub n_obs: usize,
    /// Number of clusters.
    pub n_clusters: usize,
    /// Name of the fitter that produced the model.
    pub fitter: String,
}

impl EstimatedModel {
    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Standard error of column `j` (`sqrt` of the clamped diagonal).
    pub fn std_error(&self, j: usize) -> f64 {
        self.covariance[(j, j)].max(0.0).sqrt()
    }

    /// Indices of estimable columns inside `window`.
    pub fn columns_in(&self, window: EventWindow) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&j| self.estimable[j] && window.contains(self.columns[j].rel_time))
            .collect()
    }
}

/// Runs a fitter on a saturated design.
pub struct EstimatorAdapter<'a, F: LinearModelFitter + ?Sized> {
    fitter: &'a F,
    policy: CollinearPolicy,
}

impl<'a, F: LinearModelFitter + ?Sized> EstimatorAdapter<'a, F> {
    /// Wrap a fitter with the default [`CollinearPolicy::Drop`].
    pub fn new(fitter: &'a F) -> Self {
        Self { fitter, policy: CollinearPolicy::default() }
    }

    /// Set the collinearity policy.
    pub fn with_collinear_policy(mut self, policy: CollinearPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fit `design` on `panel`'s outcomes.
    ///
    /// # Errors
    ///
    /// [`Error::EstimationFailed`] if the fitter fails, returns output of
    /// the wrong shape, or (under [`CollinearPolicy::Fail`]) leaves columns
    /// unestimated.
    pub fn estimate(&self, panel: &PanelIndex, design: &SaturatedDesign) -> Result<EstimatedModel> {
        let k = design.n_columns();
        let y = panel.outcomes();
        let x = design.to_dense();
        let labels = design.labels();
        let fe = design.fixed_effects();
        let dimensions = fe.dimensions();
        let problem = FitProblem {
            y: &y,
            x: &x,
            k,
            fixed_effects: &dimensions,
            clusters: fe.clusters(),
            labels: &labels,
        };

        let out = self.fitter.fit(&problem).map_err(|e| Error::EstimationFailed {
            columns: rank_check(&x, k, &dimensions),
            reason: format!("{} fit failed: {e}", self.fitter.name()),
        })?;

        let malformed = |what: String| Error::EstimationFailed {
            columns: Vec::new(),
            reason: format!("{} returned {what}", self.fitter.name()),
        };
        if out.coefficients.len() != k || out.estimable.len() != k || out.labels.len() != k {
            return Err(malformed(format!(
                "{} coefficients / {} flags / {} labels for {k} columns",
                out.coefficients.len(),
                out.estimable.len(),
                out.labels.len()
            )));
        }
        if out.covariance.len() != k * k {
            return Err(malformed(format!("a covariance of length {}", out.covariance.len())));
        }
        if out.residuals.len() != y.len() || out.fitted_values.len() != y.len() {
            return Err(malformed(format!(
                "{} residuals / {} fitted values for {} rows",
                out.residuals.len(),
                out.fitted_values.len(),
                y.len()
            )));
        }
        let influence = match out.influence {
            Some(inf) if inf.values.len() != inf.n_clusters * k => {
                return Err(malformed(format!(
                    "an influence matrix of length {} for {} clusters",
                    inf.values.len(),
                    inf.n_clusters
                )));
            }
            Some(inf) => {
                Some((DMatrix::from_row_slice(inf.n_clusters, k, &inf.values), inf.scale))
            }
            None => None,
        };

        let dropped: Vec<usize> = (0..k).filter(|&j| !out.estimable[j]).collect();
        if !dropped.is_empty() {
            let names: Vec<&str> = dropped.iter().map(|&j| labels[j].as_str()).collect();
            match self.policy {
                CollinearPolicy::Fail => {
                    return Err(Error::EstimationFailed {
                        columns: dropped,
                        reason: format!("collinear columns: {}", names.join(", ")),
                    });
                }
                CollinearPolicy::Drop => {
                    log::warn!(
                        "dropping {} collinear column(s): {}",
                        dropped.len(),
                        names.join(", ")
                    );
                }
            }
        }

        let mut covariance = symmetrize(&DMatrix::from_row_slice(k, k, &out.covariance));
        let mut coefficients = DVector::from_vec(out.coefficients);
        for &j in &dropped {
            covariance.row_mut(j).fill(0.0);
            covariance.column_mut(j).fill(0.0);
            coefficients[j] = f64::NAN;
        }
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(malformed("a non-finite covariance".into()));
        }

        Ok(EstimatedModel {
            columns: design.columns().to_vec(),
            coefficients,
            covariance,
            estimable: out.estimable,
            dropped_columns: dropped,
            influence,
            residuals: out.residuals,
            fitted_values: out.fitted_values,
            n_obs: out.n_obs,
            n_clusters: out.n_clusters,
            fitter: self.fitter.name().to_string(),
        })
    }
}

/// Design columns that are linear combinations of the fixed effects and
/// earlier columns. Best effort: an empty list when the check itself fails.
fn rank_check(x: &[f64], k: usize, dimensions: &[Vec<usize>]) -> Vec<usize> {
    if k == 0 || x.is_empty() {
        return Vec::new();
    }
    let n = x.len() / k;
    let mat = if dimensions.is_empty() {
        DMatrix::from_row_slice(n, k, x)
    } else {
        let demeaned = FixedEffectsSolver::new(dimensions.to_vec())
            .and_then(|solver| solver.partial_out_columns(x, k));
        let Ok(cols) = demeaned else {
            return Vec::new();
        };
        DMatrix::from_fn(n, k, |i, j| cols[j][i])
    };
    collinear_columns(&(mat.transpose() * &mat), RANK_CHECK_TOL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use es_core::{ClusterInfluence, Cohort, FitOutput, Observation};

    fn panel() -> PanelIndex {
        let mut rows = Vec::new();
        for unit in 0..6i64 {
            let cohort = match unit {
                0 | 1 => Cohort::Adopts(3),
                2 | 3 => Cohort::Adopts(4),
                _ => Cohort::Never,
            };
            for t in 1..=5 {
                rows.push(Observation::new(unit, t, (unit + t) as f64, cohort));
            }
        }
        PanelIndex::new(rows).unwrap()
    }

    struct Scripted {
        fail: bool,
        drop_first: bool,
        short: bool,
    }

    impl LinearModelFitter for Scripted {
        fn fit(&self, problem: &FitProblem<'_>) -> Result<FitOutput> {
            if self.fail {
                return Err(Error::Computation("singular".into()));
            }
            let k = problem.k;
            let mut estimable = vec![true; k];
            let mut coefficients: Vec<f64> = (0..k).map(|j| j as f64).collect();
            let mut covariance = vec![0.0; k * k];
            for j in 0..k {
                covariance[j * k + j] = 1.0;
            }
            if self.drop_first {
                estimable[0] = false;
                coefficients[0] = f64::NAN;
                covariance[0] = 0.0;
            }
            if self.short {
                coefficients.pop();
            }
            let n = problem.n_obs();
            Ok(FitOutput {
                coefficients,
                covariance,
                labels: problem.labels.to_vec(),
                estimable,
                influence: Some(ClusterInfluence {
                    n_clusters: 2,
                    values: vec![0.0; 2 * k],
                    scale: 1.0,
                }),
                residuals: vec![0.0; n],
                fitted_values: problem.y.to_vec(),
                n_obs: n,
                n_clusters: 2,
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn passes_through_column_mapping() {
        let panel = panel();
        let design = SaturatedDesign::build(&panel, -1).unwrap();
        let fitter = Scripted { fail: false, drop_first: false, short: false };
        let model = EstimatorAdapter::new(&fitter).estimate(&panel, &design).unwrap();
        assert_eq!(model.columns, design.columns());
        assert_eq!(model.coefficients.len(), design.n_columns());
        assert_eq!(model.fitter, "scripted");
        assert!(model.dropped_columns.is_empty());
        assert_eq!(model.influence.as_ref().unwrap().0.nrows(), 2);
    }

    #[test]
    fn fitter_failure_becomes_estimation_failed() {
        let panel = panel();
        let design = SaturatedDesign::build(&panel, -1).unwrap();
        let fitter = Scripted { fail: true, drop_first: false, short: false };
        let err = EstimatorAdapter::new(&fitter).estimate(&panel, &design).unwrap_err();
        match err {
            Error::EstimationFailed { reason, .. } => assert!(reason.contains("singular")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn collinear_policy_controls_dropped_columns() {
        let panel = panel();
        let design = SaturatedDesign::build(&panel, -1).unwrap();
        let fitter = Scripted { fail: false, drop_first: true, short: false };

        let model = EstimatorAdapter::new(&fitter).estimate(&panel, &design).unwrap();
        assert_eq!(model.dropped_columns, vec![0]);
        assert!(!model.columns_in(EventWindow::All).contains(&0));

        let err = EstimatorAdapter::new(&fitter)
            .with_collinear_policy(CollinearPolicy::Fail)
            .estimate(&panel, &design)
            .unwrap_err();
        assert!(matches!(err, Error::EstimationFailed { ref columns, .. } if columns == &vec![0]));
    }

    #[test]
    fn malformed_output_rejected() {
        let panel = panel();
        let design = SaturatedDesign::build(&panel, -1).unwrap();
        let fitter = Scripted { fail: false, drop_first: false, short: true };
        assert!(matches!(
            EstimatorAdapter::new(&fitter).estimate(&panel, &design),
            Err(Error::EstimationFailed { .. })
        ));
    }

    #[test]
    fn residuals_are_passed_through_in_row_order() {
        let panel = panel();
        let design = SaturatedDesign::build(&panel, -1).unwrap();
        let fitter = Scripted { fail: false, drop_first: false, short: false };
        let model = EstimatorAdapter::new(&fitter).estimate(&panel, &design).unwrap();
        assert_eq!(model.fitted_values, panel.outcomes());
        assert_eq!(model.residuals, vec![0.0; panel.n_obs()]);
    }

    #[test]
    fn rank_check_flags_duplicate_columns() {
        // columns: a, a
        let x = vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0];
        assert_eq!(rank_check(&x, 2, &[]), vec![1]);
    }

    #[test]
    fn rank_check_sees_columns_absorbed_by_fixed_effects() {
        // column 1 is constant within units 0/1, so unit FE absorb it
        let unit = vec![0, 0, 1, 1];
        let time = vec![0, 1, 0, 1];
        let x = vec![1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0];
        assert_eq!(rank_check(&x, 2, &[unit, time]), vec![1]);
    }
}
