//! Wald test of equal effects across cohorts at common relative times.
//!
//! For every relative time with at least two estimable cohorts, each
//! non-reference cohort contributes one restriction
//! `β_{g,r} − β_{ref,r} = 0`. The joint statistic `(Rβ)ᵗ (RΣRᵗ)⁺ (Rβ)` is
//! referred to χ² with as many degrees of freedom as `RΣRᵗ` has numerically
//! non-zero eigenvalues.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use es_core::{Error, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use super::adapter::EstimatedModel;
use super::design::EventWindow;
use super::linalg::symmetric_pseudo_inverse;

/// Cohort every other cohort is compared against at a relative time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceCohort {
    /// Earliest adopting cohort present at that relative time.
    #[default]
    First,
    /// Cohort with the most observations at that relative time.
    Largest,
    /// A fixed adoption period; falls back to `First` where it is absent.
    Specific(i64),
}

impl FromStr for ReferenceCohort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "first" | "earliest" => Ok(ReferenceCohort::First),
            "largest" => Ok(ReferenceCohort::Largest),
            other => other.parse::<i64>().map(ReferenceCohort::Specific).map_err(|_| {
                Error::UnknownOption {
                    kind: "reference cohort",
                    value: s.to_string(),
                    expected: "first, largest, or an adoption period",
                }
            }),
        }
    }
}

impl fmt::Display for ReferenceCohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceCohort::First => f.write_str("first"),
            ReferenceCohort::Largest => f.write_str("largest"),
            ReferenceCohort::Specific(g) => write!(f, "{g}"),
        }
    }
}

/// Options for [`test_treatment_heterogeneity`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeterogeneityConfig {
    /// Reference cohort rule.
    pub reference: ReferenceCohort,
    /// Relative times included in the test.
    pub window: EventWindow,
    /// Eigenvalues of `RΣRᵗ` below `singular_tol · λ_max` are discarded.
    pub singular_tol: f64,
}

impl Default for HeterogeneityConfig {
    fn default() -> Self {
        Self { reference: ReferenceCohort::First, window: EventWindow::All, singular_tol: 1e-10 }
    }
}

/// One tested equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    /// Relative time of both cells.
    pub rel_time: i64,
    /// Cohort being compared.
    pub cohort: i64,
    /// Reference cohort at this relative time.
    pub reference_cohort: i64,
}

/// Result of the heterogeneity test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeterogeneityTest {
    /// Wald statistic.
    pub statistic: f64,
    /// Degrees of freedom (effective rank of `RΣRᵗ`).
    pub df: usize,
    /// Upper-tail χ²(df) probability.
    pub p_value: f64,
    /// Whether the pseudo-inverse discarded directions.
    pub approximate: bool,
    /// Restrictions in row order.
    pub restrictions: Vec<Restriction>,
    /// Relative times in the window with at least one estimable column.
    pub relative_times: usize,
}

/// Test `H0`: every cohort shares the same effect at each relative time.
///
/// # Errors
///
/// - [`Error::InsufficientCohorts`] when no relative time in the window has
///   two estimable cohorts.
/// - [`Error::Computation`] when `RΣRᵗ` is numerically zero.
/// - [`Error::Validation`] for a `singular_tol` outside `(0, 1)`.
pub fn test_treatment_heterogeneity(
    model: &EstimatedModel,
    config: &HeterogeneityConfig,
) -> Result<HeterogeneityTest> {
    let tol = config.singular_tol;
    if !(tol.is_finite() && tol > 0.0 && tol < 1.0) {
        return Err(Error::Validation(format!("singular_tol must be in (0,1), got {tol}")));
    }

    // rel_time -> estimable columns, cohort ascending
    let mut by_rel: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for j in model.columns_in(config.window) {
        by_rel.entry(model.columns[j].rel_time).or_default().push(j);
    }
    for cols in by_rel.values_mut() {
        cols.sort_by_key(|&j| model.columns[j].cohort);
    }

    let mut pairs: Vec<(usize, usize)> = Vec::new();
    let mut restrictions = Vec::new();
    for (&rel_time, cols) in &by_rel {
        if cols.len() < 2 {
            continue;
        }
        let reference = pick_reference(model, cols, config.reference);
        for &j in cols.iter().filter(|&&j| j != reference) {
            pairs.push((j, reference));
            restrictions.push(Restriction {
                rel_time,
                cohort: model.columns[j].cohort,
                reference_cohort: model.columns[reference].cohort,
            });
        }
    }
    if pairs.is_empty() {
        return Err(Error::InsufficientCohorts { relative_times: by_rel.len() });
    }

    let q = pairs.len();
    let k = model.n_columns();
    let mut r = DMatrix::<f64>::zeros(q, k);
    for (row, &(j, reference)) in pairs.iter().enumerate() {
        r[(row, j)] = 1.0;
        r[(row, reference)] = -1.0;
    }
    let beta = DVector::from_iterator(
        k,
        model.coefficients.iter().map(|b| if b.is_finite() { *b } else { 0.0 }),
    );
    let rb = &r * beta;
    let rvr = &r * &model.covariance * r.transpose();

    let pinv = symmetric_pseudo_inverse(&rvr, tol);
    if pinv.rank == 0 {
        return Err(Error::Computation(
            "restriction covariance is numerically zero; heterogeneity test undefined".into(),
        ));
    }
    let approximate = !pinv.is_full_rank();
    if approximate {
        log::warn!(
            "heterogeneity test: restriction covariance has rank {} < {q}; using pseudo-inverse",
            pinv.rank
        );
    }

    let statistic = rb.dot(&(&pinv.matrix * &rb)).max(0.0);
    let df = pinv.rank;
    let chi2 = ChiSquared::new(df as f64)
        .map_err(|e| Error::Computation(format!("chi-squared({df}): {e}")))?;
    let p_value = chi2.sf(statistic);

    Ok(HeterogeneityTest {
        statistic,
        df,
        p_value,
        approximate,
        restrictions,
        relative_times: by_rel.len(),
    })
}

/// Reference column among `cols` (all at one relative time, cohort ascending).
fn pick_reference(model: &EstimatedModel, cols: &[usize], rule: ReferenceCohort) -> usize {
    let first = cols[0];
    match rule {
        ReferenceCohort::First => first,
        ReferenceCohort::Largest => cols.iter().copied().fold(first, |best, j| {
            if model.columns[j].n_obs > model.columns[best].n_obs { j } else { best }
        }),
        ReferenceCohort::Specific(g) => {
            cols.iter().copied().find(|&j| model.columns[j].cohort == g).unwrap_or(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::econometrics::design::DesignColumn;

    fn model(cells: &[(i64, i64, usize, f64)], variance: f64) -> EstimatedModel {
        let k = cells.len();
        EstimatedModel {
            columns: cells
                .iter()
                .map(|&(cohort, rel_time, n_obs, _)| DesignColumn { cohort, rel_time, n_obs })
                .collect(),
            coefficients: DVector::from_iterator(k, cells.iter().map(|c| c.3)),
            covariance: DMatrix::identity(k, k) * variance,
            estimable: vec![true; k],
            dropped_columns: Vec::new(),
            influence: None,
            residuals: Vec::new(),
            fitted_values: Vec::new(),
            n_obs: 1000,
            n_clusters: 100,
            fitter: "test".into(),
        }
    }

    #[test]
    fn equal_effects_give_zero_statistic() {
        let m = model(&[(3, 0, 10, 1.0), (3, 1, 10, 2.0), (5, 0, 10, 1.0), (5, 1, 10, 2.0)], 0.1);
        let res = test_treatment_heterogeneity(&m, &HeterogeneityConfig::default()).unwrap();
        assert_eq!(res.df, 2);
        assert!(res.statistic.abs() < 1e-12);
        assert!((res.p_value - 1.0).abs() < 1e-9);
        assert!(!res.approximate);
    }

    #[test]
    fn statistic_matches_hand_computation() {
        // one restriction: (2 - 1) / sqrt(0.5 + 0.5) => W = 1
        let m = model(&[(3, 0, 10, 1.0), (5, 0, 10, 2.0)], 0.5);
        let res = test_treatment_heterogeneity(&m, &HeterogeneityConfig::default()).unwrap();
        assert_eq!(res.df, 1);
        assert!((res.statistic - 1.0).abs() < 1e-10);
        // P(χ²₁ > 1) = 0.3173
        assert!((res.p_value - 0.317_310_507_862_914).abs() < 1e-6);
        let expected = Restriction { rel_time: 0, cohort: 5, reference_cohort: 3 };
        assert_eq!(res.restrictions, vec![expected]);
    }

    #[test]
    fn relative_times_with_single_cohort_are_skipped() {
        let m = model(&[(3, 0, 10, 1.0), (3, 4, 10, 9.0), (5, 0, 10, 2.0)], 0.5);
        let res = test_treatment_heterogeneity(&m, &HeterogeneityConfig::default()).unwrap();
        assert_eq!(res.df, 1);
        assert_eq!(res.relative_times, 2);
    }

    #[test]
    fn one_cohort_per_relative_time_is_insufficient() {
        let m = model(&[(3, 0, 10, 1.0), (5, 1, 10, 2.0)], 0.5);
        let err = test_treatment_heterogeneity(&m, &HeterogeneityConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InsufficientCohorts { relative_times: 2 }));
    }

    #[test]
    fn window_restricts_tested_cells() {
        let m = model(&[(3, -2, 10, 0.0), (3, 0, 10, 1.0), (5, -2, 10, 5.0), (5, 0, 10, 1.0)], 0.5);
        let cfg = HeterogeneityConfig { window: EventWindow::PostOnly, ..Default::default() };
        let res = test_treatment_heterogeneity(&m, &cfg).unwrap();
        assert_eq!(res.df, 1);
        assert!(res.statistic.abs() < 1e-12);
    }

    #[test]
    fn reference_rules() {
        let m = model(&[(3, 0, 5, 1.0), (5, 0, 20, 2.0), (7, 0, 20, 3.0)], 0.5);
        let refs = |rule| {
            let cfg = HeterogeneityConfig { reference: rule, ..Default::default() };
            let res = test_treatment_heterogeneity(&m, &cfg).unwrap();
            res.restrictions[0].reference_cohort
        };
        assert_eq!(refs(ReferenceCohort::First), 3);
        // tie between 5 and 7 goes to the earlier cohort
        assert_eq!(refs(ReferenceCohort::Largest), 5);
        assert_eq!(refs(ReferenceCohort::Specific(7)), 7);
        assert_eq!(refs(ReferenceCohort::Specific(99)), 3);
    }

    #[test]
    fn singular_restriction_covariance_uses_pseudo_inverse() {
        // cohorts 5 and 7 perfectly correlated with each other
        let mut m = model(&[(3, 0, 10, 0.0), (5, 0, 10, 1.0), (7, 0, 10, 1.0)], 1.0);
        m.covariance =
            DMatrix::from_row_slice(3, 3, &[0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0]);
        let res = test_treatment_heterogeneity(&m, &HeterogeneityConfig::default()).unwrap();
        assert!(res.approximate);
        assert_eq!(res.df, 1);
        // Rβ = (1, 1), RΣRᵗ = [[1,1],[1,1]], pinv = [[.25,.25],[.25,.25]] => W = 1
        assert!((res.statistic - 1.0).abs() < 1e-10);
    }

    #[test]
    fn zero_covariance_is_a_computation_error() {
        let m = model(&[(3, 0, 10, 0.0), (5, 0, 10, 1.0)], 0.0);
        let err = test_treatment_heterogeneity(&m, &HeterogeneityConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn parse_reference_cohort() {
        assert_eq!("largest".parse::<ReferenceCohort>().unwrap(), ReferenceCohort::Largest);
        assert_eq!("2004".parse::<ReferenceCohort>().unwrap(), ReferenceCohort::Specific(2004));
        assert!(matches!("median".parse::<ReferenceCohort>(), Err(Error::UnknownOption { .. })));
    }
}
