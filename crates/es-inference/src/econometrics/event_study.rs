//! Saturated (interaction-weighted) event-study estimator.
//!
//! [`SaturatedEventStudy::fit`] runs panel indexing, design construction and
//! the fitter, and returns an [`EventStudyFit`]. Aggregation, the
//! heterogeneity test and the joint band all read the same immutable
//! coefficient vector and covariance matrix held by the fit.
//!
//! # Example
//!
//! ```no_run
//! use es_core::{Cohort, Observation};
//! use es_inference::econometrics::{
//!     Aggregation, JointBandConfig, SaturatedEventStudy, Weighting,
//! };
//!
//! # fn main() -> es_core::Result<()> {
//! let rows: Vec<Observation> = (0..40_i64)
//!     .flat_map(|unit| {
//!         let cohort = if unit < 20 { Cohort::Adopts(5) } else { Cohort::Never };
//!         (1..=8).map(move |t| Observation::new(unit, t, (unit + t) as f64, cohort))
//!     })
//!     .collect();
//! let fit = SaturatedEventStudy::default().fit(rows)?;
//! let att = fit.aggregate(Aggregation::Pooled, Weighting::Shares)?;
//! let band_config = JointBandConfig { seed: Some(7), ..Default::default() };
//! let band = fit.joint_confidence_band(&band_config)?;
//! # let _ = (att, band);
//! # Ok(())
//! # }
//! ```

use es_core::{Error, LinearModelFitter, Observation, Result};
use serde::{Deserialize, Serialize};

use super::adapter::{CollinearPolicy, EstimatedModel, EstimatorAdapter};
use super::aggregate::{Aggregation, AggregationResult, Weighting, aggregate};
use super::design::{DesignExclusions, EventWindow, SaturatedDesign};
use super::heterogeneity::{HeterogeneityConfig, HeterogeneityTest, test_treatment_heterogeneity};
use super::joint_band::{JointBand, JointBandConfig, joint_confidence_band};
use super::ols::HdfeOls;
use super::panel::PanelIndex;
use crate::bootstrap_ci::two_sided_p_value;

/// Estimator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStudyConfig {
    /// Relative time omitted as the normalization (usually `-1`).
    pub reference_period: i64,
    /// Handling of columns the fitter cannot estimate.
    pub collinear_policy: CollinearPolicy,
}

impl Default for EventStudyConfig {
    fn default() -> Self {
        Self { reference_period: -1, collinear_policy: CollinearPolicy::Drop }
    }
}

impl EventStudyConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Saturated event-study estimator.
#[derive(Debug, Clone, Default)]
pub struct SaturatedEventStudy {
    config: EventStudyConfig,
}

impl SaturatedEventStudy {
    /// Estimator with the given configuration.
    pub fn new(config: EventStudyConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &EventStudyConfig {
        &self.config
    }

    /// Fit with the built-in [`HdfeOls`] fitter on observations whose
    /// cohorts are given.
    pub fn fit(&self, observations: Vec<Observation>) -> Result<EventStudyFit> {
        let panel = PanelIndex::new(observations)?;
        self.fit_with(&panel, &HdfeOls::default())
    }

    /// Fit an already indexed panel with any [`LinearModelFitter`].
    pub fn fit_with<F: LinearModelFitter + ?Sized>(
        &self,
        panel: &PanelIndex,
        fitter: &F,
    ) -> Result<EventStudyFit> {
        let design = SaturatedDesign::build(panel, self.config.reference_period)?;
        let model = EstimatorAdapter::new(fitter)
            .with_collinear_policy(self.config.collinear_policy)
            .estimate(panel, &design)?;
        Ok(EventStudyFit {
            reference_period: design.reference_period(),
            exclusions: design.exclusions().clone(),
            cohorts: panel.cohorts().to_vec(),
            n_units: panel.n_units(),
            model,
        })
    }
}

/// One row of the coefficient table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    /// Design column index.
    pub column: usize,
    /// Adoption period.
    pub cohort: i64,
    /// Relative time.
    pub rel_time: i64,
    /// Observations in the cell.
    pub n_obs: usize,
    /// Coefficient (`NaN` if not estimable).
    pub estimate: f64,
    /// Standard error.
    pub std_error: f64,
    /// Two-sided normal p-value.
    pub p_value: f64,
    /// Whether the fitter estimated this column.
    pub estimable: bool,
}

/// Fitted saturated event study.
#[derive(Debug, Clone)]
pub struct EventStudyFit {
    reference_period: i64,
    exclusions: DesignExclusions,
    cohorts: Vec<i64>,
    n_units: usize,
    model: EstimatedModel,
}

impl EventStudyFit {
    /// Underlying coefficients, covariance and column mapping.
    pub fn model(&self) -> &EstimatedModel {
        &self.model
    }

    /// Omitted relative time.
    pub fn reference_period(&self) -> i64 {
        self.reference_period
    }

    /// What the design builder left out.
    pub fn exclusions(&self) -> &DesignExclusions {
        &self.exclusions
    }

    /// Adoption cohorts, ascending.
    pub fn cohorts(&self) -> &[i64] {
        &self.cohorts
    }

    /// Number of units (clusters).
    pub fn n_units(&self) -> usize {
        self.n_units
    }

    /// Coefficient for the `(cohort, rel_time)` cell, if it is a column.
    pub fn coefficient(&self, cohort: i64, rel_time: i64) -> Option<f64> {
        self.model
            .columns
            .iter()
            .position(|c| c.cohort == cohort && c.rel_time == rel_time)
            .map(|j| self.model.coefficients[j])
    }

    /// Per-column estimates in column order.
    pub fn coefficients(&self) -> Vec<CoefficientRow> {
        self.model
            .columns
            .iter()
            .enumerate()
            .map(|(j, col)| {
                let estimate = self.model.coefficients[j];
                let std_error = self.model.std_error(j);
                let p_value = if std_error > 0.0 {
                    two_sided_p_value(estimate / std_error)
                } else {
                    f64::NAN
                };
                CoefficientRow {
                    column: j,
                    cohort: col.cohort,
                    rel_time: col.rel_time,
                    n_obs: col.n_obs,
                    estimate,
                    std_error,
                    p_value,
                    estimable: self.model.estimable[j],
                }
            })
            .collect()
    }

    /// Residuals `y − ŷ`, one per input observation in input order.
    pub fn residuals(&self) -> &[f64] {
        &self.model.residuals
    }

    /// Fitted values `ŷ` (fixed effects plus cell effects), one per input
    /// observation in input order.
    pub fn fitted_values(&self) -> &[f64] {
        &self.model.fitted_values
    }

    /// Columns inside `window` that were estimated.
    pub fn columns_in(&self, window: EventWindow) -> Vec<usize> {
        self.model.columns_in(window)
    }

    /// Weighted summaries of the cell effects.
    pub fn aggregate(
        &self,
        aggregation: Aggregation,
        weighting: Weighting,
    ) -> Result<AggregationResult> {
        aggregate(&self.model, aggregation, weighting)
    }

    /// Wald test of equal effects across cohorts.
    pub fn test_treatment_heterogeneity(
        &self,
        config: &HeterogeneityConfig,
    ) -> Result<HeterogeneityTest> {
        test_treatment_heterogeneity(&self.model, config)
    }

    /// Sup-t simultaneous band.
    pub fn joint_confidence_band(&self, config: &JointBandConfig) -> Result<JointBand> {
        joint_confidence_band(&self.model, config)
    }

    /// Serialize the coefficient table as JSON.
    pub fn coefficients_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.coefficients()).map_err(Error::from)
    }
}
