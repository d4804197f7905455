//! Aggregation of cohort × relative-time effects into summary estimates.
//!
//! Every summary is a linear combination `wᵗβ` of the saturated
//! coefficients, so its variance is `wᵗΣw` computed from the full
//! covariance matrix. Cross-cohort covariance is never dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use es_core::{Error, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::adapter::EstimatedModel;
use crate::bootstrap_ci::{normal_interval, pointwise_critical_value, two_sided_p_value};

/// Confidence level of the per-bucket intervals.
const CI_ALPHA: f64 = 0.05;

/// How cells are weighted inside a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Weighting {
    /// Proportional to the cell's observation count.
    #[default]
    Shares,
    /// Equal weight per contributing cohort, split evenly over that
    /// cohort's cells in the bucket.
    Simple,
}

impl FromStr for Weighting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "shares" => Ok(Weighting::Shares),
            "simple" => Ok(Weighting::Simple),
            _ => Err(Error::UnknownOption {
                kind: "weighting",
                value: s.to_string(),
                expected: "shares, simple",
            }),
        }
    }
}

impl fmt::Display for Weighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Weighting::Shares => "shares",
            Weighting::Simple => "simple",
        })
    }
}

/// Which cells are pooled together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    /// One estimate per relative time, across cohorts (dynamic profile).
    #[default]
    RelativeTime,
    /// One estimate per cohort, over its post-treatment cells.
    Cohort,
    /// A single estimate over every post-treatment cell (overall ATT).
    Pooled,
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "relative-time" | "period" => Ok(Aggregation::RelativeTime),
            "cohort" => Ok(Aggregation::Cohort),
            "pooled" | "att" => Ok(Aggregation::Pooled),
            _ => Err(Error::UnknownOption {
                kind: "aggregation",
                value: s.to_string(),
                expected: "relative-time, period, cohort, pooled, att",
            }),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Aggregation::RelativeTime => "relative-time",
            Aggregation::Cohort => "cohort",
            Aggregation::Pooled => "pooled",
        })
    }
}

/// Identifies one output bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationKey {
    /// Bucket for one relative time.
    RelativeTime(i64),
    /// Bucket for one adoption cohort.
    Cohort(i64),
    /// The single pooled bucket.
    Pooled,
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationKey::RelativeTime(r) => write!(f, "rel_time::{r}"),
            AggregationKey::Cohort(g) => write!(f, "cohort::{g}"),
            AggregationKey::Pooled => f.write_str("pooled"),
        }
    }
}

/// One aggregated estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateEstimate {
    /// Bucket identifier.
    pub key: AggregationKey,
    /// `wᵗβ`.
    pub estimate: f64,
    /// `sqrt(max(wᵗΣw, 0))`.
    pub std_error: f64,
    /// `estimate / std_error` (`NaN` when the standard error is zero).
    pub t_stat: f64,
    /// Two-sided normal p-value.
    pub p_value: f64,
    /// Lower bound of the pointwise 95% interval.
    pub ci_lower: f64,
    /// Upper bound of the pointwise 95% interval.
    pub ci_upper: f64,
    /// `(column, weight)` pairs; weights sum to 1.
    pub weights: Vec<(usize, f64)>,
    /// Whether a negative variance was clamped to zero.
    pub variance_clamped: bool,
}

/// Output of [`aggregate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    /// Aggregation that produced the buckets.
    pub aggregation: Aggregation,
    /// Weighting scheme used.
    pub weighting: Weighting,
    /// Buckets sorted by key.
    pub estimates: Vec<AggregateEstimate>,
    /// Non-estimable columns left out of their bucket.
    pub skipped_columns: Vec<usize>,
}

impl AggregationResult {
    /// Bucket with the given key, if present.
    pub fn get(&self, key: AggregationKey) -> Option<&AggregateEstimate> {
        self.estimates.iter().find(|e| e.key == key)
    }
}

/// Aggregate a fitted saturated model.
///
/// # Errors
///
/// [`Error::EmptyAggregation`] when no bucket has an estimable column.
pub fn aggregate(
    model: &EstimatedModel,
    aggregation: Aggregation,
    weighting: Weighting,
) -> Result<AggregationResult> {
    let mut buckets: BTreeMap<AggregationKey, Vec<usize>> = BTreeMap::new();
    let mut skipped_columns = Vec::new();

    for (j, col) in model.columns.iter().enumerate() {
        let key = match aggregation {
            Aggregation::RelativeTime => AggregationKey::RelativeTime(col.rel_time),
            Aggregation::Cohort if col.is_post() => AggregationKey::Cohort(col.cohort),
            Aggregation::Pooled if col.is_post() => AggregationKey::Pooled,
            _ => continue,
        };
        if model.estimable[j] {
            buckets.entry(key).or_default().push(j);
        } else {
            skipped_columns.push(j);
        }
    }

    if buckets.is_empty() {
        return Err(Error::EmptyAggregation { aggregation: aggregation.to_string() });
    }

    let crit = pointwise_critical_value(CI_ALPHA)?;
    let k = model.n_columns();
    let mut estimates = Vec::with_capacity(buckets.len());

    for (key, members) in buckets {
        let weights = bucket_weights(model, &members, weighting);

        let mut w = DVector::<f64>::zeros(k);
        let mut estimate = 0.0;
        for &(j, wj) in &weights {
            w[j] = wj;
            estimate += wj * model.coefficients[j];
        }

        let variance = w.dot(&(&model.covariance * &w));
        let variance_clamped = variance < 0.0;
        if variance_clamped {
            log::warn!("aggregate {key}: negative variance {variance:e} clamped to 0");
        }
        let std_error = variance.max(0.0).sqrt();
        let t_stat = if std_error > 0.0 { estimate / std_error } else { f64::NAN };
        let (ci_lower, ci_upper) = normal_interval(estimate, std_error, crit);

        estimates.push(AggregateEstimate {
            key,
            estimate,
            std_error,
            t_stat,
            p_value: two_sided_p_value(t_stat),
            ci_lower,
            ci_upper,
            weights,
            variance_clamped,
        });
    }

    Ok(AggregationResult { aggregation, weighting, estimates, skipped_columns })
}

/// Normalized weights for the estimable columns of one bucket.
fn bucket_weights(
    model: &EstimatedModel,
    members: &[usize],
    weighting: Weighting,
) -> Vec<(usize, f64)> {
    let raw: Vec<f64> = match weighting {
        Weighting::Shares => members.iter().map(|&j| model.columns[j].n_obs as f64).collect(),
        Weighting::Simple => {
            let mut cells_per_cohort: BTreeMap<i64, usize> = BTreeMap::new();
            for &j in members {
                *cells_per_cohort.entry(model.columns[j].cohort).or_default() += 1;
            }
            members
                .iter()
                .map(|&j| 1.0 / cells_per_cohort[&model.columns[j].cohort] as f64)
                .collect()
        }
    };
    let total: f64 = raw.iter().sum();
    if total > 0.0 {
        members.iter().zip(raw).map(|(&j, r)| (j, r / total)).collect()
    } else {
        let equal = 1.0 / members.len() as f64;
        members.iter().map(|&j| (j, equal)).collect()
    }
}
