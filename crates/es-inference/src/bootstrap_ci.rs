//! Quantile and normal-reference utilities shared by the inference layer.
//!
//! This module provides:
//! - linear-interpolation quantiles of bootstrap draws,
//! - two-sided normal critical values and p-values,
//! - pointwise normal intervals.

use es_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, Normal};

const PROB_EPS: f64 = 1e-12;

#[inline]
fn clip_prob(p: f64) -> f64 {
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

#[inline]
fn inv_norm_cdf(p: f64) -> f64 {
    Normal::standard().inverse_cdf(clip_prob(p))
}

#[inline]
fn norm_cdf(z: f64) -> f64 {
    Normal::standard().cdf(z)
}

/// Quantile for sorted data via linear interpolation.
///
/// - `q=0` returns min
/// - `q=1` returns max
/// - empty input returns `NaN`
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let i = pos.floor() as usize;
    let j = pos.ceil() as usize;
    if i == j {
        return sorted[i];
    }
    let t = pos - i as f64;
    (1.0 - t) * sorted[i] + t * sorted[j]
}

/// Check that `alpha` is a usable significance level.
pub fn validate_alpha(alpha: f64) -> Result<()> {
    if !(alpha.is_finite() && alpha > 0.0 && alpha < 1.0) {
        return Err(Error::Validation(format!("alpha must be in (0,1), got {alpha}")));
    }
    Ok(())
}

/// Two-sided standard-normal critical value `z_{1−α/2}`.
pub fn pointwise_critical_value(alpha: f64) -> Result<f64> {
    validate_alpha(alpha)?;
    Ok(inv_norm_cdf(1.0 - alpha / 2.0))
}

/// Two-sided normal p-value `2·(1 − Φ(|z|))`. `NaN` in, `NaN` out.
pub fn two_sided_p_value(z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    (2.0 * (1.0 - norm_cdf(z.abs()))).clamp(0.0, 1.0)
}

/// Symmetric interval `estimate ± crit · se`.
#[inline]
pub fn normal_interval(estimate: f64, std_error: f64, crit: f64) -> (f64, f64) {
    (estimate - crit * std_error, estimate + crit * std_error)
}
