//! Simultaneous (sup-t) confidence bands over event-study coefficients.
//!
//! The critical value is the `(1 − α)` quantile of `max_k |δ_k| / se_k`
//! across bootstrap replications. `δ` is either a multiplier-bootstrap
//! perturbation of the per-cluster scores or a Gaussian draw with the
//! estimated correlation. Replication `b` is seeded with `seed + b`, so
//! the band does not depend on how replications are scheduled on threads.
//!
//! # References
//!
//! - Montiel Olea & Plagborg-Møller (2019), "Simultaneous confidence bands:
//!   Theory, implementation, and an application to SVARs."
//! - Callaway & Sant'Anna (2021), multiplier bootstrap for uniform bands.

use std::fmt;
use std::str::FromStr;

use es_core::{Error, Result};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::adapter::EstimatedModel;
use super::design::EventWindow;
use super::linalg::psd_sqrt;
use super::multiplier::MultiplierWeights;
use crate::bootstrap_ci::{
    normal_interval, pointwise_critical_value, quantile_linear_sorted, validate_alpha,
};

/// Replication counts above this need `allow_large_replications`.
pub const MAX_REPLICATIONS: usize = 1_000_000;

/// How bootstrap deviations are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootstrapMethod {
    /// Cluster multiplier bootstrap on the fitted scores.
    Multiplier(MultiplierWeights),
    /// Gaussian draws with the estimated correlation matrix.
    Gaussian,
}

impl Default for BootstrapMethod {
    fn default() -> Self {
        BootstrapMethod::Multiplier(MultiplierWeights::default())
    }
}

impl FromStr for BootstrapMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gaussian" => Ok(BootstrapMethod::Gaussian),
            "multiplier" => Ok(BootstrapMethod::default()),
            other => other.parse::<MultiplierWeights>().map(BootstrapMethod::Multiplier).map_err(
                |_| Error::UnknownOption {
                    kind: "bootstrap method",
                    value: s.to_string(),
                    expected: "gaussian, multiplier, rademacher, mammen, webb, normal",
                },
            ),
        }
    }
}

impl fmt::Display for BootstrapMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapMethod::Multiplier(w) => write!(f, "multiplier({w})"),
            BootstrapMethod::Gaussian => f.write_str("gaussian"),
        }
    }
}

/// Options for [`joint_confidence_band`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointBandConfig {
    /// Joint miscoverage level.
    pub alpha: f64,
    /// Relative times covered by the band.
    pub window: EventWindow,
    /// Bootstrap replications (≥ 2).
    pub replications: usize,
    /// Base seed; drawn from the thread RNG when absent.
    pub seed: Option<u64>,
    /// Deviation generator.
    pub method: BootstrapMethod,
    /// Worker threads (`0` = Rayon's global pool).
    pub n_threads: usize,
    /// Permit more than [`MAX_REPLICATIONS`] replications.
    pub allow_large_replications: bool,
}

impl Default for JointBandConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            window: EventWindow::All,
            replications: 10_000,
            seed: None,
            method: BootstrapMethod::default(),
            n_threads: 1,
            allow_large_replications: false,
        }
    }
}

/// Band for one design column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandInterval {
    /// Design column index.
    pub column: usize,
    /// Adoption period of the cell.
    pub cohort: i64,
    /// Relative time of the cell.
    pub rel_time: i64,
    /// Point estimate.
    pub estimate: f64,
    /// Standard error.
    pub std_error: f64,
    /// `(lower, upper)`; `None` when the standard error is zero or the cell
    /// was not estimated.
    pub bounds: Option<(f64, f64)>,
}

/// Output of [`joint_confidence_band`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointBand {
    /// Joint miscoverage level.
    pub alpha: f64,
    /// Window the band covers.
    pub window: EventWindow,
    /// Deviation generator.
    pub method: BootstrapMethod,
    /// Critical value applied to every column.
    pub critical_value: f64,
    /// Raw bootstrap `(1 − α)` quantile of the sup-t statistic.
    pub bootstrap_quantile: f64,
    /// `z_{1−α/2}`.
    pub pointwise_critical_value: f64,
    /// Whether the pointwise value replaced a smaller bootstrap quantile.
    pub floored: bool,
    /// Replications drawn.
    pub replications: usize,
    /// Base seed actually used.
    pub seed: u64,
    /// One entry per column in the window, column order.
    pub intervals: Vec<BandInterval>,
    /// Columns in the window that have no band.
    pub undefined_columns: Vec<usize>,
}

impl JointBand {
    /// Interval for a given cell, if it is in the window.
    pub fn interval(&self, cohort: i64, rel_time: i64) -> Option<&BandInterval> {
        self.intervals.iter().find(|i| i.cohort == cohort && i.rel_time == rel_time)
    }
}

/// Per-replication sup-t statistic generator.
enum Draws {
    Multiplier { psi: DMatrix<f64>, scale_sqrt: f64, se: Vec<f64>, weights: MultiplierWeights },
    Gaussian { factor: DMatrix<f64> },
}

impl Draws {
    fn sup_t(&self, seed: u64) -> f64 {
        let mut rng = StdRng::seed_from_u64(seed);
        match self {
            Draws::Multiplier { psi, scale_sqrt, se, weights } => {
                let mut w = vec![0.0; psi.nrows()];
                weights.draw_into(&mut rng, &mut w);
                let w = DVector::from_vec(w);
                let delta = psi.tr_mul(&w);
                delta
                    .iter()
                    .zip(se)
                    .map(|(d, s)| (scale_sqrt * d).abs() / s)
                    .fold(0.0_f64, f64::max)
            }
            Draws::Gaussian { factor } => {
                let m = factor.ncols();
                let z = DVector::from_fn(m, |_, _| rng.sample::<f64, _>(StandardNormal));
                (factor * z).iter().map(|t| t.abs()).fold(0.0_f64, f64::max)
            }
        }
    }
}

/// Simultaneous confidence band over the columns in `config.window`.
///
/// # Errors
///
/// [`Error::Validation`] for a bad `alpha` or replication count, a missing
/// cluster influence under [`BootstrapMethod::Multiplier`], or when no
/// column in the window has a positive standard error.
/// [`Error::Computation`] if the thread pool cannot be created.
pub fn joint_confidence_band(
    model: &EstimatedModel,
    config: &JointBandConfig,
) -> Result<JointBand> {
    validate_alpha(config.alpha)?;
    if config.replications < 2 {
        return Err(Error::Validation(format!(
            "replications must be >= 2, got {}",
            config.replications
        )));
    }
    if config.replications > MAX_REPLICATIONS && !config.allow_large_replications {
        return Err(Error::Validation(format!(
            "replications = {} exceeds {MAX_REPLICATIONS}; set allow_large_replications to proceed",
            config.replications
        )));
    }

    let mut selected = Vec::new();
    let mut undefined_columns = Vec::new();
    for (j, col) in model.columns.iter().enumerate() {
        if !config.window.contains(col.rel_time) {
            continue;
        }
        let se = model.std_error(j);
        if model.estimable[j] && se.is_finite() && se > 0.0 {
            selected.push(j);
        } else {
            undefined_columns.push(j);
        }
    }
    if selected.is_empty() {
        return Err(Error::Validation(format!(
            "no column in window `{}` has a positive standard error",
            config.window
        )));
    }
    if !undefined_columns.is_empty() {
        log::warn!(
            "joint band: {} column(s) without a standard error left undefined",
            undefined_columns.len()
        );
    }
    let se: Vec<f64> = selected.iter().map(|&j| model.std_error(j)).collect();

    let draws = match config.method {
        BootstrapMethod::Multiplier(weights) => {
            let (psi_full, scale) = model.influence.as_ref().ok_or_else(|| {
                Error::Validation(
                    "multiplier bootstrap needs the fit's cluster influence; \
                     use BootstrapMethod::Gaussian with this fitter"
                        .into(),
                )
            })?;
            if psi_full.ncols() != model.n_columns() || psi_full.nrows() < 2 {
                return Err(Error::Validation(format!(
                    "cluster influence is {}x{}, expected G>=2 rows and {} columns",
                    psi_full.nrows(),
                    psi_full.ncols(),
                    model.n_columns()
                )));
            }
            let psi = psi_full.select_columns(selected.iter());
            Draws::Multiplier { psi, scale_sqrt: scale.max(0.0).sqrt(), se: se.clone(), weights }
        }
        BootstrapMethod::Gaussian => {
            let m = selected.len();
            let corr = DMatrix::from_fn(m, m, |a, b| {
                model.covariance[(selected[a], selected[b])] / (se[a] * se[b])
            });
            Draws::Gaussian { factor: psd_sqrt(&corr) }
        }
    };

    let seed = config.seed.unwrap_or_else(|| {
        let s = rand::rng().random::<u64>();
        log::debug!("joint band: no seed given, drew {s}");
        s
    });

    let run = || -> Vec<f64> {
        (0..config.replications)
            .into_par_iter()
            .map(|b| draws.sup_t(seed.wrapping_add(b as u64)))
            .collect()
    };
    let mut maxima = if config.n_threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.n_threads)
            .build()
            .map_err(|e| Error::Computation(format!("failed to create thread pool: {e}")))?;
        pool.install(run)
    } else {
        run()
    };
    maxima.sort_by(f64::total_cmp);

    let bootstrap_quantile = quantile_linear_sorted(&maxima, 1.0 - config.alpha);
    let z = pointwise_critical_value(config.alpha)?;
    let floored = bootstrap_quantile.is_nan() || bootstrap_quantile < z;
    let critical_value = if floored { z } else { bootstrap_quantile };

    let intervals = model
        .columns
        .iter()
        .enumerate()
        .filter(|(_, col)| config.window.contains(col.rel_time))
        .map(|(j, col)| {
            let estimate = model.coefficients[j];
            let std_error = model.std_error(j);
            let bounds = selected
                .binary_search(&j)
                .ok()
                .map(|_| normal_interval(estimate, std_error, critical_value));
            BandInterval {
                column: j,
                cohort: col.cohort,
                rel_time: col.rel_time,
                estimate,
                std_error,
                bounds,
            }
        })
        .collect();

    Ok(JointBand {
        alpha: config.alpha,
        window: config.window,
        method: config.method,
        critical_value,
        bootstrap_quantile,
        pointwise_critical_value: z,
        floored,
        replications: config.replications,
        seed,
        intervals,
        undefined_columns,
    })
}
