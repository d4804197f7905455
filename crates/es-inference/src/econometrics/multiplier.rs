//! Multiplier distributions for the cluster wild bootstrap.
//!
//! Each distribution has mean 0 and variance 1, so the perturbed score sum
//! `Σ_g w_g ψ_g` reproduces the cluster-robust covariance in expectation.

use std::fmt;
use std::str::FromStr;

use es_core::{Error, Result};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Distribution of the per-cluster multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiplierWeights {
    /// ±1 with equal probability.
    #[default]
    Rademacher,
    /// Mammen's two-point distribution (`E[w³] = 1`).
    Mammen,
    /// Webb's six-point distribution, useful with few clusters.
    Webb,
    /// Standard normal multipliers.
    Normal,
}

const SQRT5: f64 = 2.236_067_977_499_79;

const WEBB_TABLE: [f64; 6] = [
    -1.224_744_871_391_589,
    -1.0,
    -std::f64::consts::FRAC_1_SQRT_2,
    std::f64::consts::FRAC_1_SQRT_2,
    1.0,
    1.224_744_871_391_589,
];

impl MultiplierWeights {
    /// Draw one multiplier.
    #[inline]
    pub fn draw<R: Rng + ?Sized>(self, rng: &mut R) -> f64 {
        match self {
            MultiplierWeights::Rademacher => {
                if rng.random::<bool>() {
                    1.0
                } else {
                    -1.0
                }
            }
            MultiplierWeights::Mammen => {
                let prob_neg = (SQRT5 + 1.0) / (2.0 * SQRT5);
                if rng.random::<f64>() < prob_neg {
                    -(SQRT5 - 1.0) / 2.0
                } else {
                    (SQRT5 + 1.0) / 2.0
                }
            }
            MultiplierWeights::Webb => WEBB_TABLE[rng.random_range(0..6)],
            MultiplierWeights::Normal => rng.sample::<f64, _>(StandardNormal),
        }
    }

    /// Fill `out` with independent multipliers.
    pub fn draw_into<R: Rng + ?Sized>(self, rng: &mut R, out: &mut [f64]) {
        for w in out.iter_mut() {
            *w = self.draw(rng);
        }
    }
}

impl FromStr for MultiplierWeights {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rademacher" => Ok(MultiplierWeights::Rademacher),
            "mammen" => Ok(MultiplierWeights::Mammen),
            "webb" => Ok(MultiplierWeights::Webb),
            "normal" | "gaussian" => Ok(MultiplierWeights::Normal),
            _ => Err(Error::UnknownOption {
                kind: "multiplier weights",
                value: s.to_string(),
                expected: "rademacher, mammen, webb, normal",
            }),
        }
    }
}

impl fmt::Display for MultiplierWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MultiplierWeights::Rademacher => "rademacher",
            MultiplierWeights::Mammen => "mammen",
            MultiplierWeights::Webb => "webb",
            MultiplierWeights::Normal => "normal",
        })
    }
}
