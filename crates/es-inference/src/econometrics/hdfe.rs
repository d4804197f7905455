//! Fixed-effects absorption via the Method of Alternating Projections (MAP).
//!
//! Used by the reference fitter to sweep unit and time effects out of the
//! outcome and every saturated indicator column before OLS. A symmetric
//! sweep `T = P_1 ⋯ P_D P_D ⋯ P_1` (each `P_d` demeans within the levels of
//! dimension `d`) is self-adjoint, so the fixed-effect component `z` of `v`
//! solves `(I − T) z = (I − T) v` and conjugate gradient applies. Every CG
//! iterate stays in `span(FE dummies)`, hence `v − z` stays in the affine
//! set `v − span(FE dummies)` and converges to the exact projection.
//! Balanced panels finish in one step.
//!
//! # References
//!
//! - Correia (2017), "Linear Models with High-Dimensional Fixed Effects:
//!   An Efficient and Feasible Estimator." Working paper.
//! - Gaure (2013), "OLS with multiple high dimensional category variables."
//!   *Computational Statistics & Data Analysis*.
//! - Hernández-Ramos, Escalante & Raydan (2011), "Unconstrained optimization
//!   techniques for the acceleration of alternating projection methods."

use es_core::{Error, Result};
use std::collections::HashSet;

/// Default convergence tolerance (CG residual norm relative to `‖v‖₂`).
pub(crate) const DEFAULT_TOL: f64 = 1e-13;

/// Safety bound on CG steps.
pub(crate) const DEFAULT_MAX_ITER: usize = 10_000;

/// Absorbs one or more fixed-effect dimensions from data vectors.
///
/// Each dimension maps observation index → 0-based level.
#[derive(Debug, Clone)]
pub struct FixedEffectsSolver {
    n: usize,
    /// level_of\[d\]\[i\] = level of observation i in dimension d.
    level_of: Vec<Vec<usize>>,
    n_levels: Vec<usize>,
    /// members\[d\]\[l\] = observations at level l of dimension d.
    members: Vec<Vec<Vec<usize>>>,
    tol: f64,
    max_iter: usize,
}

impl FixedEffectsSolver {
    /// Build a solver from per-dimension level vectors (all of length `n`).
    pub fn new(dimensions: Vec<Vec<usize>>) -> Result<Self> {
        let Some(first) = dimensions.first() else {
            return Err(Error::Validation("at least one fixed-effect dimension required".into()));
        };
        let n = first.len();
        if n == 0 {
            return Err(Error::Validation("fixed-effect dimensions must be non-empty".into()));
        }
        if let Some((d, dim)) = dimensions.iter().enumerate().find(|(_, v)| v.len() != n) {
            return Err(Error::Validation(format!(
                "fixed-effect dimension {d} has length {}, expected {n}",
                dim.len()
            )));
        }

        let mut n_levels = Vec::with_capacity(dimensions.len());
        let mut members = Vec::with_capacity(dimensions.len());
        for dim in &dimensions {
            let levels = dim.iter().copied().max().map_or(0, |m| m + 1);
            let mut lists: Vec<Vec<usize>> = vec![Vec::new(); levels];
            for (i, &l) in dim.iter().enumerate() {
                lists[l].push(i);
            }
            n_levels.push(lists.iter().filter(|l| !l.is_empty()).count());
            members.push(lists);
        }

        Ok(Self {
            n,
            level_of: dimensions,
            n_levels,
            members,
            tol: DEFAULT_TOL,
            max_iter: DEFAULT_MAX_ITER,
        })
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set maximum number of conjugate-gradient steps.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.n
    }

    /// Number of populated levels per dimension.
    pub fn levels(&self) -> &[usize] {
        &self.n_levels
    }

    /// Residual of `v` after projecting out every fixed-effect dimension.
    pub fn partial_out(&self, v: &[f64]) -> Result<Vec<f64>> {
        if v.len() != self.n {
            return Err(Error::Validation(format!(
                "vector length ({}) does not match observations ({})",
                v.len(),
                self.n
            )));
        }
        if self.level_of.len() == 1 {
            let mut resid = v.to_vec();
            self.sweep(&mut resid, 0);
            return Ok(resid);
        }

        let v_norm = dot(v, v).sqrt();
        if v_norm == 0.0 {
            return Ok(v.to_vec());
        }
        let threshold = self.tol * v_norm;

        // CG on (I − T) z = (I − T) v, starting from z = 0.
        let mut z = vec![0.0_f64; self.n];
        let mut r = self.complement(v);
        let mut p = r.clone();
        let mut rs = dot(&r, &r);
        let mut steps = 0;
        while rs.sqrt() > threshold {
            if steps == self.max_iter {
                log::warn!(
                    "fixed-effect absorption did not converge in {} steps (tol {:e})",
                    self.max_iter,
                    self.tol
                );
                break;
            }
            let ap = self.complement(&p);
            let curvature = dot(&p, &ap);
            if curvature <= 0.0 {
                break;
            }
            let alpha = rs / curvature;
            for ((zi, ri), (pi, api)) in z.iter_mut().zip(r.iter_mut()).zip(p.iter().zip(&ap)) {
                *zi += alpha * pi;
                *ri -= alpha * api;
            }
            let rs_next = dot(&r, &r);
            let beta = rs_next / rs;
            for (pi, ri) in p.iter_mut().zip(&r) {
                *pi = ri + beta * *pi;
            }
            rs = rs_next;
            steps += 1;
        }

        Ok(v.iter().zip(&z).map(|(vi, zi)| vi - zi).collect())
    }

    /// Partial out every column of a row-major `(n, k)` matrix.
    ///
    /// Returns the demeaned columns (column-major, one `Vec` per column).
    pub fn partial_out_columns(&self, x: &[f64], k: usize) -> Result<Vec<Vec<f64>>> {
        if x.len() != self.n * k {
            return Err(Error::Validation(format!(
                "design length ({}) != n*k ({})",
                x.len(),
                self.n * k
            )));
        }
        (0..k)
            .map(|j| {
                let col: Vec<f64> = (0..self.n).map(|i| x[i * k + j]).collect();
                self.partial_out(&col)
            })
            .collect()
    }

    /// Whether every level of dimension `d` falls inside a single cluster.
    ///
    /// Nested dimensions do not count against the CRV1 degrees of freedom.
    pub fn is_nested_in(&self, d: usize, clusters: &[usize]) -> bool {
        if clusters.len() != self.n {
            return false;
        }
        self.members[d]
            .iter()
            .filter(|obs| !obs.is_empty())
            .all(|obs| obs.iter().all(|&i| clusters[i] == clusters[obs[0]]))
    }

    /// Degrees of freedom absorbed by the fixed effects.
    ///
    /// - 1-way: `levels − 1`.
    /// - 2-way: `levels_0 + levels_1 − connected_components` (Union-Find).
    /// - k-way: `Σ levels − 1`, assuming a single component.
    pub fn degrees_of_freedom_absorbed(&self) -> usize {
        let total: usize = self.n_levels.iter().sum();
        let components = match self.level_of.len() {
            1 => 1,
            2 => self.connected_components_2way(),
            _ => 1,
        };
        total.saturating_sub(components)
    }

    fn sweep(&self, v: &mut [f64], d: usize) {
        for obs in &self.members[d] {
            if obs.is_empty() {
                continue;
            }
            let mean = obs.iter().map(|&i| v[i]).sum::<f64>() / obs.len() as f64;
            for &i in obs {
                v[i] -= mean;
            }
        }
    }

    /// `(I − T) v` for the symmetric sweep `T`.
    fn complement(&self, v: &[f64]) -> Vec<f64> {
        let mut t = v.to_vec();
        let dims = self.level_of.len();
        for d in (0..dims).chain((0..dims).rev()) {
            self.sweep(&mut t, d);
        }
        v.iter().zip(&t).map(|(vi, ti)| vi - ti).collect()
    }

    fn connected_components_2way(&self) -> usize {
        let n0 = self.members[0].len();
        let total = n0 + self.members[1].len();
        let mut parent: Vec<usize> = (0..total).collect();
        let mut rank = vec![0u8; total];

        for i in 0..self.n {
            uf_union(&mut parent, &mut rank, self.level_of[0][i], n0 + self.level_of[1][i]);
        }

        let mut roots = HashSet::new();
        for i in 0..self.n {
            roots.insert(uf_find(&mut parent, self.level_of[0][i]));
        }
        roots.len()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn uf_find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

fn uf_union(parent: &mut [usize], rank: &mut [u8], a: usize, b: usize) {
    let ra = uf_find(parent, a);
    let rb = uf_find(parent, b);
    if ra == rb {
        return;
    }
    match rank[ra].cmp(&rank[rb]) {
        std::cmp::Ordering::Less => parent[ra] = rb,
        std::cmp::Ordering::Greater => parent[rb] = ra,
        std::cmp::Ordering::Equal => {
            parent[rb] = ra;
            rank[ra] += 1;
        }
    }
}
