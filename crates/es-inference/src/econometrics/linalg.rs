//! Small dense linear-algebra helpers shared by the fitter and the tests.
//!
//! Everything here works on symmetric matrices (`X'X`, covariance blocks,
//! restriction covariances), so decompositions go through Cholesky pivots or
//! `SymmetricEigen` rather than general LU.

use nalgebra::DMatrix;

/// Diagonal entries below this fraction of the largest diagonal are treated
/// as numerically zero columns.
const ZERO_DIAG_REL: f64 = 1e-14;

/// Indices of columns that are (near-)linear combinations of earlier ones.
///
/// Runs a left-to-right Cholesky factorization of the Gram matrix `xtx` and
/// rejects column `j` when its pivot `d_j = A_jj − Σ L_jp²` falls below
/// `tol · A_jj`, i.e. when the column's R² on the previously accepted
/// columns exceeds `1 − tol`. Earlier columns always win, so the result is
/// deterministic in column order.
pub fn collinear_columns(xtx: &DMatrix<f64>, tol: f64) -> Vec<usize> {
    let k = xtx.nrows();
    let max_diag = (0..k).map(|j| xtx[(j, j)]).fold(0.0_f64, f64::max);
    let mut l = DMatrix::<f64>::zeros(k, k);
    let mut accepted = vec![false; k];
    let mut rejected = Vec::new();

    for j in 0..k {
        let ajj = xtx[(j, j)];
        if !ajj.is_finite() || ajj <= ZERO_DIAG_REL * max_diag || ajj <= 0.0 {
            rejected.push(j);
            continue;
        }
        let mut pivot = ajj;
        for p in (0..j).filter(|&p| accepted[p]) {
            pivot -= l[(j, p)] * l[(j, p)];
        }
        if pivot <= tol * ajj {
            rejected.push(j);
            continue;
        }
        let ljj = pivot.sqrt();
        l[(j, j)] = ljj;
        for i in (j + 1)..k {
            let mut s = xtx[(i, j)];
            for p in (0..j).filter(|&p| accepted[p]) {
                s -= l[(i, p)] * l[(j, p)];
            }
            l[(i, j)] = s / ljj;
        }
        accepted[j] = true;
    }
    rejected
}

/// Moore–Penrose inverse of a symmetric PSD matrix with its effective rank.
#[derive(Debug, Clone)]
pub struct PseudoInverse {
    /// The (pseudo-)inverse.
    pub matrix: DMatrix<f64>,
    /// Number of eigenvalues kept.
    pub rank: usize,
    /// Dimension of the input.
    pub dim: usize,
}

impl PseudoInverse {
    /// True when every eigenvalue was kept (ordinary inverse).
    pub fn is_full_rank(&self) -> bool {
        self.rank == self.dim
    }
}

/// Eigen-based pseudo-inverse keeping eigenvalues above `rel_tol · λ_max`.
pub fn symmetric_pseudo_inverse(m: &DMatrix<f64>, rel_tol: f64) -> PseudoInverse {
    let dim = m.nrows();
    let eig = symmetrize(m).symmetric_eigen();
    let lambda_max = eig.eigenvalues.iter().copied().fold(0.0_f64, f64::max);
    let cutoff = rel_tol * lambda_max;

    let mut matrix = DMatrix::<f64>::zeros(dim, dim);
    let mut rank = 0usize;
    if lambda_max > 0.0 {
        for (i, &lambda) in eig.eigenvalues.iter().enumerate() {
            if lambda > cutoff {
                let v = eig.eigenvectors.column(i);
                matrix += (v * v.transpose()) / lambda;
                rank += 1;
            }
        }
    }
    PseudoInverse { matrix, rank, dim }
}

/// Square-root factor `L` with `L Lᵗ = m`, clipping negative eigenvalues.
pub fn psd_sqrt(m: &DMatrix<f64>) -> DMatrix<f64> {
    let eig = symmetrize(m).symmetric_eigen();
    let mut factor = eig.eigenvectors.clone();
    for (j, &lambda) in eig.eigenvalues.iter().enumerate() {
        let s = lambda.max(0.0).sqrt();
        factor.column_mut(j).scale_mut(s);
    }
    factor
}

/// `(m + mᵗ) / 2`.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}
