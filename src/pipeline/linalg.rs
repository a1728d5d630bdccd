//! Dense linear algebra on top of faer: Gram products, symmetric
//! eigendecompositions and a pseudo-inverse solver for normal equations.

use faer::{Mat, Side};

use super::error::AnalysisError;

/// Build an `n_rows x n_cols` faer matrix from row-major data.
pub fn to_mat(rows: &[Vec<f64>], n_cols: usize) -> Mat<f64> {
    let mut m = Mat::<f64>::zeros(rows.len(), n_cols);
    for (i, row) in rows.iter().enumerate() {
        for (j, &v) in row.iter().enumerate().take(n_cols) {
            m[(i, j)] = v;
        }
    }
    m
}

/// Gram matrix `XᵀX` scaled by `scale`.
pub fn gram(rows: &[Vec<f64>], n_cols: usize, scale: f64) -> Mat<f64> {
    let x = to_mat(rows, n_cols);
    let mut g = x.transpose() * &x;
    for i in 0..n_cols {
        for j in 0..n_cols {
            g[(i, j)] *= scale;
        }
    }
    g
}

/// Eigenpairs of a symmetric matrix, sorted by eigenvalue descending.
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    pub values: Vec<f64>,
    /// `vectors[k]` is the unit eigenvector of `values[k]`.
    pub vectors: Vec<Vec<f64>>,
}

pub fn symmetric_eigen(m: &Mat<f64>, context: &str) -> Result<SymmetricEigen, AnalysisError> {
    let n = m.nrows();
    if n == 0 || n != m.ncols() {
        return Err(AnalysisError::degenerate(context, "matrix is empty or not square"));
    }
    for i in 0..n {
        for j in 0..n {
            if !m[(i, j)].is_finite() {
                return Err(AnalysisError::degenerate(context, "matrix has non-finite entries"));
            }
        }
    }

    let evd = m.selfadjoint_eigendecomposition(Side::Lower);
    let s = evd.s().column_vector();
    let u = evd.u();

    let mut pairs: Vec<(f64, Vec<f64>)> = (0..n)
        .map(|k| {
            let vector: Vec<f64> = (0..n).map(|r| u.read(r, k)).collect();
            (s.read(k), vector)
        })
        .collect();
    if pairs.iter().any(|(v, _)| !v.is_finite()) {
        return Err(AnalysisError::degenerate(context, "eigendecomposition did not converge"));
    }
    pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let (values, vectors) = pairs.into_iter().unzip();
    Ok(SymmetricEigen { values, vectors })
}

/// Solve `A x = b` for symmetric positive semi-definite `A` through the
/// eigen pseudo-inverse. Directions with eigenvalues below `1e-10 * λ_max`
/// are treated as null space.
pub fn solve_symmetric(a: &Mat<f64>, b: &[f64], context: &str) -> Result<Vec<f64>, AnalysisError> {
    let n = a.nrows();
    if b.len() != n {
        return Err(AnalysisError::degenerate(context, "dimension mismatch"));
    }
    let eig = symmetric_eigen(a, context)?;
    let lambda_max = eig.values.first().copied().unwrap_or(0.0);
    if lambda_max <= 0.0 {
        return Err(AnalysisError::degenerate(context, "singular system"));
    }
    let tol = lambda_max * 1e-10;

    let mut x = vec![0.0; n];
    for (lambda, v) in eig.values.iter().zip(&eig.vectors) {
        if *lambda <= tol {
            continue;
        }
        let proj: f64 = v.iter().zip(b).map(|(vi, bi)| vi * bi).sum::<f64>() / lambda;
        for (xi, vi) in x.iter_mut().zip(v) {
            *xi += proj * vi;
        }
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eigen_sorted_descending() {
        let mut m = Mat::<f64>::zeros(2, 2);
        m[(0, 0)] = 2.0;
        m[(0, 1)] = 1.0;
        m[(1, 0)] = 1.0;
        m[(1, 1)] = 2.0;
        let eig = symmetric_eigen(&m, "test").unwrap();
        assert!((eig.values[0] - 3.0).abs() < 1e-10);
        assert!((eig.values[1] - 1.0).abs() < 1e-10);
        let v = &eig.vectors[0];
        assert!((v[0].abs() - v[1].abs()).abs() < 1e-10);
    }

    #[test]
    fn test_solve_diagonal_system() {
        let mut m = Mat::<f64>::zeros(2, 2);
        m[(0, 0)] = 4.0;
        m[(1, 1)] = 2.0;
        let x = solve_symmetric(&m, &[8.0, 2.0], "test").unwrap();
        assert!((x[0] - 2.0).abs() < 1e-10);
        assert!((x[1] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_gram_matches_manual_product() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let g = gram(&rows, 2, 1.0);
        assert_eq!(g[(0, 0)], 10.0);
        assert_eq!(g[(0, 1)], 14.0);
        assert_eq!(g[(1, 1)], 20.0);
    }

    #[test]
    fn test_non_finite_matrix_is_degenerate() {
        let mut m = Mat::<f64>::zeros(1, 1);
        m[(0, 0)] = f64::NAN;
        assert!(symmetric_eigen(&m, "nan").is_err());
    }
}
