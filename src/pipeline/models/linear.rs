//! Linear regression families: ordinary least squares, ridge and lasso.

use faer::Mat;

use super::Regressor;
use crate::pipeline::error::AnalysisError;
use crate::pipeline::linalg;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Penalty {
    None,
    /// L2 penalty `alpha * ||β||²`.
    Ridge(f64),
    /// L1 penalty in the `1/(2n) ||y - Xβ||² + alpha * ||β||₁` form.
    Lasso(f64),
}

/// Linear model with an unpenalized intercept.
#[derive(Debug, Clone)]
pub struct LinearModel {
    pub penalty: Penalty,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    max_iter: usize,
    tol: f64,
}

impl LinearModel {
    pub fn new(penalty: Penalty) -> Self {
        Self {
            penalty,
            coefficients: Vec::new(),
            intercept: 0.0,
            max_iter: 10_000,
            tol: 1e-8,
        }
    }

    pub fn ols() -> Self {
        Self::new(Penalty::None)
    }

    pub fn ridge(alpha: f64) -> Self {
        Self::new(Penalty::Ridge(alpha))
    }

    pub fn lasso(alpha: f64) -> Self {
        Self::new(Penalty::Lasso(alpha))
    }

    fn solve_normal_equations(
        &self,
        xc: &[Vec<f64>],
        yc: &[f64],
        alpha: f64,
    ) -> Result<Vec<f64>, AnalysisError> {
        let p = xc.first().map_or(0, Vec::len);
        let mut a: Mat<f64> = linalg::gram(xc, p, 1.0);
        for j in 0..p {
            a[(j, j)] += alpha;
        }
        let b: Vec<f64> = (0..p)
            .map(|j| xc.iter().zip(yc).map(|(row, y)| row[j] * y).sum())
            .collect();
        linalg::solve_symmetric(&a, &b, self.name())
    }

    fn coordinate_descent(
        &self,
        xc: &[Vec<f64>],
        yc: &[f64],
        alpha: f64,
    ) -> Result<Vec<f64>, AnalysisError> {
        let n = xc.len() as f64;
        let p = xc.first().map_or(0, Vec::len);
        let col_sq: Vec<f64> = (0..p)
            .map(|j| xc.iter().map(|row| row[j] * row[j]).sum::<f64>() / n)
            .collect();
        let mut beta = vec![0.0; p];
        let mut residual = yc.to_vec();

        for _ in 0..self.max_iter {
            let mut max_change: f64 = 0.0;
            for j in 0..p {
                if col_sq[j] <= f64::EPSILON {
                    continue;
                }
                let rho: f64 = xc
                    .iter()
                    .zip(&residual)
                    .map(|(row, r)| row[j] * (r + row[j] * beta[j]))
                    .sum::<f64>()
                    / n;
                let updated = soft_threshold(rho, alpha) / col_sq[j];
                let delta = updated - beta[j];
                if delta != 0.0 {
                    for (r, row) in residual.iter_mut().zip(xc) {
                        *r -= row[j] * delta;
                    }
                    beta[j] = updated;
                }
                max_change = max_change.max(delta.abs());
            }
            if max_change < self.tol {
                return Ok(beta);
            }
        }
        Err(AnalysisError::degenerate(
            self.name(),
            format!("coordinate descent did not converge in {} iterations", self.max_iter),
        ))
    }
}

fn soft_threshold(value: f64, lambda: f64) -> f64 {
    if value > lambda {
        value - lambda
    } else if value < -lambda {
        value + lambda
    } else {
        0.0
    }
}

fn column_means(x: &[Vec<f64>], p: usize) -> Vec<f64> {
    let n = x.len() as f64;
    (0..p).map(|j| x.iter().map(|row| row[j]).sum::<f64>() / n).collect()
}

impl Regressor for LinearModel {
    fn name(&self) -> &'static str {
        match self.penalty {
            Penalty::None => "linear",
            Penalty::Ridge(_) => "ridge",
            Penalty::Lasso(_) => "lasso",
        }
    }

    fn is_linear(&self) -> bool {
        true
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), AnalysisError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(AnalysisError::insufficient(format!(
                "{} training rows for {} targets",
                x.len(),
                y.len()
            )));
        }
        if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
            return Err(AnalysisError::degenerate(self.name(), "non-finite training values"));
        }
        let p = x[0].len();
        let x_mean = column_means(x, p);
        let y_mean = y.iter().sum::<f64>() / y.len() as f64;
        let xc: Vec<Vec<f64>> = x
            .iter()
            .map(|row| row.iter().zip(&x_mean).map(|(v, m)| v - m).collect())
            .collect();
        let yc: Vec<f64> = y.iter().map(|v| v - y_mean).collect();

        let beta = match self.penalty {
            Penalty::None => self.solve_normal_equations(&xc, &yc, 0.0)?,
            Penalty::Ridge(alpha) => self.solve_normal_equations(&xc, &yc, alpha)?,
            Penalty::Lasso(alpha) => self.coordinate_descent(&xc, &yc, alpha)?,
        };
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(AnalysisError::degenerate(self.name(), "non-finite coefficients"));
        }

        self.intercept = y_mean - beta.iter().zip(&x_mean).map(|(b, m)| b * m).sum::<f64>();
        self.coefficients = beta;
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                self.intercept
                    + row
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(v, b)| v * b)
                        .sum::<f64>()
            })
            .collect()
    }

    fn coefficients(&self) -> Option<Vec<f64>> {
        Some(self.coefficients.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn design() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![i as f64, ((i * 7) % 11) as f64])
            .collect();
        let y = x.iter().map(|r| 3.0 + 2.0 * r[0] - 0.5 * r[1]).collect();
        (x, y)
    }

    #[test]
    fn test_ols_recovers_exact_coefficients() {
        let (x, y) = design();
        let mut model = LinearModel::ols();
        model.fit(&x, &y).unwrap();
        assert!((model.coefficients[0] - 2.0).abs() < 1e-8);
        assert!((model.coefficients[1] + 0.5).abs() < 1e-8);
        assert!((model.intercept - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_ridge_shrinks_coefficients() {
        let (x, y) = design();
        let mut ridge = LinearModel::ridge(1_000.0);
        ridge.fit(&x, &y).unwrap();
        assert!(ridge.coefficients[0].abs() < 2.0);
    }

    #[test]
    fn test_lasso_zeroes_weak_feature_under_heavy_penalty() {
        let (x, y) = design();
        let mut lasso = LinearModel::lasso(20.0);
        lasso.fit(&x, &y).unwrap();
        assert_eq!(lasso.coefficients[1], 0.0);
        assert!(lasso.coefficients[0] > 0.0);
    }

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
    }
}
