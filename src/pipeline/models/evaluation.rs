//! Generalization diagnostics shared by every model family: k-fold
//! cross-validation, a held-out split, leave-one-out and permutation importance.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;

use super::{ModelFamily, Regressor};
use crate::pipeline::error::AnalysisError;
use crate::pipeline::stats;

#[derive(Debug, Clone, Serialize)]
pub struct CrossValidation {
    pub n_folds: usize,
    pub r2_mean: f64,
    pub r2_std: f64,
    pub mae_mean: f64,
    pub mae_std: f64,
    /// Per-fold R²; folds with a constant held-out target have none.
    pub fold_r2: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldoutScores {
    pub n_train: usize,
    pub n_test: usize,
    pub train_r2: f64,
    pub test_r2: f64,
    /// `train_r2 - test_r2`; large positive values signal over-fitting.
    pub overfit_gap: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LooScores {
    pub n: usize,
    pub r2: f64,
    pub mae: f64,
}

fn take_rows(x: &[Vec<f64>], y: &[f64], idx: &[usize]) -> (Vec<Vec<f64>>, Vec<f64>) {
    (
        idx.iter().map(|&i| x[i].clone()).collect(),
        idx.iter().map(|&i| y[i]).collect(),
    )
}

/// Contiguous, unshuffled folds; the first `n % k` folds get one extra row.
pub fn kfold_ranges(n: usize, k: usize) -> Vec<Range<usize>> {
    let k = k.clamp(1, n.max(1));
    let base = n / k;
    let extra = n % k;
    let mut start = 0;
    (0..k)
        .map(|f| {
            let len = base + usize::from(f < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

pub fn cross_validate(
    family: ModelFamily,
    seed: u64,
    x: &[Vec<f64>],
    y: &[f64],
    k: usize,
) -> Result<CrossValidation, AnalysisError> {
    if k < 2 || x.len() < k {
        return Err(AnalysisError::insufficient(format!(
            "{} rows cannot form {} folds",
            x.len(),
            k
        )));
    }
    let folds = kfold_ranges(x.len(), k);
    let mut fold_r2 = Vec::with_capacity(folds.len());
    let mut maes = Vec::with_capacity(folds.len());

    for fold in &folds {
        let train_idx: Vec<usize> = (0..x.len()).filter(|i| !fold.contains(i)).collect();
        let test_idx: Vec<usize> = fold.clone().collect();
        let (x_train, y_train) = take_rows(x, y, &train_idx);
        let (x_test, y_test) = take_rows(x, y, &test_idx);

        let mut model = family.build(seed);
        model.fit(&x_train, &y_train)?;
        let predicted = model.predict(&x_test);
        fold_r2.push(stats::r2_score(&y_test, &predicted));
        if let Some(mae) = stats::mean_absolute_error(&y_test, &predicted) {
            maes.push(mae);
        }
    }

    let scored: Vec<f64> = fold_r2.iter().flatten().copied().collect();
    let r2_mean = stats::mean(&scored).ok_or_else(|| {
        AnalysisError::degenerate(family.name(), "no fold had a non-constant held-out target")
    })?;
    Ok(CrossValidation {
        n_folds: folds.len(),
        r2_mean,
        r2_std: stats::std_dev(&scored, 0).unwrap_or(0.0),
        mae_mean: stats::mean(&maes).unwrap_or(f64::NAN),
        mae_std: stats::std_dev(&maes, 0).unwrap_or(0.0),
        fold_r2,
    })
}

/// Seeded shuffled split with `ceil(test_fraction * n)` test rows.
pub fn holdout_split(
    family: ModelFamily,
    seed: u64,
    x: &[Vec<f64>],
    y: &[f64],
    test_fraction: f64,
) -> Result<HoldoutScores, AnalysisError> {
    let n = x.len();
    let n_test = ((n as f64) * test_fraction).ceil() as usize;
    if n_test < 2 || n - n_test < 2 {
        return Err(AnalysisError::insufficient(format!(
            "{} rows are too few for a {:.0}% held-out split",
            n,
            test_fraction * 100.0
        )));
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let (test_idx, train_idx) = order.split_at(n_test);
    let (x_train, y_train) = take_rows(x, y, train_idx);
    let (x_test, y_test) = take_rows(x, y, test_idx);

    let mut model = family.build(seed);
    model.fit(&x_train, &y_train)?;
    let train_r2 = stats::r2_score(&y_train, &model.predict(&x_train))
        .ok_or_else(|| AnalysisError::degenerate(family.name(), "constant training target"))?;
    let test_r2 = stats::r2_score(&y_test, &model.predict(&x_test))
        .ok_or_else(|| AnalysisError::degenerate(family.name(), "constant held-out target"))?;

    Ok(HoldoutScores {
        n_train: train_idx.len(),
        n_test,
        train_r2,
        test_r2,
        overfit_gap: train_r2 - test_r2,
    })
}

/// Aggregate R² and MAE over every held-out singleton prediction.
pub fn leave_one_out(
    family: ModelFamily,
    seed: u64,
    x: &[Vec<f64>],
    y: &[f64],
) -> Result<LooScores, AnalysisError> {
    let predictions = (0..x.len())
        .into_par_iter()
        .map(|held| -> Result<f64, AnalysisError> {
            let train_idx: Vec<usize> = (0..x.len()).filter(|&i| i != held).collect();
            let (x_train, y_train) = take_rows(x, y, &train_idx);
            let mut model = family.build(seed);
            model.fit(&x_train, &y_train)?;
            Ok(model.predict(std::slice::from_ref(&x[held]))[0])
        })
        .collect::<Result<Vec<f64>, AnalysisError>>()?;

    let r2 = stats::r2_score(y, &predictions)
        .ok_or_else(|| AnalysisError::degenerate(family.name(), "constant target"))?;
    let mae = stats::mean_absolute_error(y, &predictions)
        .ok_or_else(|| AnalysisError::insufficient("no leave-one-out predictions"))?;
    Ok(LooScores {
        n: x.len(),
        r2,
        mae,
    })
}

/// Mean drop in R² when each feature column is shuffled, over `repeats` shuffles.
pub fn permutation_importance(
    model: &dyn Regressor,
    x: &[Vec<f64>],
    y: &[f64],
    repeats: usize,
    seed: u64,
) -> Result<Vec<f64>, AnalysisError> {
    let baseline = stats::r2_score(y, &model.predict(x))
        .ok_or_else(|| AnalysisError::degenerate(model.name(), "constant target"))?;
    let n_features = x.first().map_or(0, Vec::len);

    Ok((0..n_features)
        .into_par_iter()
        .map(|j| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(j as u64));
            let mut column: Vec<f64> = x.iter().map(|row| row[j]).collect();
            let mut drops = Vec::with_capacity(repeats);
            for _ in 0..repeats {
                column.shuffle(&mut rng);
                let permuted: Vec<Vec<f64>> = x
                    .iter()
                    .zip(&column)
                    .map(|(row, &v)| {
                        let mut row = row.clone();
                        row[j] = v;
                        row
                    })
                    .collect();
                if let Some(score) = stats::r2_score(y, &model.predict(&permuted)) {
                    drops.push(baseline - score);
                }
            }
            stats::mean(&drops).unwrap_or(0.0)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_data(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![i as f64, ((i * 5) % 7) as f64])
            .collect();
        let y = x.iter().map(|r| 1.0 + 3.0 * r[0] + r[1]).collect();
        (x, y)
    }

    #[test]
    fn test_kfold_ranges_cover_all_rows() {
        let folds = kfold_ranges(12, 5);
        assert_eq!(folds.len(), 5);
        assert_eq!(folds[0], 0..3);
        assert_eq!(folds[1], 3..6);
        assert_eq!(folds[4], 10..12);
        assert_eq!(folds.iter().map(|f| f.len()).sum::<usize>(), 12);
    }

    #[test]
    fn test_cross_validation_of_exact_linear_relation() {
        let (x, y) = linear_data(20);
        let cv = cross_validate(ModelFamily::Linear, 42, &x, &y, 5).unwrap();
        assert_eq!(cv.n_folds, 5);
        assert!(cv.r2_mean > 0.999);
        assert!(cv.mae_mean < 1e-6);
    }

    #[test]
    fn test_holdout_sizes() {
        let (x, y) = linear_data(16);
        let scores = holdout_split(ModelFamily::Ridge, 42, &x, &y, 0.2).unwrap();
        assert_eq!(scores.n_test, 4);
        assert_eq!(scores.n_train, 12);
        assert!((scores.overfit_gap - (scores.train_r2 - scores.test_r2)).abs() < 1e-12);
    }

    #[test]
    fn test_loo_and_permutation_importance() {
        let (x, y) = linear_data(15);
        let loo = leave_one_out(ModelFamily::Linear, 42, &x, &y).unwrap();
        assert_eq!(loo.n, 15);
        assert!(loo.r2 > 0.999);

        let mut model = ModelFamily::Linear.build(42);
        model.fit(&x, &y).unwrap();
        let importance = permutation_importance(model.as_ref(), &x, &y, 10, 42).unwrap();
        assert!(importance[0] > importance[1]);
    }
}
