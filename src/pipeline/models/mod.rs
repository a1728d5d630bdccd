//! Predictive modeling of a target pollutant from explanatory features,
//! with cross-validated generalization diagnostics and a consolidated
//! feature-importance ranking.

mod evaluation;
mod linear;
mod tree;

pub use evaluation::{
    cross_validate, holdout_split, kfold_ranges, leave_one_out, permutation_importance,
    CrossValidation, HoldoutScores, LooScores,
};
pub use linear::{LinearModel, Penalty};
pub use tree::{GradientBoosting, RandomForest, RegressionTree};

use rayon::prelude::*;
use serde::Serialize;

use super::catalog;
use super::config::AnalysisConfig;
use super::error::{Analysis, AnalysisError};
use super::fusion::FusedTable;
use super::matrix::{self, DroppedColumn, FeatureMatrix};
use super::stats;

pub const MIN_ROWS: usize = 10;
/// Rows needed for the held-out split and leave-one-out.
pub const MIN_ROWS_DIAGNOSTICS: usize = 15;
pub const MIN_FEATURE_VALUES: usize = 5;
pub const MAX_FOLDS: usize = 5;
pub const TEST_FRACTION: f64 = 0.2;
pub const PERMUTATION_REPEATS: usize = 10;
pub const TOP_RESIDUALS: usize = 5;

/// A regression model fit on a dense row-major design matrix.
pub trait Regressor: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), AnalysisError>;

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64>;

    fn is_linear(&self) -> bool {
        false
    }

    /// Fitted coefficients, for linear models.
    fn coefficients(&self) -> Option<Vec<f64>> {
        None
    }

    /// Normalized impurity-decrease importances, for tree ensembles.
    fn impurity_importances(&self) -> Option<Vec<f64>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Linear,
    Ridge,
    Lasso,
    RandomForest,
    GradientBoosting,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 5] = [
        ModelFamily::Linear,
        ModelFamily::Ridge,
        ModelFamily::Lasso,
        ModelFamily::RandomForest,
        ModelFamily::GradientBoosting,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelFamily::Linear => "linear",
            ModelFamily::Ridge => "ridge",
            ModelFamily::Lasso => "lasso",
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::GradientBoosting => "gradient_boosting",
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(
            self,
            ModelFamily::Linear | ModelFamily::Ridge | ModelFamily::Lasso
        )
    }

    /// Fresh, unfitted model with the default hyper-parameters of this family.
    pub fn build(&self, seed: u64) -> Box<dyn Regressor> {
        match self {
            ModelFamily::Linear => Box::new(LinearModel::ols()),
            ModelFamily::Ridge => Box::new(LinearModel::ridge(1.0)),
            ModelFamily::Lasso => Box::new(LinearModel::lasso(0.1)),
            ModelFamily::RandomForest => Box::new(RandomForest::new(100, 5, seed)),
            ModelFamily::GradientBoosting => Box::new(GradientBoosting::new(100, 0.1, 3)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryResidual {
    pub country: String,
    pub actual: f64,
    pub predicted: f64,
    /// `actual - predicted`
    pub residual: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEvaluation {
    pub model_name: String,
    pub cross_validation: CrossValidation,
    pub holdout: Analysis<HoldoutScores>,
    pub loo: Analysis<LooScores>,
    /// Residuals of the model fit on all rows, largest absolute value first.
    pub residuals_by_country: Vec<CountryResidual>,
}

impl ModelEvaluation {
    pub fn train_score(&self) -> Option<f64> {
        self.holdout.value().map(|h| h.train_r2)
    }

    pub fn test_score(&self) -> Option<f64> {
        self.holdout.value().map(|h| h.test_r2)
    }

    pub fn cross_val_mean(&self) -> f64 {
        self.cross_validation.r2_mean
    }

    pub fn cross_val_std(&self) -> f64 {
        self.cross_validation.r2_std
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedModel {
    pub model_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResidualReport {
    pub model_name: String,
    pub mean: f64,
    pub std: f64,
    /// Countries with the largest absolute residuals.
    pub largest: Vec<CountryResidual>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub label: String,
    /// |coefficient| of the linear model on standardized features.
    pub linear_coefficient: Option<f64>,
    pub impurity: Option<f64>,
    pub permutation: Option<f64>,
    /// Mean of the per-method ranks (1 = most important).
    pub mean_rank: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelingReport {
    pub target: String,
    pub n_rows: usize,
    pub features: Vec<String>,
    pub dropped_features: Vec<DroppedColumn>,
    pub evaluations: Vec<ModelEvaluation>,
    pub skipped: Vec<SkippedModel>,
    /// Family with the highest cross-validated R².
    pub best_model: Option<String>,
    pub residuals: Analysis<ResidualReport>,
    pub importance: Analysis<Vec<FeatureImportance>>,
}

struct FittedFamily {
    evaluation: ModelEvaluation,
    model: Box<dyn Regressor>,
}

fn evaluate_family(
    family: ModelFamily,
    matrix: &FeatureMatrix,
    y: &[f64],
    seed: u64,
) -> Result<FittedFamily, AnalysisError> {
    let x = &matrix.data;
    let n = x.len();
    let cross_validation = cross_validate(family, seed, x, y, MAX_FOLDS.min(n - 1))?;

    let holdout = if n >= MIN_ROWS_DIAGNOSTICS {
        holdout_split(family, seed, x, y, TEST_FRACTION).into()
    } else {
        Analysis::unavailable(format!(
            "held-out split needs at least {} rows, have {}",
            MIN_ROWS_DIAGNOSTICS, n
        ))
    };
    let loo = if !family.is_linear() {
        Analysis::unavailable("leave-one-out is run for linear-family models only")
    } else if n < MIN_ROWS_DIAGNOSTICS {
        Analysis::unavailable(format!(
            "leave-one-out needs at least {} rows, have {}",
            MIN_ROWS_DIAGNOSTICS, n
        ))
    } else {
        leave_one_out(family, seed, x, y).into()
    };

    let mut model = family.build(seed);
    model.fit(x, y)?;
    let predicted = model.predict(x);
    let mut residuals_by_country: Vec<CountryResidual> = matrix
        .row_keys
        .iter()
        .zip(y.iter().zip(&predicted))
        .map(|(country, (&actual, &predicted))| CountryResidual {
            country: country.clone(),
            actual,
            predicted,
            residual: actual - predicted,
        })
        .collect();
    residuals_by_country.sort_by(|a, b| b.residual.abs().total_cmp(&a.residual.abs()));

    Ok(FittedFamily {
        evaluation: ModelEvaluation {
            model_name: family.name().to_string(),
            cross_validation,
            holdout,
            loo,
            residuals_by_country,
        },
        model,
    })
}

fn residual_report(evaluation: &ModelEvaluation) -> Analysis<ResidualReport> {
    let residuals: Vec<f64> = evaluation
        .residuals_by_country
        .iter()
        .map(|r| r.residual)
        .collect();
    match (stats::mean(&residuals), stats::std_dev(&residuals, 1)) {
        (Some(mean), Some(std)) => Analysis::Available(ResidualReport {
            model_name: evaluation.model_name.clone(),
            mean,
            std,
            largest: evaluation
                .residuals_by_country
                .iter()
                .take(TOP_RESIDUALS)
                .cloned()
                .collect(),
        }),
        _ => Analysis::unavailable("too few residuals"),
    }
}

/// Rank 1 for the largest score; ties share the average rank.
fn descending_ranks(scores: &[f64]) -> Vec<f64> {
    let negated: Vec<f64> = scores.iter().map(|s| -s).collect();
    stats::average_ranks(&negated)
}

/// Average the per-method ranks of every available importance method.
pub fn consolidate_importance(
    features: &[String],
    linear: Option<Vec<f64>>,
    impurity: Option<Vec<f64>>,
    permutation: Option<Vec<f64>>,
) -> Result<Vec<FeatureImportance>, AnalysisError> {
    let linear = linear.map(|c| c.iter().map(|v| v.abs()).collect::<Vec<f64>>());
    let methods: Vec<&Vec<f64>> = [&linear, &impurity, &permutation]
        .into_iter()
        .flatten()
        .filter(|scores| scores.len() == features.len())
        .collect();
    if methods.len() < 2 {
        return Err(AnalysisError::insufficient(format!(
            "only {} importance method(s) available, need 2 to cross-check",
            methods.len()
        )));
    }

    let ranks: Vec<Vec<f64>> = methods.iter().map(|s| descending_ranks(s)).collect();
    let mut out: Vec<FeatureImportance> = features
        .iter()
        .enumerate()
        .map(|(j, feature)| FeatureImportance {
            feature: feature.clone(),
            label: catalog::label(feature),
            linear_coefficient: linear.as_ref().and_then(|v| v.get(j).copied()),
            impurity: impurity.as_ref().and_then(|v| v.get(j).copied()),
            permutation: permutation.as_ref().and_then(|v| v.get(j).copied()),
            mean_rank: ranks.iter().map(|r| r[j]).sum::<f64>() / ranks.len() as f64,
        })
        .collect();
    out.sort_by(|a, b| {
        a.mean_rank
            .total_cmp(&b.mean_rank)
            .then_with(|| a.feature.cmp(&b.feature))
    });
    Ok(out)
}

/// Train every model family on the target pollutant and evaluate how well it generalizes.
pub fn run_models(table: &FusedTable, config: &AnalysisConfig) -> Analysis<ModelingReport> {
    let target = config.target_column();
    if !table.has_column(&target) {
        return Analysis::unavailable(format!("target column '{}' is not in the fused table", target));
    }
    let rows: Vec<_> = table
        .eligible_rows(config.min_quality)
        .into_iter()
        .filter(|r| r.number(&target).is_some())
        .collect();
    if rows.len() < MIN_ROWS {
        return Analysis::unavailable(format!(
            "only {} countries with a {} value (need {})",
            rows.len(),
            target,
            MIN_ROWS
        ));
    }

    let candidates: Vec<String> = catalog::MODEL_FEATURES
        .iter()
        .filter(|c| **c != target && table.has_column(c))
        .map(|c| c.to_string())
        .collect();
    let (selected, mut dropped_features) =
        matrix::select_columns(&rows, &candidates, MIN_FEATURE_VALUES);
    if selected.is_empty() {
        return Analysis::unavailable(format!(
            "no explanatory feature has at least {} values",
            MIN_FEATURE_VALUES
        ));
    }
    let matrix = match FeatureMatrix::standardized(&rows, &selected) {
        Ok(m) => m,
        Err(e) => return Analysis::unavailable(e.to_string()),
    };
    dropped_features.extend(matrix.dropped.iter().cloned());
    if matrix.n_cols() == 0 {
        return Analysis::unavailable("every explanatory feature is constant");
    }
    let y: Vec<f64> = rows.iter().filter_map(|r| r.number(&target)).collect();

    let fitted: Vec<(ModelFamily, Result<FittedFamily, AnalysisError>)> = ModelFamily::ALL
        .par_iter()
        .map(|&family| (family, evaluate_family(family, &matrix, &y, config.seed)))
        .collect();

    let mut evaluations = Vec::new();
    let mut models = Vec::new();
    let mut skipped = Vec::new();
    for (family, result) in fitted {
        match result {
            Ok(f) => {
                evaluations.push(f.evaluation);
                models.push((family, f.model));
            }
            Err(e) => skipped.push(SkippedModel {
                model_name: family.name().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    let best = evaluations
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.cross_val_mean().total_cmp(&b.cross_val_mean()))
        .map(|(i, _)| i);

    let residuals = match best {
        Some(i) => residual_report(&evaluations[i]),
        None => Analysis::unavailable("every model family failed"),
    };

    let model_of = |family: ModelFamily| {
        models
            .iter()
            .find(|(f, _)| *f == family)
            .map(|(_, m)| m.as_ref())
    };
    let linear = model_of(ModelFamily::Linear).and_then(|m| m.coefficients());
    let impurity = model_of(ModelFamily::RandomForest).and_then(|m| m.impurity_importances());
    let permutation = best
        .and_then(|i| models.get(i))
        .and_then(|(_, m)| {
            permutation_importance(m.as_ref(), &matrix.data, &y, PERMUTATION_REPEATS, config.seed)
                .ok()
        });
    let importance =
        consolidate_importance(&matrix.columns, linear, impurity, permutation).into();

    Analysis::Available(ModelingReport {
        target,
        n_rows: rows.len(),
        features: matrix.columns.clone(),
        dropped_features,
        best_model: best.map(|i| evaluations[i].model_name.clone()),
        evaluations,
        skipped,
        residuals,
        importance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_names_match_models() {
        for family in ModelFamily::ALL {
            assert_eq!(family.build(1).name(), family.name());
            assert_eq!(family.build(1).is_linear(), family.is_linear());
        }
    }

    #[test]
    fn test_consolidated_rank_averages_methods() {
        let features = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ranked = consolidate_importance(
            &features,
            Some(vec![-3.0, 1.0, 2.0]),
            Some(vec![0.2, 0.7, 0.1]),
            None,
        )
        .unwrap();
        // a: ranks 1 and 2, b: 3 and 1, c: 2 and 3
        assert_eq!(ranked[0].feature, "a");
        assert_eq!(ranked[0].mean_rank, 1.5);
        assert_eq!(ranked[1].feature, "b");
        assert_eq!(ranked[2].mean_rank, 2.5);
        assert_eq!(ranked[0].linear_coefficient, Some(3.0));
    }

    #[test]
    fn test_single_method_is_not_enough() {
        let features = vec!["a".to_string()];
        assert!(consolidate_importance(&features, Some(vec![1.0]), None, None).is_err());
    }
}
