//! Principal component analysis over the standardized feature matrix and
//! the leave-one-feature-out stability audit.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;

use super::catalog;
use super::error::{Analysis, AnalysisError};
use super::fusion::FusedTable;
use super::linalg;
use super::matrix::{select_columns, DroppedColumn, FeatureMatrix};

pub const MIN_ROWS: usize = 10;
pub const MIN_FEATURES: usize = 3;
/// A feature needs this many present values to enter the decomposition.
pub const MIN_FEATURE_VALUES: usize = 10;
pub const MAX_COMPONENTS: usize = 5;
pub const LOADING_THRESHOLD: f64 = 0.3;
const INTERPRETED_COMPONENTS: usize = 3;
const ROBUSTNESS_MIN_FEATURES: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalComponent {
    /// 1-based component number.
    pub index: usize,
    pub eigenvalue: f64,
    pub explained_variance_ratio: f64,
    pub cumulative_variance: f64,
    /// Loading per retained feature, in feature order.
    pub loadings: Vec<f64>,
}

/// Features with |loading| above the interpretation threshold.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentInterpretation {
    pub index: usize,
    pub positive: Vec<(String, f64)>,
    pub negative: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryScore {
    pub country: String,
    pub scores: Vec<f64>,
    /// PC1/PC2 sign quadrant, e.g. `PC1+/PC2-`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quadrant: Option<String>,
}

/// Change in first-two-component variance when one feature is excluded.
#[derive(Debug, Clone, Serialize)]
pub struct StabilityDelta {
    pub excluded_feature: String,
    pub variance_full: f64,
    pub variance_without: f64,
    pub delta: f64,
}

/// Stability deltas plus the features whose refit could not be computed.
#[derive(Debug, Clone, Serialize)]
pub struct RobustnessAudit {
    /// Ranked by |delta| descending.
    pub deltas: Vec<StabilityDelta>,
    pub skipped: Vec<DroppedColumn>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalComponentModel {
    pub features: Vec<String>,
    pub n_rows: usize,
    pub components: Vec<PrincipalComponent>,
    pub interpretation: Vec<ComponentInterpretation>,
    pub scores: Vec<CountryScore>,
    pub quadrants: BTreeMap<String, Vec<String>>,
    pub dropped_features: Vec<DroppedColumn>,
    pub robustness: Analysis<RobustnessAudit>,
}

impl PrincipalComponentModel {
    pub fn cumulative_variance(&self) -> f64 {
        self.components.last().map_or(0.0, |c| c.cumulative_variance)
    }
}

/// Eigen decomposition of a standardized matrix.
#[derive(Debug, Clone)]
pub struct PcaFit {
    pub eigenvalues: Vec<f64>,
    pub ratios: Vec<f64>,
    /// Sign-normalized eigenvectors of the retained components.
    pub vectors: Vec<Vec<f64>>,
}

impl PcaFit {
    /// Variance share of the first `k` components.
    pub fn captured(&self, k: usize) -> f64 {
        self.ratios.iter().take(k).sum()
    }
}

/// Fit PCA on an already standardized matrix, keeping
/// `min(max_components, n_features, n_rows - 1)` components.
pub fn fit(matrix: &FeatureMatrix, max_components: usize) -> Result<PcaFit, AnalysisError> {
    let n = matrix.n_rows();
    let p = matrix.n_cols();
    if n < 2 || p == 0 {
        return Err(AnalysisError::insufficient(format!(
            "{} rows x {} features cannot be decomposed",
            n, p
        )));
    }
    let cov = linalg::gram(&matrix.data, p, 1.0 / (n - 1) as f64);
    let eig = linalg::symmetric_eigen(&cov, "covariance matrix")?;

    let eigenvalues: Vec<f64> = eig.values.iter().map(|v| v.max(0.0)).collect();
    let total: f64 = eigenvalues.iter().sum();
    if total <= f64::EPSILON {
        return Err(AnalysisError::degenerate("covariance matrix", "zero total variance"));
    }

    let k = max_components.min(p).min(n - 1);
    let ratios = eigenvalues.iter().take(k).map(|v| v / total).collect();
    let vectors = eig
        .vectors
        .into_iter()
        .take(k)
        .map(orient)
        .collect();

    Ok(PcaFit {
        eigenvalues: eigenvalues.into_iter().take(k).collect(),
        ratios,
        vectors,
    })
}

/// Flip an eigenvector so its largest-magnitude entry is positive.
fn orient(mut v: Vec<f64>) -> Vec<f64> {
    let dominant = v
        .iter()
        .copied()
        .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
    if dominant < 0.0 {
        v.iter_mut().for_each(|x| *x = -*x);
    }
    v
}

/// Candidate PCA features: pollutants first, then socio-economic indicators.
pub fn candidate_features(table: &FusedTable) -> Vec<String> {
    let mut features = table.pollutant_columns();
    features.extend(
        catalog::PCA_SOCIOECONOMIC
            .iter()
            .filter(|c| table.has_column(c))
            .map(|c| c.to_string()),
    );
    features
}

/// Run the full PCA analysis on the coverage-eligible rows of a table.
pub fn run_pca(table: &FusedTable, min_quality: u8) -> Analysis<PrincipalComponentModel> {
    analyze(table, min_quality).into()
}

fn analyze(table: &FusedTable, min_quality: u8) -> Result<PrincipalComponentModel, AnalysisError> {
    let eligible = table.eligible_rows(min_quality);
    let (features, mut dropped) =
        select_columns(&eligible, &candidate_features(table), MIN_FEATURE_VALUES);

    let anchors: Vec<&String> = features
        .iter()
        .filter(|f| f.starts_with(catalog::POLLUTION_PREFIX))
        .take(3)
        .collect();
    let rows: Vec<_> = eligible
        .into_iter()
        .filter(|r| anchors.iter().any(|a| r.number(a).is_some()))
        .collect();

    if rows.len() < MIN_ROWS {
        return Err(AnalysisError::insufficient(format!(
            "only {} countries with pollutant coverage (need {})",
            rows.len(),
            MIN_ROWS
        )));
    }
    let (features, empty) = select_columns(&rows, &features, 1);
    dropped.extend(empty);
    if features.len() < MIN_FEATURES {
        return Err(AnalysisError::insufficient(format!(
            "only {} features with at least {} values (need {})",
            features.len(),
            MIN_FEATURE_VALUES,
            MIN_FEATURES
        )));
    }

    let matrix = FeatureMatrix::standardized(&rows, &features)?;
    dropped.extend(matrix.dropped.iter().cloned());
    if matrix.n_cols() < MIN_FEATURES {
        return Err(AnalysisError::insufficient(format!(
            "only {} non-constant features (need {})",
            matrix.n_cols(),
            MIN_FEATURES
        )));
    }

    let pca = fit(&matrix, MAX_COMPONENTS)?;

    let mut cumulative = 0.0;
    let components: Vec<PrincipalComponent> = pca
        .ratios
        .iter()
        .zip(&pca.eigenvalues)
        .zip(&pca.vectors)
        .enumerate()
        .map(|(i, ((ratio, eigenvalue), vector))| {
            cumulative += ratio;
            PrincipalComponent {
                index: i + 1,
                eigenvalue: *eigenvalue,
                explained_variance_ratio: *ratio,
                cumulative_variance: cumulative.min(1.0),
                loadings: vector.clone(),
            }
        })
        .collect();

    let interpretation = components
        .iter()
        .take(INTERPRETED_COMPONENTS)
        .map(|c| interpret(c, &matrix.columns))
        .collect();

    let scores = project(&matrix, &pca);
    let quadrants = group_quadrants(&scores);
    let robustness = robustness_audit(&matrix, &pca).into();

    Ok(PrincipalComponentModel {
        features: matrix.columns.clone(),
        n_rows: matrix.n_rows(),
        components,
        interpretation,
        scores,
        quadrants,
        dropped_features: dropped,
        robustness,
    })
}

fn interpret(component: &PrincipalComponent, features: &[String]) -> ComponentInterpretation {
    let mut positive: Vec<(String, f64)> = Vec::new();
    let mut negative: Vec<(String, f64)> = Vec::new();
    for (feature, &loading) in features.iter().zip(&component.loadings) {
        if loading > LOADING_THRESHOLD {
            positive.push((feature.clone(), loading));
        } else if loading < -LOADING_THRESHOLD {
            negative.push((feature.clone(), loading));
        }
    }
    positive.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    negative.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    ComponentInterpretation {
        index: component.index,
        positive,
        negative,
    }
}

fn project(matrix: &FeatureMatrix, pca: &PcaFit) -> Vec<CountryScore> {
    matrix
        .data
        .iter()
        .zip(&matrix.row_keys)
        .map(|(row, key)| {
            let scores: Vec<f64> = pca
                .vectors
                .iter()
                .map(|v| v.iter().zip(row).map(|(a, b)| a * b).sum())
                .collect();
            let quadrant = (scores.len() >= 2).then(|| {
                format!(
                    "PC1{}/PC2{}",
                    if scores[0] >= 0.0 { "+" } else { "-" },
                    if scores[1] >= 0.0 { "+" } else { "-" }
                )
            });
            CountryScore {
                country: key.clone(),
                scores,
                quadrant,
            }
        })
        .collect()
}

fn group_quadrants(scores: &[CountryScore]) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for score in scores {
        if let Some(q) = &score.quadrant {
            groups.entry(q.clone()).or_default().push(score.country.clone());
        }
    }
    groups
}

/// Refit without each feature in turn and compare the variance captured by
/// the first two components. A refit that fails is recorded as skipped and
/// the remaining features are still audited.
pub fn robustness_audit(
    matrix: &FeatureMatrix,
    full: &PcaFit,
) -> Result<RobustnessAudit, AnalysisError> {
    if matrix.n_cols() < ROBUSTNESS_MIN_FEATURES {
        return Err(AnalysisError::insufficient(format!(
            "robustness audit needs at least {} features, have {}",
            ROBUSTNESS_MIN_FEATURES,
            matrix.n_cols()
        )));
    }
    let variance_full = full.captured(2);

    let refits: Vec<(String, Result<f64, AnalysisError>)> = (0..matrix.n_cols())
        .into_par_iter()
        .map(|j| {
            let reduced = matrix.without_column(j);
            let variance_without = fit(&reduced, MAX_COMPONENTS).map(|refit| refit.captured(2));
            (matrix.columns[j].clone(), variance_without)
        })
        .collect();

    let mut deltas = Vec::new();
    let mut skipped = Vec::new();
    for (feature, result) in refits {
        match result {
            Ok(variance_without) => deltas.push(StabilityDelta {
                excluded_feature: feature,
                variance_full,
                variance_without,
                delta: variance_without - variance_full,
            }),
            Err(e) => skipped.push(DroppedColumn {
                column: feature,
                reason: e.to_string(),
            }),
        }
    }
    if deltas.is_empty() {
        return Err(AnalysisError::degenerate(
            "robustness audit",
            "every leave-one-feature-out refit failed",
        ));
    }

    deltas.sort_by(|a, b| {
        b.delta
            .abs()
            .total_cmp(&a.delta.abs())
            .then_with(|| a.excluded_feature.cmp(&b.excluded_feature))
    });
    Ok(RobustnessAudit { deltas, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(data: Vec<Vec<f64>>) -> FeatureMatrix {
        let p = data[0].len();
        let mut cols: Vec<Vec<f64>> = (0..p).map(|j| data.iter().map(|r| r[j]).collect()).collect();
        for c in cols.iter_mut() {
            crate::pipeline::matrix::standardize_in_place(c).unwrap();
        }
        let n = data.len();
        FeatureMatrix {
            row_keys: (0..n).map(|i| format!("C{}", i)).collect(),
            columns: (0..p).map(|j| format!("f{}", j)).collect(),
            data: (0..n).map(|i| cols.iter().map(|c| c[i]).collect()).collect(),
            medians: vec![0.0; p],
            dropped: Vec::new(),
        }
    }

    #[test]
    fn test_perfectly_collinear_features_share_one_component() {
        let data: Vec<Vec<f64>> = (0..12)
            .map(|i| {
                let x = i as f64;
                vec![x, 2.0 * x + 1.0, -x]
            })
            .collect();
        let pca = fit(&matrix(data), 5).unwrap();
        assert!((pca.ratios[0] - 1.0).abs() < 1e-9);
        assert!(pca.captured(3) <= 1.0 + 1e-9);
    }

    #[test]
    fn test_orient_makes_dominant_loading_positive() {
        assert_eq!(orient(vec![0.1, -0.9]), vec![-0.1, 0.9]);
        assert_eq!(orient(vec![0.5, -0.2]), vec![0.5, -0.2]);
    }

    #[test]
    fn test_robustness_needs_four_features() {
        let data: Vec<Vec<f64>> = (0..12)
            .map(|i| vec![i as f64, ((i * 7) % 5) as f64, ((i * 3) % 4) as f64])
            .collect();
        let m = matrix(data);
        let pca = fit(&m, 5).unwrap();
        assert!(matches!(
            robustness_audit(&m, &pca),
            Err(AnalysisError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_failed_refit_is_skipped_not_fatal() {
        // f0 carries all the variance; dropping it leaves an all-zero matrix
        let data: Vec<Vec<f64>> = (0..12)
            .map(|i| {
                vec![
                    i as f64,
                    ((i * 7) % 5) as f64,
                    ((i * 3) % 4) as f64,
                    ((i * 5) % 7) as f64,
                ]
            })
            .collect();
        let mut m = matrix(data);
        for row in m.data.iter_mut() {
            row[1] = 0.0;
            row[2] = 0.0;
            row[3] = 0.0;
        }
        let pca = fit(&m, 5).unwrap();
        let audit = robustness_audit(&m, &pca).unwrap();

        assert_eq!(audit.deltas.len(), 3);
        assert_eq!(audit.skipped.len(), 1);
        assert_eq!(audit.skipped[0].column, "f0");
        assert!(audit.skipped[0].reason.contains("zero total variance"));
        assert!(audit.deltas.iter().all(|d| d.excluded_feature != "f0"));
    }
}
