//! Correlation and significance testing between pollutants and explanatory features

use faer::Mat;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;

use super::config::CorrelationMethod;
use super::error::AnalysisError;
use super::fusion::{FusedRow, FusedTable};
use super::stats;

/// Minimum number of complete pairs for a correlation to be reported.
pub const MIN_PAIRS: usize = 5;

/// Largest sample for which the exact Spearman permutation p-value is used.
const EXACT_PERMUTATION_MAX_N: usize = 8;

/// Effect-size bucket of |r|.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Strong,
    Moderate,
    Weak,
}

impl Strength {
    pub fn from_coefficient(r: f64) -> Self {
        let a = r.abs();
        if a > 0.5 {
            Strength::Strong
        } else if a > 0.3 {
            Strength::Moderate
        } else {
            Strength::Weak
        }
    }
}

/// One evaluated (pollutant, feature) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub feature_a: String,
    pub feature_b: String,
    pub method: CorrelationMethod,
    pub coefficient: f64,
    pub p_value: f64,
    pub sample_size: usize,
    pub significant: bool,
    pub very_significant: bool,
    pub strength: Strength,
}

/// A pair that produced no result, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPair {
    pub feature_a: String,
    pub feature_b: String,
    pub sample_size: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    pub method: CorrelationMethod,
    pub results: Vec<CorrelationResult>,
    pub skipped: Vec<SkippedPair>,
}

impl CorrelationReport {
    pub fn significant(&self) -> impl Iterator<Item = &CorrelationResult> {
        self.results.iter().filter(|r| r.significant)
    }

    /// Strongest significant associations, at most `n`.
    pub fn top(&self, n: usize) -> Vec<&CorrelationResult> {
        self.significant().take(n).collect()
    }
}

/// Coefficient, p-value and n of one pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairStatistic {
    pub coefficient: f64,
    pub p_value: f64,
    pub sample_size: usize,
}

/// Correlate two aligned columns over their complete pairs.
///
/// Fewer than [`MIN_PAIRS`] complete pairs is `InsufficientData`; a
/// constant side is `DegenerateFit`.
pub fn correlate_pair(
    name_a: &str,
    a: &[Option<f64>],
    name_b: &str,
    b: &[Option<f64>],
    method: CorrelationMethod,
) -> Result<PairStatistic, AnalysisError> {
    let (x, y): (Vec<f64>, Vec<f64>) = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .unzip();
    let n = x.len();
    if n < MIN_PAIRS {
        return Err(AnalysisError::insufficient(format!(
            "{} complete pairs for {} vs {} (need {})",
            n, name_a, name_b, MIN_PAIRS
        )));
    }

    let coefficient = match method {
        CorrelationMethod::Pearson => stats::pearson(&x, &y),
        CorrelationMethod::Spearman => stats::spearman(&x, &y),
    }
    .ok_or_else(|| {
        let constant = if stats::min_max(&x).is_none() { name_a } else { name_b };
        AnalysisError::degenerate(constant, "constant over the complete pairs")
    })?;

    let p_value = match method {
        CorrelationMethod::Spearman if n <= EXACT_PERMUTATION_MAX_N => {
            stats::spearman_permutation_p_value(&x, &y)
        }
        _ => stats::correlation_t_p_value(coefficient, n),
    }
    .ok_or_else(|| AnalysisError::degenerate(name_a, "p-value undefined"))?;

    Ok(PairStatistic {
        coefficient,
        p_value,
        sample_size: n,
    })
}

/// Test every (pollutant, explanatory feature) pair over the given rows.
///
/// Pairs are evaluated in parallel; results are sorted by |r| descending.
pub fn find_correlations(
    rows: &[&FusedRow],
    pollutants: &[String],
    features: &[String],
    method: CorrelationMethod,
) -> CorrelationReport {
    let column = |name: &str| -> Vec<Option<f64>> { rows.iter().map(|r| r.number(name)).collect() };
    let pollutant_values: Vec<(String, Vec<Option<f64>>)> =
        pollutants.iter().map(|p| (p.clone(), column(p))).collect();
    let feature_values: Vec<(String, Vec<Option<f64>>)> =
        features.iter().map(|f| (f.clone(), column(f))).collect();

    let pairs: Vec<(usize, usize)> = (0..pollutant_values.len())
        .flat_map(|i| (0..feature_values.len()).map(move |j| (i, j)))
        .collect();

    let pb = ProgressBar::new(pairs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("      Testing pairs [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let outcomes: Vec<Result<CorrelationResult, SkippedPair>> = pairs
        .par_iter()
        .map(|&(i, j)| {
            let (name_a, a) = &pollutant_values[i];
            let (name_b, b) = &feature_values[j];
            let outcome = correlate_pair(name_a, a, name_b, b, method)
                .map(|s| CorrelationResult {
                    feature_a: name_a.clone(),
                    feature_b: name_b.clone(),
                    method,
                    coefficient: s.coefficient,
                    p_value: s.p_value,
                    sample_size: s.sample_size,
                    significant: s.p_value < 0.05,
                    very_significant: s.p_value < 0.01,
                    strength: Strength::from_coefficient(s.coefficient),
                })
                .map_err(|err| SkippedPair {
                    feature_a: name_a.clone(),
                    feature_b: name_b.clone(),
                    sample_size: complete_pairs(a, b),
                    reason: match err {
                        AnalysisError::InsufficientData(_) => "insufficient data".to_string(),
                        other => other.to_string(),
                    },
                });
            pb.inc(1);
            outcome
        })
        .collect();
    pb.finish_and_clear();

    let mut results = Vec::new();
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(r) => results.push(r),
            Err(s) => skipped.push(s),
        }
    }
    results.sort_by(|a, b| {
        b.coefficient
            .abs()
            .partial_cmp(&a.coefficient.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.feature_a.cmp(&b.feature_a))
            .then_with(|| a.feature_b.cmp(&b.feature_b))
    });

    CorrelationReport {
        method,
        results,
        skipped,
    }
}

/// Pollutant x explanatory correlations over the coverage-eligible rows of a table.
pub fn correlate_table(table: &FusedTable, method: CorrelationMethod, min_quality: u8) -> CorrelationReport {
    let rows = table.eligible_rows(min_quality);
    find_correlations(
        &rows,
        &table.pollutant_columns(),
        &table.explanatory_columns(),
        method,
    )
}

fn complete_pairs(a: &[Option<f64>], b: &[Option<f64>]) -> usize {
    a.iter().zip(b).filter(|(x, y)| x.is_some() && y.is_some()).count()
}

/// Symmetric correlation matrix over a column set; cells with fewer than
/// [`MIN_PAIRS`] complete pairs are missing. The diagonal is 1.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationMatrix {
    pub method: CorrelationMethod,
    pub columns: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.values[i][j]
    }
}

/// Whole-matrix correlation. Complete columns go through a single
/// `ZᵀZ / n` product; anything with gaps falls back to pairwise-complete cells.
pub fn correlation_matrix(
    rows: &[&FusedRow],
    columns: &[String],
    method: CorrelationMethod,
) -> CorrelationMatrix {
    let data: Vec<Vec<Option<f64>>> = columns
        .iter()
        .map(|c| rows.iter().map(|r| r.number(c)).collect())
        .collect();
    let complete = data.iter().all(|col| col.iter().all(Option::is_some));

    let values = if complete && rows.len() >= MIN_PAIRS {
        let dense: Vec<Vec<f64>> = data
            .iter()
            .map(|col| {
                let v: Vec<f64> = col.iter().flatten().copied().collect();
                match method {
                    CorrelationMethod::Pearson => v,
                    CorrelationMethod::Spearman => stats::average_ranks(&v),
                }
            })
            .collect();
        dense_correlation(&dense)
    } else {
        pairwise_correlation(columns, &data, method)
    };

    CorrelationMatrix {
        method,
        columns: columns.to_vec(),
        values,
    }
}

fn pairwise_correlation(
    columns: &[String],
    data: &[Vec<Option<f64>>],
    method: CorrelationMethod,
) -> Vec<Vec<Option<f64>>> {
    let n = columns.len();
    let upper: Vec<((usize, usize), Option<f64>)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect::<Vec<_>>()
        .par_iter()
        .map(|&(i, j)| {
            let r = correlate_pair(&columns[i], &data[i], &columns[j], &data[j], method)
                .ok()
                .map(|s| s.coefficient);
            ((i, j), r)
        })
        .collect();

    let mut values = vec![vec![None; n]; n];
    for (i, row) in values.iter_mut().enumerate() {
        row[i] = Some(1.0);
    }
    for ((i, j), r) in upper {
        values[i][j] = r;
        values[j][i] = r;
    }
    values
}

/// Pearson matrix of complete columns via standardized `ZᵀZ / n`.
/// Constant columns yield missing cells.
fn dense_correlation(columns: &[Vec<f64>]) -> Vec<Vec<Option<f64>>> {
    let n_cols = columns.len();
    let n_rows = columns.first().map_or(0, Vec::len);
    let mut valid = vec![false; n_cols];
    let mut z = Mat::<f64>::zeros(n_rows, n_cols);

    for (j, col) in columns.iter().enumerate() {
        let (Some(mean), Some(std)) = (stats::mean(col), stats::std_dev(col, 0)) else {
            continue;
        };
        if std <= 1e-12 {
            continue;
        }
        valid[j] = true;
        let scale = 1.0 / (std * (n_rows as f64).sqrt());
        for (i, &v) in col.iter().enumerate() {
            z[(i, j)] = (v - mean) * scale;
        }
    }

    let corr = z.transpose() * &z;
    (0..n_cols)
        .map(|i| {
            (0..n_cols)
                .map(|j| {
                    if i == j {
                        Some(1.0)
                    } else if valid[i] && valid[j] {
                        Some(corr[(i, j)].clamp(-1.0, 1.0))
                    } else {
                        None
                    }
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|v| Some(*v)).collect()
    }

    #[test]
    fn test_strength_buckets() {
        assert_eq!(Strength::from_coefficient(-0.6), Strength::Strong);
        assert_eq!(Strength::from_coefficient(0.5), Strength::Moderate);
        assert_eq!(Strength::from_coefficient(0.31), Strength::Moderate);
        assert_eq!(Strength::from_coefficient(0.3), Strength::Weak);
    }

    #[test]
    fn test_pair_below_minimum_is_insufficient() {
        let a = some(&[1.0, 2.0, 3.0, 4.0]);
        let err = correlate_pair("a", &a, "b", &a, CorrelationMethod::Spearman).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData(_)));
    }

    #[test]
    fn test_missing_values_are_pairwise_dropped() {
        let a = vec![Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), Some(6.0), Some(7.0)];
        let b = vec![Some(2.0), Some(4.0), Some(9.0), None, Some(10.0), Some(12.0), Some(14.0)];
        let s = correlate_pair("a", &a, "b", &b, CorrelationMethod::Pearson).unwrap();
        assert_eq!(s.sample_size, 5);
        assert!((s.coefficient - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_side_is_degenerate() {
        let a = some(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let b = some(&[7.0; 5]);
        let err = correlate_pair("a", &a, "b", &b, CorrelationMethod::Pearson).unwrap_err();
        assert_eq!(err, AnalysisError::degenerate("b", "constant over the complete pairs"));
    }

    #[test]
    fn test_dense_matches_pairwise() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = vec![2.0, 1.0, 4.0, 3.0, 6.0, 5.0];
        let dense = dense_correlation(&[x.clone(), y.clone()]);
        let expected = stats::pearson(&x, &y).unwrap();
        assert!((dense[0][1].unwrap() - expected).abs() < 1e-10);
        assert_eq!(dense[0][1], dense[1][0]);
    }
}
