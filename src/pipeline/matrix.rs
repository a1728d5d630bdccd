//! Dense feature matrices built from fused rows: coverage-based column
//! selection, median imputation and z-score standardization.

use super::error::AnalysisError;
use super::fusion::FusedRow;
use super::stats;

/// A column left out of a matrix, with the reason.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DroppedColumn {
    pub column: String,
    pub reason: String,
}

/// Keep candidate columns with at least `min_count` present values among `rows`.
pub fn select_columns(
    rows: &[&FusedRow],
    candidates: &[String],
    min_count: usize,
) -> (Vec<String>, Vec<DroppedColumn>) {
    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for column in candidates {
        let count = rows.iter().filter(|r| r.number(column).is_some()).count();
        if count >= min_count {
            kept.push(column.clone());
        } else {
            dropped.push(DroppedColumn {
                column: column.clone(),
                reason: format!("only {} non-missing values (need {})", count, min_count),
            });
        }
    }
    (kept, dropped)
}

/// Row-major matrix with median-imputed, standardized columns.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub row_keys: Vec<String>,
    pub columns: Vec<String>,
    pub data: Vec<Vec<f64>>,
    /// Imputation medians of the retained columns.
    pub medians: Vec<f64>,
    /// Columns removed because they were constant after imputation.
    pub dropped: Vec<DroppedColumn>,
}

impl FeatureMatrix {
    /// Median-impute every column, then standardize to zero mean and unit
    /// (population) variance. Constant columns are dropped with a reason.
    pub fn standardized(rows: &[&FusedRow], columns: &[String]) -> Result<Self, AnalysisError> {
        let (raw, medians) = impute_median(rows, columns)?;

        let mut kept_columns = Vec::new();
        let mut kept_medians = Vec::new();
        let mut col_data: Vec<Vec<f64>> = Vec::new();
        let mut dropped = Vec::new();

        for (j, column) in columns.iter().enumerate() {
            let mut values: Vec<f64> = raw.iter().map(|row| row[j]).collect();
            match standardize_in_place(&mut values) {
                Some(()) => {
                    kept_columns.push(column.clone());
                    kept_medians.push(medians[j]);
                    col_data.push(values);
                }
                None => dropped.push(DroppedColumn {
                    column: column.clone(),
                    reason: AnalysisError::degenerate(column, "zero variance after imputation")
                        .to_string(),
                }),
            }
        }

        let data = (0..rows.len())
            .map(|i| col_data.iter().map(|col| col[i]).collect())
            .collect();

        Ok(Self {
            row_keys: rows.iter().map(|r| r.key().to_string()).collect(),
            columns: kept_columns,
            data,
            medians: kept_medians,
            dropped,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.data.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        self.data.iter().map(|row| row[j]).collect()
    }

    /// Copy with column `j` removed.
    pub fn without_column(&self, j: usize) -> Self {
        let mut columns = self.columns.clone();
        columns.remove(j);
        let mut medians = self.medians.clone();
        medians.remove(j);
        let data = self
            .data
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.remove(j);
                row
            })
            .collect();
        Self {
            row_keys: self.row_keys.clone(),
            columns,
            data,
            medians,
            dropped: self.dropped.clone(),
        }
    }
}

/// Fill missing values of each column with that column's median.
/// Fails when a column has no value at all.
pub fn impute_median(
    rows: &[&FusedRow],
    columns: &[String],
) -> Result<(Vec<Vec<f64>>, Vec<f64>), AnalysisError> {
    let mut medians = Vec::with_capacity(columns.len());
    for column in columns {
        let present: Vec<f64> = rows.iter().filter_map(|r| r.number(column)).collect();
        let median = stats::median(&present)
            .ok_or_else(|| AnalysisError::degenerate(column, "no values to impute from"))?;
        medians.push(median);
    }
    let data = rows
        .iter()
        .map(|r| {
            columns
                .iter()
                .zip(&medians)
                .map(|(c, m)| r.number(c).unwrap_or(*m))
                .collect()
        })
        .collect();
    Ok((data, medians))
}

/// Standardize to zero mean and unit population variance. `None` if constant.
pub fn standardize_in_place(values: &mut [f64]) -> Option<()> {
    let mean = stats::mean(values)?;
    let std = stats::std_dev(values, 0)?;
    if std <= 1e-12 || !std.is_finite() {
        return None;
    }
    for v in values.iter_mut() {
        *v = (*v - mean) / std;
    }
    Some(())
}
