//! Per-pollutant distribution summaries, skewness check and WHO exceedance.

use serde::Serialize;

use super::catalog::{self, POLLUTION_PREFIX};
use super::fusion::FusedTable;
use super::stats;

#[derive(Debug, Clone, Serialize)]
pub struct PollutantSummary {
    pub column: String,
    pub n: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std: Option<f64>,
    pub p95: Option<f64>,
    pub skewness: Option<f64>,
    /// |skewness| above the configured threshold.
    pub non_normal: bool,
    pub who_threshold: Option<f64>,
    pub unit: Option<&'static str>,
    pub n_exceeding: usize,
    pub share_exceeding: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DescriptiveReport {
    pub skew_threshold: f64,
    pub pollutants: Vec<PollutantSummary>,
    /// True when most pollutants are flagged non-normal.
    pub majority_non_normal: bool,
}

/// Summarize every pollutant column of the fused table.
pub fn describe_pollutants(table: &FusedTable, skew_threshold: f64) -> DescriptiveReport {
    let pollutants: Vec<PollutantSummary> = table
        .pollutant_columns()
        .into_iter()
        .map(|column| {
            let values: Vec<f64> = table.numeric_column(&column).into_iter().flatten().collect();
            let parameter = column.trim_start_matches(POLLUTION_PREFIX);
            let threshold = catalog::who_threshold(parameter);
            let n_exceeding = threshold
                .map(|t| values.iter().filter(|v| **v > t.value).count())
                .unwrap_or(0);
            let skewness = stats::skewness(&values);
            PollutantSummary {
                n: values.len(),
                mean: stats::mean(&values),
                median: stats::median(&values),
                std: stats::std_dev(&values, 1),
                p95: stats::percentile(&values, 95.0),
                non_normal: skewness.is_some_and(|s| s.abs() > skew_threshold),
                skewness,
                who_threshold: threshold.map(|t| t.value),
                unit: threshold.map(|t| t.unit),
                n_exceeding,
                share_exceeding: (threshold.is_some() && !values.is_empty())
                    .then(|| n_exceeding as f64 / values.len() as f64),
                column,
            }
        })
        .collect();

    let flagged = pollutants.iter().filter(|p| p.non_normal).count();
    DescriptiveReport {
        skew_threshold,
        majority_non_normal: !pollutants.is_empty() && flagged * 2 > pollutants.len(),
        pollutants,
    }
}
