//! Missing value and coverage analysis

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::catalog;
use super::fusion::FusedTable;
use super::loader::IndicatorRecord;
use super::stats;

/// Missing ratio of every fused column over all rows, highest first.
pub fn analyze_missing_values(table: &FusedTable) -> Vec<(String, f64)> {
    if table.rows.is_empty() {
        return Vec::new();
    }
    let total = table.rows.len() as f64;

    let mut missing_ratios: Vec<(String, f64)> = table
        .columns
        .iter()
        .map(|meta| {
            let missing = table
                .rows
                .iter()
                .filter(|r| !r.values.contains_key(&meta.name))
                .count();
            (meta.name.clone(), missing as f64 / total)
        })
        .collect();

    missing_ratios.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    missing_ratios
}

/// Catalog indicator codes absent from the loaded records, per axis.
/// Axes with complete coverage are omitted.
pub fn missing_indicator_codes(records: &[IndicatorRecord]) -> BTreeMap<String, BTreeSet<String>> {
    let present: BTreeSet<&str> = records
        .iter()
        .filter(|r| r.value.is_some())
        .map(|r| r.code.as_str())
        .collect();

    catalog::AXES
        .iter()
        .filter_map(|(axis, indicators)| {
            let missing: BTreeSet<String> = indicators
                .iter()
                .filter(|indicator| !present.contains(indicator.code))
                .map(|indicator| indicator.code.to_string())
                .collect();
            (!missing.is_empty()).then(|| (axis.to_string(), missing))
        })
        .collect()
}

/// Retained sample under one minimum-pollutant-count threshold.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageThreshold {
    pub min_pollutants: usize,
    pub n_countries: usize,
    pub pm25_mean: Option<f64>,
    pub pm25_median: Option<f64>,
    /// Spearman GDP per capita vs PM2.5, reported when at least 5 pairs exist.
    pub gdp_pm25_spearman: Option<f64>,
    pub gdp_pm25_n: usize,
}

/// How the retained sample and headline figures move as the minimum number
/// of available pollutants rises from 1 to 6.
pub fn coverage_sensitivity(table: &FusedTable) -> Vec<CoverageThreshold> {
    let pm25 = catalog::pollutant_column("pm25");
    (1..=catalog::POLLUTANTS.len())
        .map(|min_pollutants| {
            let rows: Vec<_> = table
                .rows
                .iter()
                .filter(|r| r.n_available_pollutants >= min_pollutants)
                .collect();
            let pm25_values: Vec<f64> = rows.iter().filter_map(|r| r.number(&pm25)).collect();
            let (gdp, pollution): (Vec<f64>, Vec<f64>) = rows
                .iter()
                .filter_map(|r| Some((r.number(catalog::GDP_PER_CAPITA)?, r.number(&pm25)?)))
                .unzip();
            let gdp_pm25_spearman = if gdp.len() >= 5 {
                stats::spearman(&gdp, &pollution)
            } else {
                None
            };
            CoverageThreshold {
                min_pollutants,
                n_countries: rows.len(),
                pm25_mean: stats::mean(&pm25_values),
                pm25_median: stats::median(&pm25_values),
                gdp_pm25_spearman,
                gdp_pm25_n: gdp.len(),
            }
        })
        .collect()
}
