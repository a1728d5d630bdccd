//! Year-over-year evolution of the global mean of each pollutant.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::catalog;
use super::loader::PollutionRecord;
use super::stats;

/// A regression line needs more years than this.
pub const MIN_TREND_YEARS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlyMean {
    pub year: i32,
    /// Mean over every country reading of that year.
    pub mean: f64,
    pub n_countries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Decreasing,
    Increasing,
}

/// Least-squares trend of one pollutant's yearly global mean.
#[derive(Debug, Clone, Serialize)]
pub struct PollutantTrend {
    pub pollutant: String,
    pub yearly: Vec<YearlyMean>,
    pub slope_per_year: f64,
    /// Slope relative to the first year's mean; 0 when that mean is not positive.
    pub percent_change_per_year: f64,
    pub r_squared: f64,
    pub p_value: f64,
    pub direction: TrendDirection,
    pub significant: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedTrend {
    pub pollutant: String,
    pub n_years: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrendReport {
    pub trends: Vec<PollutantTrend>,
    pub skipped: Vec<SkippedTrend>,
}

/// Yearly global means per pollutant, ascending by year. Readings without a
/// year or a value are ignored.
pub fn yearly_means(records: &[PollutionRecord], pollutant: &str) -> Vec<YearlyMean> {
    let mut by_year: BTreeMap<i32, (Vec<f64>, BTreeSet<&str>)> = BTreeMap::new();
    for record in records.iter().filter(|r| r.parameter == pollutant) {
        if let (Some(year), Some(value)) = (record.year, record.average) {
            let (values, countries) = by_year.entry(year).or_default();
            values.push(value);
            countries.insert(record.country_code.as_str());
        }
    }
    by_year
        .into_iter()
        .filter_map(|(year, (values, countries))| {
            Some(YearlyMean {
                year,
                mean: stats::mean(&values)?,
                n_countries: countries.len(),
            })
        })
        .collect()
}

fn fit_trend(pollutant: &str, yearly: Vec<YearlyMean>) -> Result<PollutantTrend, SkippedTrend> {
    let skip = |reason: String| SkippedTrend {
        pollutant: pollutant.to_string(),
        n_years: yearly.len(),
        reason,
    };
    if yearly.len() < MIN_TREND_YEARS {
        return Err(skip(format!(
            "{} year(s) of readings (need {})",
            yearly.len(),
            MIN_TREND_YEARS
        )));
    }

    let years: Vec<f64> = yearly.iter().map(|y| y.year as f64).collect();
    let means: Vec<f64> = yearly.iter().map(|y| y.mean).collect();
    let (slope, _) = stats::linear_fit(&years, &means)
        .ok_or_else(|| skip("years do not vary".to_string()))?;
    // A flat series has no correlation and no evidence of a trend
    let r = stats::pearson(&years, &means).unwrap_or(0.0);
    let p_value = stats::correlation_t_p_value(r, yearly.len())
        .ok_or_else(|| skip("p-value undefined".to_string()))?;
    let first = means[0];

    Ok(PollutantTrend {
        pollutant: pollutant.to_string(),
        slope_per_year: slope,
        percent_change_per_year: if first > 0.0 { 100.0 * slope / first } else { 0.0 },
        r_squared: r * r,
        p_value,
        direction: if slope < 0.0 {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Increasing
        },
        significant: p_value < 0.05,
        yearly,
    })
}

/// Trend of every tracked pollutant present in the readings.
pub fn analyze_trends(records: &[PollutionRecord]) -> TrendReport {
    let mut report = TrendReport::default();
    for pollutant in catalog::POLLUTANTS {
        let yearly = yearly_means(records, pollutant);
        if yearly.is_empty() {
            continue;
        }
        match fit_trend(pollutant, yearly) {
            Ok(trend) => report.trends.push(trend),
            Err(skipped) => report.skipped.push(skipped),
        }
    }
    report
}
