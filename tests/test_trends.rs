//! Tests for the yearly pollutant trend analysis

use airfuse::pipeline::trends::{analyze_trends, yearly_means, TrendDirection, MIN_TREND_YEARS};
use airfuse::pipeline::PollutionRecord;

#[path = "common/mod.rs"]
mod common;

use common::*;

/// Two countries per year straddling the given global means.
fn readings(parameter: &str, means: &[(i32, f64)]) -> Vec<PollutionRecord> {
    means
        .iter()
        .flat_map(|(year, mean)| {
            vec![
                pollution("FR", *year, parameter, mean - 1.0),
                pollution("DE", *year, parameter, mean + 1.0),
            ]
        })
        .collect()
}

#[test]
fn test_yearly_means_average_every_country() {
    let mut records = readings("pm25", &[(2019, 10.0), (2020, 12.0)]);
    records.push(pollution("IT", 2020, "pm25", 15.0));
    let yearly = yearly_means(&records, "pm25");

    assert_eq!(yearly.len(), 2);
    assert_eq!(yearly[0].year, 2019);
    assert_close(yearly[0].mean, 10.0, 1e-12);
    assert_eq!(yearly[0].n_countries, 2);
    assert_close(yearly[1].mean, (11.0 + 13.0 + 15.0) / 3.0, 1e-12);
    assert_eq!(yearly[1].n_countries, 3);
}

#[test]
fn test_rising_series_matches_least_squares() {
    let means = [(2018, 10.0), (2019, 12.0), (2020, 11.0), (2021, 14.0), (2022, 13.0)];
    let report = analyze_trends(&readings("no2", &means));

    assert_eq!(report.trends.len(), 1);
    let trend = &report.trends[0];
    assert_eq!(trend.pollutant, "no2");
    assert_eq!(trend.yearly.len(), 5);
    assert_close(trend.slope_per_year, 0.8, 1e-9);
    assert_close(trend.percent_change_per_year, 8.0, 1e-9);
    assert_close(trend.r_squared, 0.64, 1e-9);
    assert_close(trend.p_value, 0.104_088, 1e-4);
    assert_eq!(trend.direction, TrendDirection::Increasing);
    assert!(!trend.significant);
}

#[test]
fn test_steady_decline_is_significant() {
    let means: Vec<(i32, f64)> = (0..6).map(|k| (2018 + k, 30.0 - 2.5 * k as f64)).collect();
    let report = analyze_trends(&readings("pm25", &means));

    let trend = &report.trends[0];
    assert_close(trend.slope_per_year, -2.5, 1e-9);
    assert_close(trend.percent_change_per_year, -2.5 / 30.0 * 100.0, 1e-9);
    assert_close(trend.r_squared, 1.0, 1e-9);
    assert!(trend.p_value < 0.001);
    assert_eq!(trend.direction, TrendDirection::Decreasing);
    assert!(trend.significant);
}

#[test]
fn test_flat_series_has_no_trend() {
    let means = [(2020, 7.0), (2021, 7.0), (2022, 7.0)];
    let trend = &analyze_trends(&readings("o3", &means)).trends[0];
    assert_close(trend.slope_per_year, 0.0, 1e-12);
    assert_close(trend.r_squared, 0.0, 1e-12);
    assert_close(trend.p_value, 1.0, 1e-9);
    assert!(!trend.significant);
}

#[test]
fn test_short_series_are_skipped_with_year_count() {
    let mut records = readings("pm25", &[(2021, 9.0), (2022, 8.0)]);
    records.extend(readings("so2", &[(2020, 3.0), (2021, 2.0), (2022, 1.0)]));
    // Untracked parameters and incomplete readings are ignored
    records.push(pollution("FR", 2019, "bc", 1.0));
    records.push(PollutionRecord {
        country_code: "FR".to_string(),
        country_name: None,
        year: None,
        parameter: "pm25".to_string(),
        average: Some(50.0),
    });

    let report = analyze_trends(&records);
    assert_eq!(report.trends.len(), 1);
    assert_eq!(report.trends[0].pollutant, "so2");
    assert_eq!(report.skipped.len(), 1);
    let skip = &report.skipped[0];
    assert_eq!(skip.pollutant, "pm25");
    assert_eq!(skip.n_years, 2);
    assert!(skip.reason.contains(&format!("need {}", MIN_TREND_YEARS)), "{}", skip.reason);
}

#[test]
fn test_zero_first_mean_reports_no_percent_change() {
    // Readings of -1 and +1 average to zero in the first year
    let means = [(2020, 0.0), (2021, 2.0), (2022, 4.0)];
    let report = analyze_trends(&readings("co", &means));
    let trend = &report.trends[0];
    assert_close(trend.slope_per_year, 2.0, 1e-9);
    assert_eq!(trend.percent_change_per_year, 0.0);
}
