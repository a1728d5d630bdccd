//! Tests for pollutant correlation and significance testing

use airfuse::pipeline::correlation::{correlate_pair, find_correlations, Strength, MIN_PAIRS};
use airfuse::pipeline::*;

#[path = "common/mod.rs"]
mod common;

use common::*;

fn synthetic_table(n: usize) -> FusedTable {
    let tables = synthetic_tables(n);
    let countries = resolve(&tables);
    fuse(
        &tables,
        &countries,
        FusionMode::LatestYear,
        OutlierFilter::default(),
    )
    .unwrap()
}

#[test]
fn test_gdp_drives_pm25_in_synthetic_world() {
    let table = synthetic_table(24);
    let report = correlate_table(&table, CorrelationMethod::Spearman, 0);

    let pair = report
        .results
        .iter()
        .find(|r| r.feature_a == "pollution_pm25" && r.feature_b == "NY.GDP.PCAP.CD")
        .expect("pm25 x GDP should be tested");
    assert!(pair.coefficient > 0.9, "rho = {}", pair.coefficient);
    assert!(pair.significant && pair.very_significant);
    assert_eq!(pair.strength, Strength::Strong);
    assert_eq!(pair.sample_size, 24);
}

#[test]
fn test_results_sorted_by_absolute_coefficient() {
    let table = synthetic_table(24);
    let report = correlate_table(&table, CorrelationMethod::Pearson, 0);

    assert!(!report.results.is_empty());
    assert!(report
        .results
        .windows(2)
        .all(|w| w[0].coefficient.abs() >= w[1].coefficient.abs()));
    assert!(report
        .results
        .iter()
        .all(|r| (-1.0..=1.0).contains(&r.coefficient) && (0.0..=1.0).contains(&r.p_value)));
}

#[test]
fn test_fewer_than_five_pairs_never_reported() {
    let table = table_from_columns(&[
        (
            "pollution_pm25",
            vec![Some(10.0), Some(12.0), Some(15.0), Some(11.0), Some(30.0), Some(22.0)],
        ),
        (
            "sparse",
            vec![Some(1.0), None, Some(3.0), None, Some(5.0), Some(2.0)],
        ),
        (
            "dense",
            vec![Some(1.0), Some(3.0), Some(4.0), Some(2.0), Some(9.0), Some(6.0)],
        ),
    ]);
    let report = correlate_table(&table, CorrelationMethod::Spearman, 0);

    assert!(report.results.iter().all(|r| r.sample_size >= MIN_PAIRS));
    assert!(report.results.iter().all(|r| r.feature_b != "sparse"));

    let skipped = report
        .skipped
        .iter()
        .find(|s| s.feature_b == "sparse")
        .expect("sparse pair should be skipped");
    assert_eq!(skipped.reason, "insufficient data");
    assert_eq!(skipped.sample_size, 4);

    let dense = report.results.iter().find(|r| r.feature_b == "dense").unwrap();
    assert_close(dense.coefficient, 1.0, 1e-12);
}

#[test]
fn test_constant_feature_is_skipped_with_reason() {
    let rows = table_from_columns(&[
        ("pollution_no2", (0..8).map(|i| Some(i as f64)).collect()),
        ("flat", vec![Some(7.0); 8]),
    ]);
    let eligible = rows.eligible_rows(0);
    let report = find_correlations(
        &eligible,
        &["pollution_no2".to_string()],
        &["flat".to_string()],
        CorrelationMethod::Pearson,
    );
    assert!(report.results.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("flat"));
}

#[test]
fn test_small_sample_spearman_uses_exact_p_value() {
    let x: Vec<Option<f64>> = (1..=6).map(|v| Some(v as f64)).collect();
    let stat = correlate_pair("a", &x, "b", &x, CorrelationMethod::Spearman).unwrap();
    assert_close(stat.coefficient, 1.0, 1e-12);
    // Only the identity permutation reaches rho = 1: p = 2 / 6!
    assert_close(stat.p_value, 2.0 / 720.0, 1e-12);
}

#[test]
fn test_correlation_matrix_is_symmetric() {
    let table = synthetic_table(24);
    let eligible = table.eligible_rows(0);
    let columns = matrix_columns(&table);
    assert!(columns.len() >= 5);

    for method in [CorrelationMethod::Pearson, CorrelationMethod::Spearman] {
        let matrix = correlation_matrix(&eligible, &columns, method);
        for a in &columns {
            assert_eq!(matrix.get(a, a), Some(1.0));
            for b in &columns {
                match (matrix.get(a, b), matrix.get(b, a)) {
                    (Some(x), Some(y)) => assert_close(x, y, 1e-12),
                    (x, y) => assert_eq!(x, y),
                }
            }
        }
    }
}

#[test]
fn test_matrix_with_gaps_falls_back_to_pairwise() {
    let table = table_from_columns(&[
        ("a", (0..10).map(|i| Some(i as f64)).collect()),
        (
            "b",
            (0..10)
                .map(|i| if i < 3 { None } else { Some(2.0 * i as f64) })
                .collect(),
        ),
        (
            "c",
            (0..10).map(|i| if i < 6 { None } else { Some(1.0) }).collect(),
        ),
    ]);
    let eligible = table.eligible_rows(0);
    let columns = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let matrix = correlation_matrix(&eligible, &columns, CorrelationMethod::Pearson);

    assert_close(matrix.get("a", "b").unwrap(), 1.0, 1e-12);
    // Four complete pairs only
    assert_eq!(matrix.get("a", "c"), None);
}

#[test]
fn test_pair_statistic_ignores_argument_order() {
    let some = |values: &[f64]| -> Vec<Option<f64>> { values.iter().map(|v| Some(*v)).collect() };
    let large_x: Vec<Option<f64>> = (0..20).map(|i| Some(i as f64)).collect();
    let large_y: Vec<Option<f64>> = (0..20)
        .map(|i| Some(((i * 7) % 11) as f64 + 0.5 * i as f64))
        .collect();

    let cases: Vec<(&str, Vec<Option<f64>>, Vec<Option<f64>>)> = vec![
        (
            "small sample",
            some(&[3.1, 1.2, 4.8, 2.2, 9.0, 5.5]),
            some(&[2.0, 1.0, 7.5, 3.3, 6.1, 4.0]),
        ),
        (
            "tied ranks",
            some(&[1.0, 2.0, 2.0, 3.0, 5.0, 5.0, 7.0]),
            some(&[4.0, 4.0, 1.0, 3.0, 9.0, 2.0, 2.0]),
        ),
        (
            "gaps on both sides",
            vec![Some(1.0), None, Some(3.0), Some(2.5), Some(8.0), Some(4.0), Some(6.0), None],
            vec![Some(2.0), Some(5.0), Some(1.0), None, Some(7.0), Some(3.5), Some(6.5), Some(9.0)],
        ),
        ("large sample", large_x, large_y),
    ];

    for method in [CorrelationMethod::Pearson, CorrelationMethod::Spearman] {
        for (label, a, b) in &cases {
            let ab = correlate_pair("a", a, "b", b, method).unwrap();
            let ba = correlate_pair("b", b, "a", a, method).unwrap();
            assert_eq!(ab.sample_size, ba.sample_size, "{} {}", method, label);
            assert_close(ab.coefficient, ba.coefficient, 1e-12);
            assert_close(ab.p_value, ba.p_value, 1e-12);
            assert!((0.0..=1.0).contains(&ab.p_value), "{} {}", method, label);
        }
    }
}
