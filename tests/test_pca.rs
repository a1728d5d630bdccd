//! Tests for principal component analysis and its robustness audit

use airfuse::pipeline::pca::MAX_COMPONENTS;
use airfuse::pipeline::*;

#[path = "common/mod.rs"]
mod common;

use common::*;

fn synthetic_model() -> PrincipalComponentModel {
    let tables = synthetic_tables(24);
    let countries = resolve(&tables);
    let table = fuse(
        &tables,
        &countries,
        FusionMode::LatestYear,
        OutlierFilter::default(),
    )
    .unwrap();
    match run_pca(&table, 0) {
        Analysis::Available(model) => model,
        Analysis::Unavailable { reason } => panic!("PCA unavailable: {}", reason),
    }
}

#[test]
fn test_explained_variance_is_ordered_and_bounded() {
    let model = synthetic_model();

    assert_eq!(model.components.len(), MAX_COMPONENTS);
    for (i, c) in model.components.iter().enumerate() {
        assert_eq!(c.index, i + 1);
        assert!(c.explained_variance_ratio >= 0.0);
        assert!(c.cumulative_variance <= 1.0 + 1e-9);
        assert_eq!(c.loadings.len(), model.features.len());
    }
    assert!(model
        .components
        .windows(2)
        .all(|w| w[0].explained_variance_ratio >= w[1].explained_variance_ratio - 1e-12));
    assert!(model
        .components
        .windows(2)
        .all(|w| w[0].cumulative_variance <= w[1].cumulative_variance + 1e-12));
    assert!(model.cumulative_variance() > 0.5);
}

#[test]
fn test_features_scores_and_quadrants() {
    let model = synthetic_model();

    assert!(model.features.contains(&"pollution_pm25".to_string()));
    assert!(model.features.contains(&"pollution_o3".to_string()));
    assert!(model.features.contains(&"NY.GDP.PCAP.CD".to_string()));
    assert_eq!(model.n_rows, 24);

    assert_eq!(model.scores.len(), 24);
    assert!(model
        .scores
        .iter()
        .all(|s| s.scores.len() == MAX_COMPONENTS && s.quadrant.is_some()));
    let grouped: usize = model.quadrants.values().map(Vec::len).sum();
    assert_eq!(grouped, 24);

    // Scores of standardized data are centered
    let pc1_mean = model.scores.iter().map(|s| s.scores[0]).sum::<f64>() / 24.0;
    assert_close(pc1_mean, 0.0, 1e-9);
}

#[test]
fn test_interpretation_respects_loading_threshold() {
    let model = synthetic_model();
    assert!(!model.interpretation.is_empty());
    for interpretation in &model.interpretation {
        assert!(interpretation.positive.iter().all(|(_, l)| *l > 0.3));
        assert!(interpretation.negative.iter().all(|(_, l)| *l < -0.3));
    }
}

#[test]
fn test_robustness_audit_covers_every_feature() {
    let model = synthetic_model();
    let audit = model.robustness.value().expect("audit should run");
    assert!(audit.skipped.is_empty());
    let deltas = &audit.deltas;

    assert_eq!(deltas.len(), model.features.len());
    assert!(deltas
        .windows(2)
        .all(|w| w[0].delta.abs() >= w[1].delta.abs()));
    let full = deltas[0].variance_full;
    for d in deltas.iter() {
        assert_close(d.variance_full, full, 1e-12);
        assert_close(d.delta, d.variance_without - d.variance_full, 1e-12);
    }
}

#[test]
fn test_too_few_rows_is_unavailable() {
    let table = table_from_columns(&[
        ("pollution_pm25", (0..6).map(|i| Some(i as f64)).collect()),
        ("pollution_no2", (0..6).map(|i| Some((i * i) as f64)).collect()),
        ("NY.GDP.PCAP.CD", (0..6).map(|i| Some(100.0 - i as f64)).collect()),
    ]);
    let result = run_pca(&table, 0);
    assert!(!result.is_available());
    assert!(result.reason().unwrap().contains("insufficient data"));
}

#[test]
fn test_constant_feature_is_dropped() {
    let n = 14;
    let table = table_from_columns(&[
        ("pollution_pm25", (0..n).map(|i| Some(i as f64)).collect()),
        (
            "pollution_no2",
            (0..n).map(|i| Some(((i * 7) % 5) as f64)).collect(),
        ),
        (
            "NY.GDP.PCAP.CD",
            (0..n).map(|i| Some(((i * 3) % 4) as f64)).collect(),
        ),
        ("EN.ATM.CO2E.PC", vec![Some(2.5); n]),
    ]);
    let model = run_pca(&table, 0);
    let model = model.value().expect("three varying features remain");

    assert_eq!(model.features.len(), 3);
    assert!(!model.features.contains(&"EN.ATM.CO2E.PC".to_string()));
    assert!(model
        .dropped_features
        .iter()
        .any(|d| d.column == "EN.ATM.CO2E.PC"));
    // Three features are below the audit minimum
    assert!(!model.robustness.is_available());
}
