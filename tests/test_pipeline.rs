//! Integration tests for the full load, fuse, analyze and export pipeline

use airfuse::pipeline::*;
use airfuse::report::{
    export_analysis_report, export_result_tables, package_outputs, AnalysisReport,
    FusionOverview,
};

#[path = "common/mod.rs"]
mod common;

use common::*;

#[test]
fn test_full_pipeline_from_source_files() {
    let (_temp_dir, paths) = write_synthetic_sources(24);

    let tables = load_sources(&paths, 10_000).unwrap();
    let countries = resolve(&tables);
    let config = AnalysisConfig::default();
    let outputs = fuse_all(&tables, &countries, OutlierFilter::from(&config)).unwrap();
    let table = outputs.select(config.fusion_mode);
    let suite = run_analyses(table, &tables.pollution, &config);

    assert_eq!(suite.fusion_mode, FusionMode::LatestYear);
    assert_eq!(suite.n_countries, 26);
    assert_eq!(suite.n_eligible, 24);
    assert!(suite.pca.is_available(), "{:?}", suite.pca.reason());
    assert!(suite.graph.is_available(), "{:?}", suite.graph.reason());
    assert!(suite.models.is_available(), "{:?}", suite.models.reason());
    assert!(suite.correlations.significant().count() > 0);
}

#[test]
fn test_descriptive_and_coverage_reports() {
    let tables = synthetic_tables(24);
    let countries = resolve(&tables);
    let table = fuse(
        &tables,
        &countries,
        FusionMode::AllYearsMean,
        OutlierFilter::default(),
    )
    .unwrap();
    let suite = run_analyses(&table, &tables.pollution, &AnalysisConfig::default());

    let pm25 = suite
        .descriptive
        .pollutants
        .iter()
        .find(|p| p.column == "pollution_pm25")
        .unwrap();
    // Every synthetic PM2.5 value is above the WHO annual guideline
    assert_eq!(pm25.share_exceeding, Some(1.0));

    assert_eq!(suite.coverage.len(), 6);
    assert!(suite
        .coverage
        .windows(2)
        .all(|w| w[0].n_countries >= w[1].n_countries));
    assert_eq!(suite.coverage[0].min_pollutants, 1);
    assert!(suite.coverage[0].gdp_pm25_spearman.unwrap() > 0.9);
    // Only half the synthetic countries report O3
    assert_eq!(suite.coverage[3].n_countries, 12);
    assert_eq!(suite.coverage[4].n_countries, 0);

    let (worst, ratio) = &suite.missing_values[0];
    assert!(*ratio > 0.0, "{} should have gaps", worst);
    assert!(suite
        .missing_values
        .windows(2)
        .all(|w| w[0].1 >= w[1].1));
}

#[test]
fn test_quality_gate_shrinks_every_analysis() {
    let tables = synthetic_tables(24);
    let countries = resolve(&tables);
    let table = fuse(
        &tables,
        &countries,
        FusionMode::LatestYear,
        OutlierFilter::default(),
    )
    .unwrap();
    let config = AnalysisConfig {
        min_quality: 3,
        ..AnalysisConfig::default()
    };
    let suite = run_analyses(&table, &tables.pollution, &config);

    assert_eq!(suite.n_eligible, 23);
    assert_eq!(suite.pca.value().unwrap().n_rows, 23);
    assert_eq!(suite.graph.value().unwrap().nodes.len(), 23);
    assert_eq!(suite.models.value().unwrap().n_rows, 23);
    assert!(suite
        .correlations
        .results
        .iter()
        .all(|r| r.sample_size <= 23));
}

#[test]
fn test_small_world_degrades_to_skip_reasons() {
    let tables = synthetic_tables(6);
    let countries = resolve(&tables);
    let table = fuse(
        &tables,
        &countries,
        FusionMode::LatestYear,
        OutlierFilter::default(),
    )
    .unwrap();
    let suite = run_analyses(&table, &tables.pollution, &AnalysisConfig::default());

    assert!(!suite.pca.is_available());
    assert!(!suite.graph.is_available());
    assert!(!suite.models.is_available());
    // Correlations still run on six countries
    assert!(!suite.correlations.results.is_empty());

    let reasons = suite.skip_reasons();
    assert!(reasons.iter().any(|r| r.starts_with("PCA:")));
    assert!(reasons.iter().any(|r| r.starts_with("similarity graph:")));
    assert!(reasons.iter().any(|r| r.starts_with("predictive modeling:")));
}

#[test]
fn test_exported_tables_report_and_bundle() {
    let tables = synthetic_tables(24);
    let countries = resolve(&tables);
    let config = AnalysisConfig::default();
    let outputs = fuse_all(&tables, &countries, OutlierFilter::default()).unwrap();
    let table = outputs.select(config.fusion_mode);
    let suite = run_analyses(table, &tables.pollution, &config);
    let temp_dir = tempfile::TempDir::new().unwrap();

    let mut written = export_result_tables(&suite, temp_dir.path()).unwrap();
    let names: Vec<String> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    for expected in [
        "descriptive.csv",
        "correlations.csv",
        "correlation_matrix.csv",
        "trends.csv",
        "trend_yearly_means.csv",
        "chi2_tests.csv",
        "pca_variance.csv",
        "pca_loadings.csv",
        "graph_nodes.csv",
        "graph_edges.csv",
        "model_evaluations.csv",
        "feature_importance.csv",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {}", expected);
    }

    let overview = FusionOverview::new(&countries, table);
    assert_eq!(overview.unresolved.len(), 2);
    let missing_codes = missing_indicator_codes(&tables.indicators);
    let inputs = [temp_dir.path()];
    let report = AnalysisReport::new(
        &inputs,
        temp_dir.path(),
        &config,
        overview,
        &missing_codes,
        &suite,
    );
    let report_path = temp_dir.path().join("analysis_report.json");
    export_analysis_report(&report, &report_path).unwrap();
    written.push(report_path.clone());

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["analyses"]["pca"]["status"], "available");
    assert_eq!(
        json["analyses"]["independence"]["tests"][0]["name"],
        "income_category vs pm25_level"
    );
    assert_eq!(json["analyses"]["models"]["value"]["target"], "pollution_pm25");
    assert!(json["metadata"]["timestamp"].is_string());

    let zip_path = temp_dir.path().join("bundle.zip");
    package_outputs(&written, &zip_path).unwrap();
    assert!(zip_path.exists());
}

#[test]
fn test_overview_counts_resolved_rows_of_the_table() {
    let tables = synthetic_tables(24);
    let countries = resolve(&tables);
    let table = fuse(
        &tables,
        &countries,
        FusionMode::LatestYear,
        OutlierFilter::default(),
    )
    .unwrap();

    let overview = FusionOverview::new(&countries, &table);
    assert_eq!(overview.n_countries, 26);
    assert_eq!(overview.n_resolved, 24);

    // A table without one of the orphans still has every resolved row
    let mut trimmed = table.clone();
    trimmed.rows.retain(|r| r.key() != ORPHAN_ISO2);
    let overview = FusionOverview::new(&countries, &trimmed);
    assert_eq!(overview.n_countries, 25);
    assert_eq!(overview.n_resolved, 24);
    assert_eq!(overview.unresolved.len(), 2);
}

#[test]
fn test_two_year_sources_skip_every_trend() {
    let tables = synthetic_tables(12);
    let countries = resolve(&tables);
    let table = fuse(
        &tables,
        &countries,
        FusionMode::LatestYear,
        OutlierFilter::default(),
    )
    .unwrap();
    let suite = run_analyses(&table, &tables.pollution, &AnalysisConfig::default());

    assert!(suite.trends.trends.is_empty());
    let skipped: Vec<&str> = suite
        .trends
        .skipped
        .iter()
        .map(|s| s.pollutant.as_str())
        .collect();
    assert_eq!(skipped, vec!["pm25", "no2", "pm10", "o3"]);
    assert!(suite.trends.skipped.iter().all(|s| s.n_years == 2));

    let reasons = suite.skip_reasons();
    assert!(reasons.iter().any(|r| r.starts_with("trend pm25:")));
    assert!(reasons
        .iter()
        .any(|r| r.starts_with("chi-square income_category vs pm25_who_exceedance:")));
}

#[test]
fn test_added_year_yields_trends() {
    let mut tables = synthetic_tables(12);
    let extra: Vec<PollutionRecord> = tables
        .pollution
        .iter()
        .filter(|r| r.year == Some(LATEST_YEAR))
        .map(|r| PollutionRecord {
            year: Some(LATEST_YEAR + 1),
            average: r.average.map(|v| v * 0.9),
            ..r.clone()
        })
        .collect();
    tables.pollution.extend(extra);
    let countries = resolve(&tables);
    let table = fuse(
        &tables,
        &countries,
        FusionMode::LatestYear,
        OutlierFilter::default(),
    )
    .unwrap();
    let suite = run_analyses(&table, &tables.pollution, &AnalysisConfig::default());

    assert_eq!(suite.trends.trends.len(), 4);
    let pm25 = &suite.trends.trends[0];
    assert_eq!(pm25.pollutant, "pm25");
    assert_eq!(pm25.yearly.len(), 3);
    assert!(pm25.slope_per_year < 0.0);
}
