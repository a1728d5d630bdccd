//! Flat result tables and the JSON analysis report
//!
//! Every table is keyed by canonical country key and/or feature name so it
//! can be joined back onto the fused table.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use polars::prelude::*;
use serde::Serialize;

use crate::pipeline::config::AnalysisConfig;
use crate::pipeline::fusion::{ColumnMeta, FusedTable};
use crate::pipeline::{AnalysisSuite, CountryTable};

/// Report metadata
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub timestamp: String,
    pub airfuse_version: String,
    pub inputs: Vec<String>,
    pub output_dir: String,
    pub config: AnalysisConfig,
}

/// Fused-table overview carried in the report
#[derive(Debug, Clone, Serialize)]
pub struct FusionOverview {
    pub n_countries: usize,
    pub n_resolved: usize,
    /// Reason per unresolved identifier.
    pub unresolved: Vec<String>,
    pub columns: Vec<ColumnMeta>,
    pub quality_distribution: BTreeMap<u8, usize>,
}

impl FusionOverview {
    pub fn new(countries: &CountryTable, table: &FusedTable) -> Self {
        let mut quality_distribution = BTreeMap::new();
        for row in &table.rows {
            *quality_distribution.entry(row.quality_score).or_insert(0) += 1;
        }
        let unresolved: Vec<String> = countries
            .unresolved()
            .iter()
            .map(|e| e.to_string())
            .collect();
        Self {
            n_countries: table.rows.len(),
            n_resolved: table
                .rows
                .iter()
                .filter(|r| countries.is_resolved(r.key()))
                .count(),
            unresolved,
            columns: table.columns.clone(),
            quality_distribution,
        }
    }
}

/// The complete JSON analysis report
#[derive(Debug, Serialize)]
pub struct AnalysisReport<'a> {
    pub metadata: ReportMetadata,
    pub fusion: FusionOverview,
    pub missing_indicator_codes: &'a BTreeMap<String, BTreeSet<String>>,
    pub analyses: &'a AnalysisSuite,
}

impl<'a> AnalysisReport<'a> {
    pub fn new(
        inputs: &[&Path],
        output_dir: &Path,
        config: &AnalysisConfig,
        fusion: FusionOverview,
        missing_indicator_codes: &'a BTreeMap<String, BTreeSet<String>>,
        analyses: &'a AnalysisSuite,
    ) -> Self {
        Self {
            metadata: ReportMetadata {
                timestamp: Utc::now().to_rfc3339(),
                airfuse_version: env!("CARGO_PKG_VERSION").to_string(),
                inputs: inputs.iter().map(|p| p.display().to_string()).collect(),
                output_dir: output_dir.display().to_string(),
                config: config.clone(),
            },
            fusion,
            missing_indicator_codes,
            analyses,
        }
    }
}

/// Export the analysis report to a JSON file
pub fn export_analysis_report(report: &AnalysisReport<'_>, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialize analysis report to JSON")?;

    std::fs::write(output_path, json)
        .with_context(|| format!("Failed to write analysis report to {}", output_path.display()))?;

    Ok(())
}

/// Write a DataFrame as CSV
pub fn write_csv(df: &mut DataFrame, output_path: &Path) -> Result<()> {
    let mut file = File::create(output_path)
        .with_context(|| format!("Failed to create CSV file: {}", output_path.display()))?;
    CsvWriter::new(&mut file)
        .finish(df)
        .with_context(|| format!("Failed to write CSV file: {}", output_path.display()))?;
    Ok(())
}

/// Write a fused table under its mode's file name, returning the path
pub fn write_fused_table(table: &FusedTable, output_dir: &Path) -> Result<PathBuf> {
    let path = output_dir.join(table.mode.file_name());
    let mut df = table
        .to_dataframe()
        .context("Failed to build fused DataFrame")?;
    write_csv(&mut df, &path)?;
    Ok(path)
}

pub fn descriptive_frame(suite: &AnalysisSuite) -> PolarsResult<DataFrame> {
    let p = &suite.descriptive.pollutants;
    DataFrame::new(vec![
        Column::new("pollutant".into(), p.iter().map(|s| s.column.clone()).collect::<Vec<_>>()),
        Column::new("n".into(), p.iter().map(|s| s.n as u32).collect::<Vec<_>>()),
        Column::new("mean".into(), p.iter().map(|s| s.mean).collect::<Vec<_>>()),
        Column::new("median".into(), p.iter().map(|s| s.median).collect::<Vec<_>>()),
        Column::new("std".into(), p.iter().map(|s| s.std).collect::<Vec<_>>()),
        Column::new("p95".into(), p.iter().map(|s| s.p95).collect::<Vec<_>>()),
        Column::new("skewness".into(), p.iter().map(|s| s.skewness).collect::<Vec<_>>()),
        Column::new("non_normal".into(), p.iter().map(|s| s.non_normal).collect::<Vec<_>>()),
        Column::new("who_threshold".into(), p.iter().map(|s| s.who_threshold).collect::<Vec<_>>()),
        Column::new("n_exceeding".into(), p.iter().map(|s| s.n_exceeding as u32).collect::<Vec<_>>()),
        Column::new("share_exceeding".into(), p.iter().map(|s| s.share_exceeding).collect::<Vec<_>>()),
    ])
}

pub fn coverage_frame(suite: &AnalysisSuite) -> PolarsResult<DataFrame> {
    let c = &suite.coverage;
    DataFrame::new(vec![
        Column::new("min_pollutants".into(), c.iter().map(|t| t.min_pollutants as u32).collect::<Vec<_>>()),
        Column::new("n_countries".into(), c.iter().map(|t| t.n_countries as u32).collect::<Vec<_>>()),
        Column::new("pm25_mean".into(), c.iter().map(|t| t.pm25_mean).collect::<Vec<_>>()),
        Column::new("pm25_median".into(), c.iter().map(|t| t.pm25_median).collect::<Vec<_>>()),
        Column::new("gdp_pm25_spearman".into(), c.iter().map(|t| t.gdp_pm25_spearman).collect::<Vec<_>>()),
        Column::new("gdp_pm25_n".into(), c.iter().map(|t| t.gdp_pm25_n as u32).collect::<Vec<_>>()),
    ])
}

/// Evaluated and skipped pairs in one table; skipped rows carry a reason and no coefficient.
pub fn correlation_frame(suite: &AnalysisSuite) -> PolarsResult<DataFrame> {
    let report = &suite.correlations;
    let mut feature_a = Vec::new();
    let mut feature_b = Vec::new();
    let mut coefficient: Vec<Option<f64>> = Vec::new();
    let mut p_value: Vec<Option<f64>> = Vec::new();
    let mut n = Vec::new();
    let mut significant: Vec<Option<bool>> = Vec::new();
    let mut strength: Vec<Option<String>> = Vec::new();
    let mut skip_reason: Vec<Option<String>> = Vec::new();

    for r in &report.results {
        feature_a.push(r.feature_a.clone());
        feature_b.push(r.feature_b.clone());
        coefficient.push(Some(r.coefficient));
        p_value.push(Some(r.p_value));
        n.push(r.sample_size as u32);
        significant.push(Some(r.significant));
        strength.push(Some(format!("{:?}", r.strength).to_lowercase()));
        skip_reason.push(None);
    }
    for s in &report.skipped {
        feature_a.push(s.feature_a.clone());
        feature_b.push(s.feature_b.clone());
        coefficient.push(None);
        p_value.push(None);
        n.push(s.sample_size as u32);
        significant.push(None);
        strength.push(None);
        skip_reason.push(Some(s.reason.clone()));
    }

    DataFrame::new(vec![
        Column::new("pollutant".into(), feature_a),
        Column::new("feature".into(), feature_b),
        Column::new("method".into(), vec![report.method.to_string(); n.len()]),
        Column::new("coefficient".into(), coefficient),
        Column::new("p_value".into(), p_value),
        Column::new("n".into(), n),
        Column::new("significant".into(), significant),
        Column::new("strength".into(), strength),
        Column::new("skip_reason".into(), skip_reason),
    ])
}

/// One row per pollutant; pollutants without enough years carry a reason and no fit.
pub fn trend_frame(suite: &AnalysisSuite) -> PolarsResult<DataFrame> {
    let report = &suite.trends;
    let mut pollutant = Vec::new();
    let mut n_years = Vec::new();
    let mut slope: Vec<Option<f64>> = Vec::new();
    let mut percent: Vec<Option<f64>> = Vec::new();
    let mut r_squared: Vec<Option<f64>> = Vec::new();
    let mut p_value: Vec<Option<f64>> = Vec::new();
    let mut direction: Vec<Option<String>> = Vec::new();
    let mut significant: Vec<Option<bool>> = Vec::new();
    let mut skip_reason: Vec<Option<String>> = Vec::new();

    for t in &report.trends {
        pollutant.push(t.pollutant.clone());
        n_years.push(t.yearly.len() as u32);
        slope.push(Some(t.slope_per_year));
        percent.push(Some(t.percent_change_per_year));
        r_squared.push(Some(t.r_squared));
        p_value.push(Some(t.p_value));
        direction.push(Some(format!("{:?}", t.direction).to_lowercase()));
        significant.push(Some(t.significant));
        skip_reason.push(None);
    }
    for s in &report.skipped {
        pollutant.push(s.pollutant.clone());
        n_years.push(s.n_years as u32);
        for col in [&mut slope, &mut percent, &mut r_squared, &mut p_value] {
            col.push(None);
        }
        direction.push(None);
        significant.push(None);
        skip_reason.push(Some(s.reason.clone()));
    }

    DataFrame::new(vec![
        Column::new("pollutant".into(), pollutant),
        Column::new("n_years".into(), n_years),
        Column::new("slope_per_year".into(), slope),
        Column::new("percent_change_per_year".into(), percent),
        Column::new("r_squared".into(), r_squared),
        Column::new("p_value".into(), p_value),
        Column::new("direction".into(), direction),
        Column::new("significant".into(), significant),
        Column::new("skip_reason".into(), skip_reason),
    ])
}

/// Yearly global mean per pollutant, long format.
pub fn trend_yearly_frame(suite: &AnalysisSuite) -> PolarsResult<DataFrame> {
    let rows: Vec<(&str, &crate::pipeline::trends::YearlyMean)> = suite
        .trends
        .trends
        .iter()
        .flat_map(|t| t.yearly.iter().map(move |y| (t.pollutant.as_str(), y)))
        .collect();
    DataFrame::new(vec![
        Column::new("pollutant".into(), rows.iter().map(|(p, _)| p.to_string()).collect::<Vec<_>>()),
        Column::new("year".into(), rows.iter().map(|(_, y)| y.year).collect::<Vec<_>>()),
        Column::new("mean".into(), rows.iter().map(|(_, y)| y.mean).collect::<Vec<_>>()),
        Column::new("n_countries".into(), rows.iter().map(|(_, y)| y.n_countries as u32).collect::<Vec<_>>()),
    ])
}

/// Chi-square tests of independence; skipped tests carry a reason and no statistic.
pub fn independence_frame(suite: &AnalysisSuite) -> PolarsResult<DataFrame> {
    let report = &suite.independence;
    let mut name = Vec::new();
    let mut n: Vec<Option<u64>> = Vec::new();
    let mut chi2: Vec<Option<f64>> = Vec::new();
    let mut dof: Vec<Option<u32>> = Vec::new();
    let mut p_value: Vec<Option<f64>> = Vec::new();
    let mut cramers_v: Vec<Option<f64>> = Vec::new();
    let mut yates: Vec<Option<bool>> = Vec::new();
    let mut significant: Vec<Option<bool>> = Vec::new();
    let mut skip_reason: Vec<Option<String>> = Vec::new();

    for t in &report.tests {
        name.push(t.name.clone());
        n.push(Some(t.n));
        chi2.push(Some(t.chi2));
        dof.push(Some(t.dof as u32));
        p_value.push(Some(t.p_value));
        cramers_v.push(Some(t.cramers_v));
        yates.push(Some(t.yates_corrected));
        significant.push(Some(t.significant));
        skip_reason.push(None);
    }
    for s in &report.skipped {
        name.push(s.name.clone());
        n.push(None);
        dof.push(None);
        for col in [&mut chi2, &mut p_value, &mut cramers_v] {
            col.push(None);
        }
        yates.push(None);
        significant.push(None);
        skip_reason.push(Some(s.reason.clone()));
    }

    DataFrame::new(vec![
        Column::new("test".into(), name),
        Column::new("n".into(), n),
        Column::new("chi2".into(), chi2),
        Column::new("dof".into(), dof),
        Column::new("p_value".into(), p_value),
        Column::new("cramers_v".into(), cramers_v),
        Column::new("yates_corrected".into(), yates),
        Column::new("significant".into(), significant),
        Column::new("skip_reason".into(), skip_reason),
    ])
}

pub fn correlation_matrix_frame(suite: &AnalysisSuite) -> PolarsResult<DataFrame> {
    let matrix = &suite.correlation_matrix;
    let mut columns = vec![Column::new("column".into(), matrix.columns.clone())];
    for (j, name) in matrix.columns.iter().enumerate() {
        columns.push(Column::new(
            name.as_str().into(),
            matrix.values.iter().map(|row| row[j]).collect::<Vec<_>>(),
        ));
    }
    DataFrame::new(columns)
}

/// (component, eigenvalue, ratio, cumulative) table and the loading matrix.
pub fn pca_frames(suite: &AnalysisSuite) -> Option<PolarsResult<(DataFrame, DataFrame)>> {
    let model = suite.pca.value()?;
    let build = || -> PolarsResult<(DataFrame, DataFrame)> {
        let c = &model.components;
        let variance = DataFrame::new(vec![
            Column::new("component".into(), c.iter().map(|p| format!("PC{}", p.index)).collect::<Vec<_>>()),
            Column::new("eigenvalue".into(), c.iter().map(|p| p.eigenvalue).collect::<Vec<_>>()),
            Column::new(
                "explained_variance_ratio".into(),
                c.iter().map(|p| p.explained_variance_ratio).collect::<Vec<_>>(),
            ),
            Column::new("cumulative_variance".into(), c.iter().map(|p| p.cumulative_variance).collect::<Vec<_>>()),
        ])?;

        let mut loading_columns = vec![Column::new("feature".into(), model.features.clone())];
        for pc in c {
            loading_columns.push(Column::new(
                format!("PC{}", pc.index).into(),
                pc.loadings.clone(),
            ));
        }
        Ok((variance, DataFrame::new(loading_columns)?))
    };
    Some(build())
}

pub fn pca_scores_frame(suite: &AnalysisSuite) -> Option<PolarsResult<DataFrame>> {
    let model = suite.pca.value()?;
    let mut columns = vec![
        Column::new("country".into(), model.scores.iter().map(|s| s.country.clone()).collect::<Vec<_>>()),
        Column::new("quadrant".into(), model.scores.iter().map(|s| s.quadrant.clone()).collect::<Vec<_>>()),
    ];
    for k in 0..model.components.len() {
        columns.push(Column::new(
            format!("PC{}", k + 1).into(),
            model.scores.iter().map(|s| s.scores.get(k).copied()).collect::<Vec<_>>(),
        ));
    }
    Some(DataFrame::new(columns))
}

pub fn graph_frames(suite: &AnalysisSuite) -> Option<PolarsResult<(DataFrame, DataFrame)>> {
    let graph = suite.graph.value()?;
    let build = || -> PolarsResult<(DataFrame, DataFrame)> {
        let n = &graph.nodes;
        let nodes = DataFrame::new(vec![
            Column::new("country".into(), n.iter().map(|x| x.country.clone()).collect::<Vec<_>>()),
            Column::new("community".into(), n.iter().map(|x| x.community.map(|c| c as u32)).collect::<Vec<_>>()),
            Column::new("mean_knn_distance".into(), n.iter().map(|x| x.mean_knn_distance).collect::<Vec<_>>()),
            Column::new("knn_outlier".into(), n.iter().map(|x| x.knn_outlier).collect::<Vec<_>>()),
            Column::new("dbscan_cluster".into(), n.iter().map(|x| x.dbscan_cluster.map(|c| c as u32)).collect::<Vec<_>>()),
            Column::new("dbscan_noise".into(), n.iter().map(|x| x.dbscan_noise).collect::<Vec<_>>()),
        ])?;
        let e = &graph.knn_edges;
        let edges = DataFrame::new(vec![
            Column::new("source".into(), e.iter().map(|x| x.source.clone()).collect::<Vec<_>>()),
            Column::new("target".into(), e.iter().map(|x| x.target.clone()).collect::<Vec<_>>()),
            Column::new("distance".into(), e.iter().map(|x| x.distance).collect::<Vec<_>>()),
            Column::new("weight".into(), e.iter().map(|x| x.weight).collect::<Vec<_>>()),
        ])?;
        Ok((nodes, edges))
    };
    Some(build())
}

/// One row per model family; skipped families carry their reason.
pub fn model_frame(suite: &AnalysisSuite) -> Option<PolarsResult<DataFrame>> {
    let report = suite.models.value()?;
    let ev = &report.evaluations;
    let mut name: Vec<String> = ev.iter().map(|e| e.model_name.clone()).collect();
    let mut train: Vec<Option<f64>> = ev.iter().map(|e| e.train_score()).collect();
    let mut test: Vec<Option<f64>> = ev.iter().map(|e| e.test_score()).collect();
    let mut cv_mean: Vec<Option<f64>> = ev.iter().map(|e| Some(e.cross_val_mean())).collect();
    let mut cv_std: Vec<Option<f64>> = ev.iter().map(|e| Some(e.cross_val_std())).collect();
    let mut cv_mae: Vec<Option<f64>> = ev.iter().map(|e| Some(e.cross_validation.mae_mean)).collect();
    let mut loo_r2: Vec<Option<f64>> = ev.iter().map(|e| e.loo.value().map(|l| l.r2)).collect();
    let mut loo_mae: Vec<Option<f64>> = ev.iter().map(|e| e.loo.value().map(|l| l.mae)).collect();
    let mut skip_reason: Vec<Option<String>> = vec![None; ev.len()];
    for s in &report.skipped {
        name.push(s.model_name.clone());
        for col in [&mut train, &mut test, &mut cv_mean, &mut cv_std, &mut cv_mae, &mut loo_r2, &mut loo_mae] {
            col.push(None);
        }
        skip_reason.push(Some(s.reason.clone()));
    }
    Some(DataFrame::new(vec![
        Column::new("model_name".into(), name),
        Column::new("train_score".into(), train),
        Column::new("test_score".into(), test),
        Column::new("cross_val_mean".into(), cv_mean),
        Column::new("cross_val_std".into(), cv_std),
        Column::new("cv_mae".into(), cv_mae),
        Column::new("loo_r2".into(), loo_r2),
        Column::new("loo_mae".into(), loo_mae),
        Column::new("skip_reason".into(), skip_reason),
    ]))
}

/// Full-data residuals of every model family, long format.
pub fn residual_frame(suite: &AnalysisSuite) -> Option<PolarsResult<DataFrame>> {
    let report = suite.models.value()?;
    let rows: Vec<(&str, &crate::pipeline::models::CountryResidual)> = report
        .evaluations
        .iter()
        .flat_map(|e| e.residuals_by_country.iter().map(move |r| (e.model_name.as_str(), r)))
        .collect();
    Some(DataFrame::new(vec![
        Column::new("model_name".into(), rows.iter().map(|(m, _)| m.to_string()).collect::<Vec<_>>()),
        Column::new("country".into(), rows.iter().map(|(_, r)| r.country.clone()).collect::<Vec<_>>()),
        Column::new("actual".into(), rows.iter().map(|(_, r)| r.actual).collect::<Vec<_>>()),
        Column::new("predicted".into(), rows.iter().map(|(_, r)| r.predicted).collect::<Vec<_>>()),
        Column::new("residual".into(), rows.iter().map(|(_, r)| r.residual).collect::<Vec<_>>()),
    ]))
}

pub fn importance_frame(suite: &AnalysisSuite) -> Option<PolarsResult<DataFrame>> {
    let ranking = suite.models.value()?.importance.value()?;
    Some(DataFrame::new(vec![
        Column::new("feature".into(), ranking.iter().map(|f| f.feature.clone()).collect::<Vec<_>>()),
        Column::new("label".into(), ranking.iter().map(|f| f.label.clone()).collect::<Vec<_>>()),
        Column::new("linear_coefficient".into(), ranking.iter().map(|f| f.linear_coefficient).collect::<Vec<_>>()),
        Column::new("impurity".into(), ranking.iter().map(|f| f.impurity).collect::<Vec<_>>()),
        Column::new("permutation".into(), ranking.iter().map(|f| f.permutation).collect::<Vec<_>>()),
        Column::new("mean_rank".into(), ranking.iter().map(|f| f.mean_rank).collect::<Vec<_>>()),
    ]))
}

/// Write every available result table into `output_dir`, returning the written paths.
/// Unavailable analyses produce no file.
pub fn export_result_tables(suite: &AnalysisSuite, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    let mut write = |name: &str, df: PolarsResult<DataFrame>| -> Result<()> {
        let mut df = df.with_context(|| format!("Failed to build {} table", name))?;
        let path = output_dir.join(name);
        write_csv(&mut df, &path)?;
        written.push(path);
        Ok(())
    };

    write("descriptive.csv", descriptive_frame(suite))?;
    write("coverage_sensitivity.csv", coverage_frame(suite))?;
    write("correlations.csv", correlation_frame(suite))?;
    write("correlation_matrix.csv", correlation_matrix_frame(suite))?;
    write("trends.csv", trend_frame(suite))?;
    write("trend_yearly_means.csv", trend_yearly_frame(suite))?;
    write("chi2_tests.csv", independence_frame(suite))?;

    if let Some(frames) = pca_frames(suite) {
        let (variance, loadings) = frames.context("Failed to build PCA tables")?;
        write("pca_variance.csv", Ok(variance))?;
        write("pca_loadings.csv", Ok(loadings))?;
    }
    if let Some(scores) = pca_scores_frame(suite) {
        write("pca_scores.csv", scores)?;
    }
    if let Some(frames) = graph_frames(suite) {
        let (nodes, edges) = frames.context("Failed to build graph tables")?;
        write("graph_nodes.csv", Ok(nodes))?;
        write("graph_edges.csv", Ok(edges))?;
    }
    if let Some(models) = model_frame(suite) {
        write("model_evaluations.csv", models)?;
    }
    if let Some(residuals) = residual_frame(suite) {
        write("model_residuals.csv", residuals)?;
    }
    if let Some(importance) = importance_frame(suite) {
        write("feature_importance.csv", importance)?;
    }

    Ok(written)
}

