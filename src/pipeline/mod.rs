//! Pipeline module - resolves the sources, builds the fused table and runs
//! the analysis suite over it

pub mod catalog;
pub mod community;
pub mod config;
pub mod correlation;
pub mod descriptive;
pub mod error;
pub mod fusion;
pub mod graph;
pub mod independence;
pub mod linalg;
pub mod loader;
pub mod matrix;
pub mod missing;
pub mod models;
pub mod pca;
pub mod resolver;
pub mod stats;
pub mod trends;

pub use config::{AnalysisConfig, CorrelationMethod, DbscanEps, FusionMode};
pub use correlation::{correlate_table, correlation_matrix, CorrelationMatrix, CorrelationReport};
pub use descriptive::{describe_pollutants, DescriptiveReport};
pub use error::{Analysis, AnalysisError};
pub use fusion::{fuse, fuse_all, FusedRow, FusedTable, FusionOutputs, OutlierFilter};
pub use graph::{build_similarity_graph, SimilarityGraph};
pub use independence::{independence_tests, IndependenceReport};
pub use loader::{load_sources, PollutionRecord, SourcePaths, SourceTables};
pub use missing::{analyze_missing_values, coverage_sensitivity, missing_indicator_codes, CoverageThreshold};
pub use models::{run_models, ModelingReport};
pub use pca::{run_pca, PrincipalComponentModel};
pub use resolver::{resolve, CountryTable};
pub use trends::{analyze_trends, TrendReport};

use serde::Serialize;

use community::{CommunityDetector, Louvain};

/// Every analysis output for one fused table.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSuite {
    pub fusion_mode: FusionMode,
    pub n_countries: usize,
    pub n_eligible: usize,
    pub descriptive: DescriptiveReport,
    /// Missing-value ratio per fused column, highest first.
    pub missing_values: Vec<(String, f64)>,
    pub coverage: Vec<CoverageThreshold>,
    /// Yearly global means from the raw pollution readings.
    pub trends: TrendReport,
    pub correlations: CorrelationReport,
    pub correlation_matrix: CorrelationMatrix,
    pub independence: IndependenceReport,
    pub pca: Analysis<PrincipalComponentModel>,
    pub graph: Analysis<SimilarityGraph>,
    pub models: Analysis<ModelingReport>,
}

impl AnalysisSuite {
    /// Human-readable reason for every skipped analysis, pair, feature or model.
    pub fn skip_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        for skip in &self.trends.skipped {
            reasons.push(format!("trend {}: {}", skip.pollutant, skip.reason));
        }
        for skip in &self.correlations.skipped {
            reasons.push(format!(
                "correlation {} x {}: {}",
                skip.feature_a, skip.feature_b, skip.reason
            ));
        }
        for skip in &self.independence.skipped {
            reasons.push(format!("chi-square {}: {}", skip.name, skip.reason));
        }
        match &self.pca {
            Analysis::Available(model) => {
                for d in &model.dropped_features {
                    reasons.push(format!("PCA feature {}: {}", d.column, d.reason));
                }
                match &model.robustness {
                    Analysis::Available(audit) => {
                        for d in &audit.skipped {
                            reasons.push(format!(
                                "PCA robustness refit without {}: {}",
                                d.column, d.reason
                            ));
                        }
                    }
                    Analysis::Unavailable { reason } => {
                        reasons.push(format!("PCA robustness audit: {}", reason))
                    }
                }
            }
            Analysis::Unavailable { reason } => reasons.push(format!("PCA: {}", reason)),
        }
        match &self.graph {
            Analysis::Available(graph) => {
                if let Some(reason) = graph.partition.reason() {
                    reasons.push(format!("community detection: {}", reason));
                }
                if let Some(reason) = graph.divergence.reason() {
                    reasons.push(format!("geography divergence: {}", reason));
                }
            }
            Analysis::Unavailable { reason } => {
                reasons.push(format!("similarity graph: {}", reason))
            }
        }
        match &self.models {
            Analysis::Available(report) => {
                for d in &report.dropped_features {
                    reasons.push(format!("model feature {}: {}", d.column, d.reason));
                }
                for s in &report.skipped {
                    reasons.push(format!("model {}: {}", s.model_name, s.reason));
                }
                if let Some(reason) = report.importance.reason() {
                    reasons.push(format!("feature importance: {}", reason));
                }
            }
            Analysis::Unavailable { reason } => {
                reasons.push(format!("predictive modeling: {}", reason))
            }
        }
        reasons
    }
}

/// Columns of the whole-matrix correlation: pollutants followed by the
/// modeling features present in the table.
pub fn matrix_columns(table: &FusedTable) -> Vec<String> {
    let mut columns = table.pollutant_columns();
    columns.extend(
        catalog::MODEL_FEATURES
            .iter()
            .filter(|c| table.has_column(c))
            .map(|c| c.to_string()),
    );
    columns
}

/// Run the analysis suite. Correlation, PCA, the similarity graph and the
/// predictive models share the immutable table and run concurrently.
/// Trends read the raw `pollution` readings, since fusion keeps one value
/// per country.
pub fn run_analyses(
    table: &FusedTable,
    pollution: &[PollutionRecord],
    config: &AnalysisConfig,
) -> AnalysisSuite {
    let louvain = Louvain::default();
    let detector: Option<&dyn CommunityDetector> = if config.detect_communities {
        Some(&louvain)
    } else {
        None
    };

    let ((correlations, pca), (graph, models)) = rayon::join(
        || {
            rayon::join(
                || correlate_table(table, config.correlation_method, config.min_quality),
                || run_pca(table, config.min_quality),
            )
        },
        || {
            rayon::join(
                || build_similarity_graph(table, config, detector),
                || run_models(table, config),
            )
        },
    );

    let eligible = table.eligible_rows(config.min_quality);
    let correlation_matrix =
        correlation_matrix(&eligible, &matrix_columns(table), config.correlation_method);

    AnalysisSuite {
        fusion_mode: table.mode,
        n_countries: table.rows.len(),
        n_eligible: eligible.len(),
        descriptive: describe_pollutants(table, config.skew_threshold),
        missing_values: analyze_missing_values(table),
        coverage: coverage_sensitivity(table),
        trends: analyze_trends(pollution),
        correlations,
        correlation_matrix,
        independence: independence_tests(&eligible),
        pca,
        graph,
        models,
    }
}
