//! Command-line argument definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::pipeline::config::{AnalysisConfig, CorrelationMethod, DbscanEps, FusionMode};
use crate::pipeline::loader::SourcePaths;

/// Airfuse - Fuse air-quality, city and development-indicator tables and analyze them
#[derive(Parser, Debug)]
#[command(name = "airfuse")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Pollution measurements file (CSV or Parquet) with country code, year,
    /// parameter and average columns
    #[arg(short, long)]
    pub pollution: Option<PathBuf>,

    /// City reference file (CSV or Parquet) with country, ISO2 and ISO3 columns
    #[arg(short, long)]
    pub cities: Option<PathBuf>,

    /// Development-indicator file; repeat for each thematic axis.
    /// The axis is taken from the file stem (e.g. worldbank_transport.csv → transport).
    #[arg(short = 'w', long = "indicators")]
    pub indicators: Vec<PathBuf>,

    /// Directory for fused tables, result tables and the JSON report
    #[arg(short, long, default_value = "airfuse_output")]
    pub output_dir: PathBuf,

    /// Fused table the analyses run on: "latest" (most recent year) or "mean" (all-years mean)
    #[arg(long, default_value = "latest")]
    pub fusion_mode: FusionMode,

    /// Target pollutant for predictive modeling (pm25, no2, pm10, o3, so2, co)
    #[arg(short, long, default_value = "pm25", value_parser = validate_pollutant)]
    pub target: String,

    /// Correlation coefficient: "spearman" or "pearson"
    #[arg(long, default_value = "spearman")]
    pub correlation_method: CorrelationMethod,

    /// |skewness| above which a pollutant distribution is flagged non-normal
    #[arg(long, default_value = "1.0", value_parser = validate_positive)]
    pub skew_threshold: f64,

    /// Indicator values more than this many standard deviations from their group mean are dropped
    #[arg(long, default_value = "3.0", value_parser = validate_positive)]
    pub zscore_cutoff: f64,

    /// Number of nearest neighbors per country in the similarity graph
    #[arg(long, default_value = "5", value_parser = validate_knn_k)]
    pub knn_k: usize,

    /// DBSCAN neighbourhood radius in standardized units, or "auto" for the k-distance knee
    #[arg(long, default_value = "1.5")]
    pub dbscan_eps: DbscanEps,

    /// DBSCAN minimum neighbourhood size (including the point itself)
    #[arg(long, default_value = "2")]
    pub dbscan_min_samples: usize,

    /// Number of geography-divergent country pairs to report
    #[arg(long, default_value = "10")]
    pub top_pairs: usize,

    /// Minimum quality score (0-3) for a country to enter the coverage-gated analyses
    #[arg(long, default_value = "0", value_parser = validate_quality)]
    pub min_quality: u8,

    /// Seed for bootstrap sampling, train/test shuffling and permutation importance
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Skip community detection on the similarity graph
    #[arg(long, default_value = "false")]
    pub no_communities: bool,

    /// Also package every output into a single zip archive
    #[arg(long, default_value = "false")]
    pub bundle: bool,

    /// Skip interactive confirmation prompts
    #[arg(long, default_value = "false")]
    pub no_confirm: bool,

    /// Number of rows to use for schema inference (CSV only).
    /// Use 0 for full table scan.
    #[arg(long, default_value = "10000")]
    pub infer_schema_length: usize,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load, resolve and fuse the sources, then write both fused tables only
    Fuse,

    /// Report catalog indicator codes missing from the indicator files, per axis
    Check,
}

impl Cli {
    /// Paths of all three sources, failing when one is not given.
    pub fn source_paths(&self) -> Result<SourcePaths, String> {
        let pollution = self.pollution.clone().ok_or("--pollution is required")?;
        let cities = self.cities.clone().ok_or("--cities is required")?;
        Ok(SourcePaths {
            pollution,
            cities,
            indicators: self.indicator_paths()?.to_vec(),
        })
    }

    pub fn indicator_paths(&self) -> Result<&[PathBuf], String> {
        if self.indicators.is_empty() {
            Err("at least one --indicators file is required".to_string())
        } else {
            Ok(&self.indicators)
        }
    }

    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            fusion_mode: self.fusion_mode,
            target: self.target.to_lowercase(),
            correlation_method: self.correlation_method,
            skew_threshold: self.skew_threshold,
            zscore_cutoff: self.zscore_cutoff,
            knn_k: self.knn_k,
            dbscan_eps: self.dbscan_eps,
            dbscan_min_samples: self.dbscan_min_samples.max(1),
            top_divergent_pairs: self.top_pairs,
            min_quality: self.min_quality,
            seed: self.seed,
            detect_communities: !self.no_communities,
            ..AnalysisConfig::default()
        }
    }
}

fn validate_positive(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;

    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(format!("value must be positive, got {}", value))
    }
}

fn validate_knn_k(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid integer", s))?;

    if value == 0 {
        Err("knn_k must be at least 1".to_string())
    } else {
        Ok(value)
    }
}

fn validate_quality(s: &str) -> Result<u8, String> {
    let value: u8 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid integer", s))?;

    if value > 3 {
        Err(format!("min_quality must be between 0 and 3, got {}", value))
    } else {
        Ok(value)
    }
}

fn validate_pollutant(s: &str) -> Result<String, String> {
    let parameter = s.to_lowercase().replace('.', "");
    if crate::pipeline::catalog::POLLUTANTS.contains(&parameter.as_str()) {
        Ok(parameter)
    } else {
        Err(format!(
            "unknown pollutant '{}'. Use one of: {}",
            s,
            crate::pipeline::catalog::POLLUTANTS.join(", ")
        ))
    }
}
