//! Analysis configuration and tunable defaults

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::catalog;

/// Which fusion output the analyses consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Most recent year per (country, pollutant).
    #[default]
    LatestYear,
    /// Mean over every available year per (country, pollutant).
    AllYearsMean,
}

impl FusionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMode::LatestYear => "latest",
            FusionMode::AllYearsMean => "mean",
        }
    }

    /// File name of the fused table written for this mode.
    pub fn file_name(&self) -> &'static str {
        match self {
            FusionMode::LatestYear => "fused_latest.csv",
            FusionMode::AllYearsMean => "fused_mean.csv",
        }
    }
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "latest" | "latest-year" | "current" => Ok(FusionMode::LatestYear),
            "mean" | "all-years-mean" => Ok(FusionMode::AllYearsMean),
            _ => Err(format!(
                "Invalid fusion mode '{}'. Use 'latest' or 'mean'",
                s
            )),
        }
    }
}

/// Correlation coefficient used for (pollutant, feature) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Spearman,
    Pearson,
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationMethod::Spearman => f.write_str("spearman"),
            CorrelationMethod::Pearson => f.write_str("pearson"),
        }
    }
}

impl FromStr for CorrelationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spearman" => Ok(CorrelationMethod::Spearman),
            "pearson" => Ok(CorrelationMethod::Pearson),
            _ => Err(format!(
                "Invalid correlation method '{}'. Use 'spearman' or 'pearson'",
                s
            )),
        }
    }
}

pub const DEFAULT_DBSCAN_EPS: f64 = 1.5;

/// DBSCAN neighbourhood radius: a fixed value or the knee of the k-distance curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum DbscanEps {
    Fixed(f64),
    Auto,
}

impl Default for DbscanEps {
    fn default() -> Self {
        DbscanEps::Fixed(DEFAULT_DBSCAN_EPS)
    }
}

impl fmt::Display for DbscanEps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbscanEps::Fixed(eps) => write!(f, "{}", eps),
            DbscanEps::Auto => f.write_str("auto"),
        }
    }
}

impl FromStr for DbscanEps {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(DbscanEps::Auto);
        }
        let value: f64 = s
            .parse()
            .map_err(|_| format!("'{}' is not a valid number or 'auto'", s))?;
        if value > 0.0 && value.is_finite() {
            Ok(DbscanEps::Fixed(value))
        } else {
            Err(format!("dbscan eps must be positive, got {}", value))
        }
    }
}

/// Every tunable of the analysis suite.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisConfig {
    pub fusion_mode: FusionMode,
    /// Target pollutant parameter for predictive modeling (e.g. `pm25`).
    pub target: String,
    pub correlation_method: CorrelationMethod,
    /// |skewness| above which a pollutant is flagged non-normal.
    pub skew_threshold: f64,
    /// Indicator values farther than this many standard deviations are dropped.
    pub zscore_cutoff: f64,
    /// Indicator groups smaller than this skip the z-score filter.
    pub zscore_min_group: usize,
    pub knn_k: usize,
    pub dbscan_eps: DbscanEps,
    pub dbscan_min_samples: usize,
    pub top_divergent_pairs: usize,
    /// Rows below this quality score are left out of the coverage-gated analyses.
    pub min_quality: u8,
    pub seed: u64,
    pub detect_communities: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fusion_mode: FusionMode::default(),
            target: "pm25".to_string(),
            correlation_method: CorrelationMethod::default(),
            skew_threshold: 1.0,
            zscore_cutoff: 3.0,
            zscore_min_group: 5,
            knn_k: 5,
            dbscan_eps: DbscanEps::default(),
            dbscan_min_samples: 2,
            top_divergent_pairs: 10,
            min_quality: 0,
            seed: 42,
            detect_communities: true,
        }
    }
}

impl AnalysisConfig {
    /// Fused column name of the modeling target.
    pub fn target_column(&self) -> String {
        catalog::pollutant_column(&self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbscan_eps_parsing() {
        assert_eq!("auto".parse::<DbscanEps>(), Ok(DbscanEps::Auto));
        assert_eq!("2.5".parse::<DbscanEps>(), Ok(DbscanEps::Fixed(2.5)));
        assert!("-1".parse::<DbscanEps>().is_err());
        assert!("wide".parse::<DbscanEps>().is_err());
    }

    #[test]
    fn test_fusion_mode_parsing() {
        assert_eq!("latest".parse::<FusionMode>(), Ok(FusionMode::LatestYear));
        assert_eq!("MEAN".parse::<FusionMode>(), Ok(FusionMode::AllYearsMean));
        assert!("median".parse::<FusionMode>().is_err());
    }

    #[test]
    fn test_default_target_column() {
        assert_eq!(AnalysisConfig::default().target_column(), "pollution_pm25");
    }
}
